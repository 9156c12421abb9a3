//! tracing subscriber setup for the binary

use std::io;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter directive variable, checked before `RUST_LOG`
pub const LOG_ENV: &str = "LAB_BROKER_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Filter from `LAB_BROKER_LOG`, then `RUST_LOG`, then `info`.
///
/// An unparsable directive falls back to `info` with a note on stderr.
pub fn env_filter(lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
    let directive = lookup(LOG_ENV).or_else(|| lookup("RUST_LOG"));
    match directive {
        Some(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid log directive '{}' ({}); defaulting to {}",
                directive, err, DEFAULT_DIRECTIVE
            );
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }),
        None => EnvFilter::new(DEFAULT_DIRECTIVE),
    }
}

/// Install the global subscriber. Events go to stderr so stdout stays free
/// for command output. A second call is a no-op.
pub fn init_tracing(format: LogFormat) {
    let filter = env_filter(|key| std::env::var(key).ok());
    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(false).with_writer(io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_writer(io::stderr))
            .try_init(),
    };
    if result.is_ok() {
        tracing::debug!(format = ?format, "tracing initialised");
    }
}
