//! Composition of a suite definition with its scenarios

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use lab_config::{combine, MergeError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::definition::{SuiteDefinition, SUITE_FILE};
use super::scenario::Scenario;

pub const SCHEMA_VERSION: u32 = 1;

pub const SCHEMA_ID: &str = "lab-broker/effective_request@1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestOrigin {
    Suite,
    Scenario,
}

/// A file that contributed to an effective request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSource {
    pub origin: RequestOrigin,
    pub name: String,
    pub path: PathBuf,
    pub sha256: String,
}

/// Resources, modifiers and config a suite run actually uses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveRequest {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,
    pub resources: Value,
    pub modifiers: Value,
    pub config: Value,
    /// Suite first, then scenarios in the order given
    pub sources: Vec<RequestSource>,
}

/// Fold `base <- scenarios[0] <- scenarios[1] <- ...` with `combine`.
///
/// Each section is merged independently and the left side wins, so values
/// set by the suite are never overridden by a scenario; scenarios only add
/// constraints, preference-list entries and config keys.
pub fn compose(base: &SuiteDefinition, scenarios: &[Scenario]) -> Result<EffectiveRequest, MergeError> {
    let mut resources = base.resources.clone();
    let mut modifiers = base.modifiers.clone();
    let mut config = base.config.clone();
    let mut sources = vec![RequestSource {
        origin: RequestOrigin::Suite,
        name: base.name.clone(),
        path: base.dir.join(SUITE_FILE),
        sha256: base.sha256.clone(),
    }];

    for scenario in scenarios {
        combine(&mut resources, &scenario.resources)?;
        combine(&mut modifiers, &scenario.modifiers)?;
        combine(&mut config, &scenario.config)?;
        sources.push(RequestSource {
            origin: RequestOrigin::Scenario,
            name: scenario.name.clone(),
            path: scenario.path.clone(),
            sha256: scenario.sha256.clone(),
        });
    }

    Ok(EffectiveRequest {
        schema_version: SCHEMA_VERSION,
        schema_id: SCHEMA_ID.to_string(),
        created_at: Utc::now(),
        resources: or_empty(resources),
        modifiers: or_empty(modifiers),
        config: or_empty(config),
        sources,
    })
}

fn or_empty(value: Value) -> Value {
    if value.is_null() {
        Value::Object(Map::new())
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn suite(resources: Value, config: Value) -> SuiteDefinition {
        SuiteDefinition {
            name: "voice".to_string(),
            dir: PathBuf::from("suites/voice"),
            tests: Vec::new(),
            resources,
            modifiers: Value::Null,
            config,
            sha256: "00".to_string(),
        }
    }

    fn scenario(name: &str, resources: Value, modifiers: Value, config: Value) -> Scenario {
        Scenario {
            name: name.to_string(),
            path: PathBuf::from(format!("scenarios/{}.toml", name)),
            sha256: "11".to_string(),
            resources,
            modifiers,
            config,
        }
    }

    #[test]
    fn test_scenarios_refine_suite_request() {
        let base = suite(json!({"bts": [{"times": 1}], "modem": [{"times": 2}]}), Value::Null);
        let trx = scenario("trx", json!({"bts": [{"type": "osmo-bts-trx"}]}), Value::Null, Value::Null);
        let voice = scenario(
            "voice",
            json!({"modem": [{"features": ["voice"]}]}),
            json!({"bts": [{"num_trx": 2}]}),
            json!({"msc": {"codec": "amr"}}),
        );

        let effective = compose(&base, &[trx, voice]).unwrap();
        assert_eq!(
            effective.resources,
            json!({
                "bts": [{"times": 1, "type": "osmo-bts-trx"}],
                "modem": [{"times": 2, "features": ["voice"]}]
            })
        );
        assert_eq!(effective.modifiers, json!({"bts": [{"num_trx": 2}]}));
        assert_eq!(effective.config["msc"]["codec"], "amr");
        let names: Vec<&str> = effective.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["voice", "trx", "voice"]);
        assert_eq!(effective.sources[0].origin, RequestOrigin::Suite);
    }

    #[test]
    fn test_earlier_layer_wins() {
        let base = suite(Value::Null, json!({"bsc": {"net_mcc": "901"}}));
        let a = scenario("a", Value::Null, Value::Null, json!({"bsc": {"net_mcc": "262", "net_mnc": "70"}}));
        let b = scenario("b", Value::Null, Value::Null, json!({"bsc": {"net_mnc": "01"}}));

        let effective = compose(&base, &[a, b]).unwrap();
        assert_eq!(effective.config, json!({"bsc": {"net_mcc": "901", "net_mnc": "70"}}));
        assert_eq!(effective.resources, json!({}));
    }

    #[test]
    fn test_shape_clash_reports_path() {
        let base = suite(Value::Null, json!({"bsc": {"ciphers": ["a5_0"]}}));
        let bad = scenario("bad", Value::Null, Value::Null, json!({"bsc": {"ciphers": [{"a": 1}]}}));
        let err = compose(&base, &[bad]).unwrap_err();
        assert!(matches!(err, MergeError::TypeMismatch { ref path, .. } if path == "bsc.ciphers[]"));
    }
}
