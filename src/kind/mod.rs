//! Resource kinds and the driver registry
//!
//! Every catalog entry belongs to one `ResourceKind`, which fixes the
//! attribute schema its entries are validated against. Physical control of a
//! resource goes through a `ResourceDriver` looked up by type string in a
//! `DriverRegistry`.

mod driver;

pub use driver::{DriverError, DriverFactory, DriverRegistry, NullDriver, ResourceDriver};

use std::fmt;
use std::str::FromStr;

use lab_config::{Schema, ValueType, TIMES_KEY};
use serde::{Deserialize, Serialize};

/// Kinds of resources a lab catalog can describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Host IP address for a core network component
    IpAddress,
    /// 2G base transceiver station
    Bts,
    /// Radio channel number
    Arfcn,
    /// Subscriber modem with SIM
    Modem,
    /// 4G base station
    Enb,
    /// Core network or packet gateway node
    Gateway,
}

/// Unknown resource kind string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind '{0}'")]
pub struct UnknownKind(pub String);

impl ResourceKind {
    /// All kinds, in catalog order
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::IpAddress,
        ResourceKind::Bts,
        ResourceKind::Arfcn,
        ResourceKind::Modem,
        ResourceKind::Enb,
        ResourceKind::Gateway,
    ];

    /// Catalog / request key for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::IpAddress => "ip_address",
            ResourceKind::Bts => "bts",
            ResourceKind::Arfcn => "arfcn",
            ResourceKind::Modem => "modem",
            ResourceKind::Enb => "enb",
            ResourceKind::Gateway => "gateway",
        }
    }

    /// Schema of one catalog entry of this kind
    pub fn item_schema(&self) -> Schema {
        match self {
            ResourceKind::IpAddress => Schema::new()
                .with("addr", ValueType::Ipv4)
                .with("label", ValueType::Str),
            ResourceKind::Bts => {
                let power_supply = Schema::new()
                    .with("type", ValueType::Str)
                    .with("device", ValueType::Str)
                    .with("port", ValueType::Str);
                let timeslot = Schema::new().with("phys_chan_config", ValueType::Str);
                let trx = Schema::new()
                    .with("addr", ValueType::Ipv4)
                    .with("hw_addr", ValueType::HwAddr)
                    .with("net_device", ValueType::Str)
                    .with("nominal_power", ValueType::UInt)
                    .with("max_power_red", ValueType::UInt)
                    .with_nested("timeslot_list[]", &timeslot)
                    .with_nested("power_supply", &power_supply);
                Schema::new()
                    .with("label", ValueType::Str)
                    .with("type", ValueType::Str)
                    .with("addr", ValueType::Ipv4)
                    .with("ipa_unit_id", ValueType::UInt)
                    .with("band", ValueType::Str)
                    .with("direct_pcu", ValueType::Bool)
                    .with("channel_allocator", ValueType::Str)
                    .with("ciphers[]", ValueType::Str)
                    .with("num_trx", ValueType::UInt)
                    .with("max_trx", ValueType::UInt)
                    .with("remote_user", ValueType::Str)
                    .with_nested("trx_list[]", &trx)
            }
            ResourceKind::Arfcn => Schema::new()
                .with("arfcn", ValueType::UInt)
                .with("band", ValueType::Str),
            ResourceKind::Modem => Schema::new()
                .with("label", ValueType::Str)
                .with("type", ValueType::Str)
                .with("path", ValueType::Str)
                .with("imsi", ValueType::Digits)
                .with("ki", ValueType::HexStr)
                .with("auth_algo", ValueType::Str)
                .with("ciphers[]", ValueType::Str)
                .with("features[]", ValueType::Str),
            ResourceKind::Enb => Schema::new()
                .with("label", ValueType::Str)
                .with("type", ValueType::Str)
                .with("addr", ValueType::Ipv4)
                .with("remote_user", ValueType::Str)
                .with("num_prb", ValueType::UInt)
                .with("rf_dev_type", ValueType::Str)
                .with("rf_dev_args", ValueType::Str)
                .with("tx_gain", ValueType::UInt)
                .with("rx_gain", ValueType::UInt),
            ResourceKind::Gateway => Schema::new()
                .with("label", ValueType::Str)
                .with("type", ValueType::Str)
                .with("addr", ValueType::Ipv4)
                .with("remote_user", ValueType::Str),
        }
    }

    /// Schema of one request or modifier object of this kind
    pub fn request_schema(&self) -> Schema {
        self.item_schema().with(TIMES_KEY, ValueType::Times)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Schema of a whole catalog tree (`{kind: [item, ...]}`)
pub fn catalog_schema() -> Schema {
    ResourceKind::ALL.iter().fold(Schema::new(), |schema, kind| {
        schema.with_nested(&format!("{}[]", kind.as_str()), &kind.item_schema())
    })
}

/// Schema of a whole request or modifiers tree
pub fn request_schema() -> Schema {
    ResourceKind::ALL.iter().fold(Schema::new(), |schema, kind| {
        schema.with_nested(&format!("{}[]", kind.as_str()), &kind.request_schema())
    })
}
