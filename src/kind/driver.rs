//! Capability interface for physically driving a reserved resource.
//!
//! Real adapters (RF attenuators, power supplies, modem control) live outside
//! this crate and plug in through `DriverRegistry::register`. Lookup is by
//! the item's `type` attribute first and its kind name second, so a catalog
//! entry `{type = "osmo-bts-trx"}` can get a dedicated driver while every
//! other BTS falls back to the `bts` driver.

use std::collections::BTreeMap;

use serde_json::Value;

use super::ResourceKind;

/// Driver errors
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("no driver registered for '{0}'")]
    NotRegistered(String),

    #[error("driver '{driver}' failed to {action}: {reason}")]
    Failed {
        driver: String,
        action: &'static str,
        reason: String,
    },
}

/// Control surface of one resource instance
pub trait ResourceDriver: Send {
    /// Registry key this driver was created for
    fn name(&self) -> &str;

    /// Apply the item's effective attributes
    fn configure(&mut self, attrs: &Value) -> Result<(), DriverError>;

    /// Bring the resource up
    fn start(&mut self) -> Result<(), DriverError>;

    /// Bring the resource down
    fn stop(&mut self) -> Result<(), DriverError>;
}

/// Factory producing a driver for a registry key
pub type DriverFactory = Box<dyn Fn(&str) -> Box<dyn ResourceDriver> + Send + Sync>;

/// Driver that only records what it was asked to do
#[derive(Debug, Clone, Default)]
pub struct NullDriver {
    name: String,
    attrs: Option<Value>,
    running: bool,
    calls: Vec<&'static str>,
}

impl NullDriver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn attrs(&self) -> Option<&Value> {
        self.attrs.as_ref()
    }

    pub fn calls(&self) -> &[&'static str] {
        &self.calls
    }
}

impl ResourceDriver for NullDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, attrs: &Value) -> Result<(), DriverError> {
        self.attrs = Some(attrs.clone());
        self.calls.push("configure");
        Ok(())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.running = true;
        self.calls.push("start");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.running = false;
        self.calls.push("stop");
        Ok(())
    }
}

fn null_factory(name: &str) -> Box<dyn ResourceDriver> {
    Box::new(NullDriver::new(name))
}

/// Type-string keyed driver registry
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_null_drivers()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("keys", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DriverRegistry {
    /// Registry without any driver
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with a `NullDriver` for every resource kind
    pub fn with_null_drivers() -> Self {
        let mut registry = Self::empty();
        for kind in ResourceKind::ALL {
            registry.register(kind.as_str(), null_factory);
        }
        registry
    }

    /// Register (or replace) the factory for a type string
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Box<dyn ResourceDriver> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Box::new(factory));
    }

    /// Whether a factory exists for this exact key
    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Create and configure the driver for an item.
    ///
    /// The item's `type` attribute is tried before the kind name.
    pub fn create(&self, kind: &str, attrs: &Value) -> Result<Box<dyn ResourceDriver>, DriverError> {
        let type_key = attrs.get("type").and_then(Value::as_str);
        let (key, factory) = type_key
            .and_then(|t| self.factories.get_key_value(t))
            .or_else(|| self.factories.get_key_value(kind))
            .ok_or_else(|| DriverError::NotRegistered(type_key.unwrap_or(kind).to_string()))?;

        let mut driver = factory(key.as_str());
        driver.configure(attrs)?;
        Ok(driver)
    }
}
