//! Driver factories and capability flags.
//!
//! Each dialect crate implements [`MountDriverFactory`] and is registered with a
//! [`DriverRegistry`] by the composition root:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Composition Root (main.rs)               │
//! │  registry.register_factory(AstroPhysicsFactory);         │
//! │  registry.register_factory(Pmc8Factory);                 │
//! └──────────────────────────────────────────────────────────┘
//!                              │  [device] driver = "pmc8"
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │          MountDriverFactory::validate / build            │
//! │  Parses the TOML table, opens the port, returns          │
//! │  Arc<dyn MountProtocol>                                  │
//! └──────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::MountProtocol;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Runtime capability flags of a mount dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Goto,
    Sync,
    Park,
    Abort,
    /// Sidereal, solar and lunar tracking presets
    TrackModes,
    /// Arbitrary tracking rate
    CustomTrackRate,
    /// Manual N/S/E/W motion
    Jog,
    PulseGuide,
    /// Reports horizontal coordinates
    Horizontal,
    /// Reports the pier side directly
    PierSide,
    /// One-time homing of an uninitialized controller
    Home,
    SwapButtons,
}

impl Capability {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Goto => "Goto",
            Self::Sync => "Sync",
            Self::Park => "Park",
            Self::Abort => "Abort",
            Self::TrackModes => "Track Modes",
            Self::CustomTrackRate => "Custom Track Rate",
            Self::Jog => "Jog",
            Self::PulseGuide => "Pulse Guide",
            Self::Horizontal => "Horizontal Coordinates",
            Self::PierSide => "Pier Side",
            Self::Home => "Home",
            Self::SwapButtons => "Swap Buttons",
        }
    }
}

/// Factory creating a mount protocol from its `[device.config]` table.
///
/// Factories live for the whole program and must not keep mutable state
/// between builds.
pub trait MountDriverFactory: Send + Sync + 'static {
    /// Value of `driver` in the `[device]` table.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// Check the configuration without touching hardware.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Open the device and return its protocol driver.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn MountProtocol>>>;
}

/// Registered factories keyed by driver type.
#[derive(Default)]
pub struct DriverRegistry {
    factories: BTreeMap<&'static str, Box<dyn MountDriverFactory>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A later factory with the same driver type replaces the earlier one.
    pub fn register_factory<F: MountDriverFactory>(&mut self, factory: F) {
        self.factories.insert(factory.driver_type(), Box::new(factory));
    }

    pub fn factory(&self, driver_type: &str) -> Option<&dyn MountDriverFactory> {
        self.factories.get(driver_type).map(|f| f.as_ref())
    }

    /// Registered driver types, sorted.
    pub fn driver_types(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn validate(&self, driver_type: &str, config: &toml::Value) -> Result<()> {
        self.lookup(driver_type)?.validate(config)
    }

    /// Validate and build a driver.
    pub async fn build(
        &self,
        driver_type: &str,
        config: toml::Value,
    ) -> Result<Arc<dyn MountProtocol>> {
        let factory = self.lookup(driver_type)?;
        factory.validate(&config)?;
        factory.build(config).await
    }

    fn lookup(&self, driver_type: &str) -> Result<&dyn MountDriverFactory> {
        self.factory(driver_type).ok_or_else(|| {
            anyhow!(
                "Unknown mount driver '{}' (available: {})",
                driver_type,
                self.driver_types().join(", ")
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFactory;

    impl MountDriverFactory for NullFactory {
        fn driver_type(&self) -> &'static str {
            "null"
        }

        fn name(&self) -> &'static str {
            "Null Mount"
        }

        fn validate(&self, config: &toml::Value) -> Result<()> {
            if config.get("port").is_none() {
                anyhow::bail!("missing 'port' field");
            }
            Ok(())
        }

        fn build(&self, _config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn MountProtocol>>> {
            Box::pin(async { Err(anyhow!("no hardware")) })
        }
    }

    #[test]
    fn test_capability_name() {
        assert_eq!(Capability::PulseGuide.name(), "Pulse Guide");
        assert_eq!(Capability::Horizontal.name(), "Horizontal Coordinates");
    }

    #[test]
    fn unknown_driver_lists_available() {
        let mut registry = DriverRegistry::new();
        registry.register_factory(NullFactory);

        let config = toml::Value::Table(Default::default());
        let err = registry.validate("lx200", &config).unwrap_err();
        assert!(err.to_string().contains("available: null"));

        let err = registry.validate("null", &config).unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[tokio::test]
    async fn build_validates_first() {
        let mut registry = DriverRegistry::new();
        registry.register_factory(NullFactory);

        let err = registry
            .build("null", toml::Value::Table(Default::default()))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("missing 'port'"));
    }
}
