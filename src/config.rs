//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (default `config/mount.toml`)
//! 2. environment variables prefixed with `RUST_MOUNT_`, nested keys separated by `__`
//!
//! # Example
//! ```no_run
//! use rust_mount::config::MountConfig;
//!
//! let config = MountConfig::load()?;
//! println!("Driver: {}", config.device.driver);
//! # Ok::<(), figment::Error>(())
//! ```
//!
//! `RUST_MOUNT_DEVICE__PORT=/dev/ttyUSB1` overrides `[device] port`.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use mount_core::types::ObserverLocation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/mount.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Controller selection and driver options
    pub device: DeviceConfig,
    /// Observing site; without it the mount is not initialized at startup
    #[serde(default)]
    pub site: Option<SiteConfig>,
    /// Position poll cadence in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Per-axis settle tolerance (0 = exact equality between polls)
    #[serde(default)]
    pub settle_tolerance: f64,
    /// File holding persisted mount settings
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Controller selection.
///
/// Every key besides `driver` is handed to the driver factory unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Driver type (e.g., "astrophysics", "pmc8")
    pub driver: String,
    /// Driver-specific options (port, baud_rate, timeout_ms, simulate, ...)
    #[serde(flatten)]
    pub options: BTreeMap<String, toml::Value>,
}

impl DeviceConfig {
    /// Options as the TOML table the driver factory expects.
    pub fn driver_config(&self) -> toml::Value {
        toml::Value::Table(self.options.clone().into_iter().collect())
    }

    /// Force the built-in simulator.
    pub fn set_simulate(&mut self, simulate: bool) {
        self.options
            .insert("simulate".to_string(), toml::Value::Boolean(simulate));
    }
}

/// Observing site
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Degrees, north positive
    pub latitude: f64,
    /// Degrees, east positive
    pub longitude: f64,
    /// Metres
    #[serde(default)]
    pub elevation: f64,
    /// Local time offset from UTC in hours, east positive
    #[serde(default)]
    pub utc_offset_hours: f64,
}

impl SiteConfig {
    pub fn observer(&self) -> ObserverLocation {
        ObserverLocation::new(self.latitude, self.longitude, self.elevation)
    }
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_state_file() -> PathBuf {
    PathBuf::from("mount_state.toml")
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl MountConfig {
    /// Load configuration from `config/mount.toml` and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RUST_MOUNT_").split("__"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate configuration after loading
    ///
    /// `drivers` lists the driver types linked into the binary.
    pub fn validate(&self, drivers: &[&str]) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if !drivers.contains(&self.device.driver.as_str()) {
            return Err(format!(
                "Unknown driver '{}'. Must be one of: {}",
                self.device.driver,
                drivers.join(", ")
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be positive".to_string());
        }

        if !self.settle_tolerance.is_finite() || self.settle_tolerance < 0.0 {
            return Err(format!(
                "Invalid settle_tolerance {}. Must be a non-negative number",
                self.settle_tolerance
            ));
        }

        if let Some(site) = &self.site {
            site.observer().validate().map_err(|e| e.to_string())?;
            if !site.utc_offset_hours.is_finite() || site.utc_offset_hours.abs() > 14.0 {
                return Err(format!(
                    "Invalid utc_offset_hours {}. Must be within -14..14",
                    site.utc_offset_hours
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DRIVERS: &[&str] = &["astrophysics", "pmc8"];

    fn config() -> MountConfig {
        MountConfig {
            application: ApplicationConfig {
                name: "Test".to_string(),
                log_level: "info".to_string(),
                log_format: "pretty".to_string(),
            },
            device: DeviceConfig {
                driver: "pmc8".to_string(),
                options: BTreeMap::new(),
            },
            site: Some(SiteConfig {
                latitude: 40.0,
                longitude: -110.0,
                elevation: 1500.0,
                utc_offset_hours: -7.0,
            }),
            poll_interval_ms: 1000,
            settle_tolerance: 0.0,
            state_file: PathBuf::from("mount_state.toml"),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate(DRIVERS).is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let mut c = config();
        c.application.log_level = "loud".to_string();
        assert!(c.validate(DRIVERS).is_err());

        let mut c = config();
        c.device.driver = "celestron".to_string();
        let err = c.validate(DRIVERS).unwrap_err();
        assert!(err.contains("astrophysics, pmc8"));

        let mut c = config();
        c.poll_interval_ms = 0;
        assert!(c.validate(DRIVERS).is_err());

        let mut c = config();
        c.settle_tolerance = -1.0;
        assert!(c.validate(DRIVERS).is_err());

        let mut c = config();
        c.site = Some(SiteConfig {
            latitude: 95.0,
            longitude: 0.0,
            elevation: 0.0,
            utc_offset_hours: 0.0,
        });
        assert!(c.validate(DRIVERS).is_err());
    }

    #[test]
    fn test_load_from_file_passes_driver_options() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
poll_interval_ms = 500

[application]
name = "Observatory"
log_level = "debug"

[device]
driver = "astrophysics"
port = "/dev/ttyUSB0"
baud_rate = 19200
park_mode = "equatorial"

[site]
latitude = 40.0
longitude = 250.0
"#
        )
        .unwrap();

        let config = MountConfig::load_from(file.path()).unwrap();
        assert!(config.validate(DRIVERS).is_ok());
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.application.log_format, "pretty");
        assert_eq!(config.state_file, PathBuf::from("mount_state.toml"));

        let mut device = config.device.clone();
        device.set_simulate(true);
        let table = device.driver_config();
        assert_eq!(table.get("port").and_then(|v| v.as_str()), Some("/dev/ttyUSB0"));
        assert_eq!(table.get("baud_rate").and_then(|v| v.as_integer()), Some(19200));
        assert_eq!(table.get("simulate").and_then(|v| v.as_bool()), Some(true));
        assert!(table.get("driver").is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "mount.toml",
                r#"
[application]
name = "Observatory"
log_level = "info"

[device]
driver = "pmc8"
port = "/dev/ttyACM0"
"#,
            )?;
            jail.set_env("RUST_MOUNT_DEVICE__PORT", "/dev/ttyACM1");
            jail.set_env("RUST_MOUNT_APPLICATION__LOG_LEVEL", "warn");

            let config = MountConfig::load_from("mount.toml")?;
            assert_eq!(config.application.log_level, "warn");
            assert_eq!(
                config.device.options.get("port").and_then(|v| v.as_str()),
                Some("/dev/ttyACM1")
            );
            Ok(())
        });
    }
}
