//! Persisted mount settings.
//!
//! The state machine reads [`MountSettings`] at session start and writes them
//! through a [`SettingsStore`] whenever a persisted value changes.

use crate::error::{MountError, MountResult};
use crate::types::{HorizontalPosition, SyncMode, TrackMode, TrackRate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Settings that survive restarts.
///
/// Table-valued fields come last so the TOML serializer can emit them after
/// the plain keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountSettings {
    /// Jog rate table index
    pub move_rate_index: usize,
    /// Slew rate table index
    pub goto_rate_index: usize,
    /// Guide rate table index
    pub guide_rate_index: usize,
    pub parked: bool,
    pub sync_mode: SyncMode,
    pub track_mode: TrackMode,
    pub swap_north_south: bool,
    pub swap_east_west: bool,
    /// Custom park pose, north-referenced. `None` uses the default pose.
    pub park_pose: Option<HorizontalPosition>,
    pub custom_rate: TrackRate,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            move_rate_index: 1,
            goto_rate_index: 0,
            guide_rate_index: 1,
            parked: false,
            sync_mode: SyncMode::Standard,
            track_mode: TrackMode::Sidereal,
            swap_north_south: false,
            swap_east_west: false,
            park_pose: None,
            custom_rate: TrackRate::sidereal(),
        }
    }
}

/// Storage backend for [`MountSettings`].
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> MountResult<MountSettings>;

    fn save(&self, settings: &MountSettings) -> MountResult<()>;
}

/// TOML file store. A missing file loads as defaults.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> MountResult<MountSettings> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No settings file, using defaults");
            return Ok(MountSettings::default());
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            MountError::Persistence(format!("reading {}: {}", self.path.display(), e))
        })?;
        toml::from_str(&text).map_err(|e| {
            MountError::Persistence(format!("parsing {}: {}", self.path.display(), e))
        })
    }

    fn save(&self, settings: &MountSettings) -> MountResult<()> {
        let text = toml::to_string_pretty(settings)
            .map_err(|e| MountError::Persistence(format!("serializing settings: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MountError::Persistence(format!("creating {}: {}", parent.display(), e))
                })?;
            }
        }

        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, text)
            .map_err(|e| MountError::Persistence(format!("writing {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            MountError::Persistence(format!("replacing {}: {}", self.path.display(), e))
        })?;
        debug!(path = %self.path.display(), "Saved mount settings");
        Ok(())
    }
}

/// In-memory store for tests and simulation.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<MountSettings>,
    saves: Mutex<usize>,
}

impl MemorySettingsStore {
    pub fn new(settings: MountSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            saves: Mutex::new(0),
        }
    }

    /// Current stored value.
    pub fn snapshot(&self) -> MountSettings {
        self.settings.lock().clone()
    }

    /// Number of saves so far.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> MountResult<MountSettings> {
        Ok(self.settings.lock().clone())
    }

    fn save(&self, settings: &MountSettings) -> MountResult<()> {
        *self.settings.lock() = settings.clone();
        *self.saves.lock() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let store = TomlSettingsStore::new(dir.path().join("mount.toml"));
        assert_eq!(store.load().unwrap(), MountSettings::default());
    }

    #[test]
    fn toml_store_persists_park_pose() {
        let dir = TempDir::new().unwrap();
        let store = TomlSettingsStore::new(dir.path().join("state").join("mount.toml"));

        let settings = MountSettings {
            parked: true,
            guide_rate_index: 2,
            track_mode: TrackMode::Lunar,
            park_pose: Some(HorizontalPosition::new(180.0, 35.5)),
            ..Default::default()
        };
        store.save(&settings).unwrap();

        assert_eq!(store.load().unwrap(), settings);
        assert!(!dir.path().join("state").join("mount.toml.tmp").exists());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mount.toml");
        std::fs::write(&path, "parked = true\nsync_mode = \"recalibrate\"\n").unwrap();

        let loaded = TomlSettingsStore::new(&path).load().unwrap();
        assert!(loaded.parked);
        assert_eq!(loaded.sync_mode, SyncMode::Recalibrate);
        assert_eq!(loaded.move_rate_index, 1);
    }

    #[test]
    fn corrupt_file_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mount.toml");
        std::fs::write(&path, "parked = maybe").unwrap();
        assert!(matches!(
            TomlSettingsStore::new(&path).load(),
            Err(MountError::Persistence(_))
        ));
    }

    #[test]
    fn memory_store_counts_saves() {
        let store = MemorySettingsStore::default();
        store.save(&MountSettings::default()).unwrap();
        store.save(&MountSettings::default()).unwrap();
        assert_eq!(store.save_count(), 2);
    }
}
