use std::{
    fs::File,
    io::ErrorKind,
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{checkin::DEFAULT_STATE, error::Result, locks::LockBreakPolicy};

/// Store-wide settings, kept as JSON. Every field has a default, so a
/// partial (or missing) file is fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub lock_break_policy: LockBreakPolicy,
    /// State given to new revisions.
    pub default_state: String,
    /// Link identical hard-linked working files instead of writing each.
    pub hardlinks: bool,
    pub temp_prefix: String,
    pub temp_suffix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            lock_break_policy: LockBreakPolicy::default(),
            default_state: DEFAULT_STATE.to_string(),
            hardlinks: false,
            temp_prefix: String::from(","),
            temp_suffix: String::from(","),
        }
    }
}

impl StoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        match File::options().read(true).open(path) {
            Ok(file) => Ok(serde_json::from_reader(file)?),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::debug!("no config at {:?}, using defaults", path);
                Ok(StoreConfig::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        Ok(serde_json::to_writer_pretty(
            File::options()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
            self,
        )?)
    }
}

#[test]
fn test_missing_file_means_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::load(&dir.path().join("rcs.json")).unwrap();
    assert_eq!(config, StoreConfig::default());
    assert_eq!(config.default_state, "Exp");
    assert_eq!(config.lock_break_policy, LockBreakPolicy::BreakAndNotify);
}

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rcs.json");
    let config = StoreConfig {
        lock_break_policy: LockBreakPolicy::Refuse,
        hardlinks: true,
        ..StoreConfig::default()
    };
    config.save(&path).unwrap();
    assert_eq!(StoreConfig::load(&path).unwrap(), config);
}

#[test]
fn test_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rcs.json");
    std::fs::write(&path, r#"{ "lock_break_policy": "refuse" }"#).unwrap();
    let config = StoreConfig::load(&path).unwrap();
    assert_eq!(config.lock_break_policy, LockBreakPolicy::Refuse);
    assert_eq!(config.temp_prefix, ",");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        StoreConfig::load(&path),
        Err(crate::error::Error::Serde(_))
    ));
}
