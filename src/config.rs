use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::predicate::Predicate;
use crate::storage::Location;
use crate::store::StoreOptions;
use crate::{Error, Result};

/// Outdate rule for JSON records: a record is outdated when the value at
/// `pointer` equals `equals`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub pointer: String,
    pub equals: Value,
}

impl FieldMatch {
    pub fn new(pointer: impl Into<String>, equals: Value) -> Result<Self> {
        let rule = Self {
            pointer: pointer.into(),
            equals,
        };
        rule.validate()?;
        Ok(rule)
    }

    fn validate(&self) -> Result<()> {
        if !self.pointer.is_empty() && !self.pointer.starts_with('/') {
            return Err(Error::Config(format!(
                "JSON pointer must be empty or start with '/': {:?}",
                self.pointer
            )));
        }
        Ok(())
    }

    pub fn to_predicate(&self) -> Predicate<Value> {
        let FieldMatch { pointer, equals } = self.clone();
        Predicate::new(move |record: &Value| record.pointer(&pointer) == Some(&equals))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StoreConfig {
    /// Database file, or `:memory:`; absent means in-memory
    pub path: Option<PathBuf>,
    /// Minimum seconds between automatic sweeps
    pub timing_secs: Option<f64>,
    pub outdate: Option<FieldMatch>,
}

impl StoreConfig {
    pub fn location(&self) -> Location {
        match &self.path {
            Some(path) => Location::from_path(path),
            None => Location::Memory,
        }
    }

    pub fn timing(&self) -> Result<Option<Duration>> {
        let Some(secs) = self.timing_secs else {
            return Ok(None);
        };
        if !(secs.is_finite() && secs > 0.0) {
            return Err(Error::Config(format!("timing_secs must be positive, got {}", secs)));
        }
        Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|e| Error::Config(format!("timing_secs out of range: {}", e)))
    }

    /// Options for a store of JSON records
    pub fn options(&self) -> Result<StoreOptions<Value>> {
        let mut options = StoreOptions::new();
        if let Some(rule) = &self.outdate {
            rule.validate()?;
            options = options.outdate(rule.to_predicate());
        }
        if let Some(timing) = self.timing()? {
            options = options.timing(timing);
        }
        Ok(options)
    }

    /// Options for a store that serves a single operation and is dropped.
    ///
    /// The first operation of a timed store only arms its deadline, so a
    /// short-lived store would never sweep. The timing is dropped and the
    /// outdate rule runs before the operation instead.
    pub fn one_shot_options(&self) -> Result<StoreOptions<Value>> {
        let mut options = self.options()?;
        if let Some(timing) = options.timing.take() {
            if options.outdate.is_some() {
                tracing::warn!(
                    ?timing,
                    "Ignoring timing_secs for a single operation; sweeping outdated records now"
                );
            }
        }
        Ok(options)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("recstore.toml")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<StoreConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: StoreConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &StoreConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, RecordStore, SqliteStore};
    use serde_json::json;

    #[test]
    fn test_parse_toml() {
        let config: StoreConfig = toml::from_str(
            r#"
            path = "cache/records.db"
            timing_secs = 2.5

            [outdate]
            pointer = "/a"
            equals = "invalid"
            "#,
        )
        .unwrap();

        assert_eq!(config.location(), Location::File(PathBuf::from("cache/records.db")));
        assert_eq!(config.timing().unwrap(), Some(Duration::from_millis(2500)));

        let outdated = config.outdate.as_ref().unwrap().to_predicate();
        assert!(outdated.test(&json!({"a": "invalid", "b": 3})));
        assert!(!outdated.test(&json!({"a": 12, "b": 3})));
        assert!(!outdated.test(&json!({"b": 3})));
    }

    #[test]
    fn test_defaults_to_memory() {
        let config = StoreConfig::default();
        assert_eq!(config.location(), Location::Memory);
        assert_eq!(config.timing().unwrap(), None);

        let sentinel = StoreConfig {
            path: Some(PathBuf::from(":memory:")),
            ..Default::default()
        };
        assert_eq!(sentinel.location(), Location::Memory);
    }

    #[test]
    fn test_invalid_timing() {
        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = StoreConfig {
                timing_secs: Some(secs),
                ..Default::default()
            };
            assert!(matches!(config.timing(), Err(Error::Config(_))), "{secs}");
        }
    }

    #[test]
    fn test_oversized_timing_rejected_at_open() {
        let config = StoreConfig {
            timing_secs: Some(1.5e19),
            outdate: Some(FieldMatch::new("/stale", json!(true)).unwrap()),
            ..Default::default()
        };
        let options = config.options().unwrap();
        assert!(matches!(MemoryStore::with_options(options), Err(Error::Config(_))));
        assert!(matches!(
            SqliteStore::<Value>::open(Location::Memory, config.options().unwrap()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_one_shot_options_sweep_first_operation() {
        let config = StoreConfig {
            timing_secs: Some(60.0),
            outdate: Some(FieldMatch::new("/stale", json!(true)).unwrap()),
            ..Default::default()
        };
        let seed = vec![json!({"id": 1, "stale": true}), json!({"id": 2})];

        // A timed store only arms its deadline on the first call
        let timed =
            SqliteStore::<Value>::open(Location::Memory, config.options().unwrap()).unwrap();
        timed.add(seed.clone()).unwrap();
        assert_eq!(timed.len().unwrap(), 2);

        let options = config.one_shot_options().unwrap();
        assert!(options.timing.is_none());
        let store = SqliteStore::<Value>::open(Location::Memory, options).unwrap();
        store.add(seed).unwrap();
        assert_eq!(store.filter(None).unwrap(), vec![json!({"id": 2})]);
    }

    #[test]
    fn test_invalid_pointer() {
        assert!(matches!(FieldMatch::new("status", json!(1)), Err(Error::Config(_))));
        assert!(FieldMatch::new("/status", json!(1)).is_ok());
    }

    #[test]
    fn test_load_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recstore.toml");
        assert!(load_config(Some(&path)).unwrap().is_none());

        let config = StoreConfig {
            path: Some(PathBuf::from("records.db")),
            timing_secs: Some(1.0),
            outdate: Some(FieldMatch::new("/stale", json!(true)).unwrap()),
        };
        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &config, true).unwrap();

        assert_eq!(load_config(Some(&path)).unwrap(), Some(config));
    }

    #[test]
    fn test_ensure_db_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("a").join("b").join("records.db");
        ensure_db_dir(&db).unwrap();
        assert!(db.parent().unwrap().is_dir());
        ensure_db_dir(Path::new("records.db")).unwrap();
    }
}
