//! Process configuration, resolved once from the environment.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::error::StoreError;

const DEFAULT_NUM_BACKUPS: u32 = 10;
const DEFAULT_PARALLEL: usize = 16;

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn flag_is_enabled(&self, key: &str) -> bool {
        matches!(self.vars.get(key).map(String::as_str), Some("1" | "true"))
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Base path of the store, without slot suffix or compressor extension.
    pub series_db: PathBuf,
    /// Backup rotation depth.
    pub num_backups: u32,
    /// Width of the catalog client's worker pool.
    pub parallel: usize,
    /// Store snapshots uncompressed when false (`EPM_NO_COMPRESS`).
    pub compression: bool,
    pub api_key: Option<String>,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if no store path can be resolved.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self, StoreError> {
        let series_db = match snapshot.var("EPM_SERIES_DB") {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => dirs_next::data_dir()
                .map(|base| base.join("episode-manager").join("series-db"))
                .ok_or_else(|| StoreError::InvalidPath("no data directory".into()))?,
        };

        let num_backups = snapshot
            .var("EPM_NUM_BACKUPS")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_NUM_BACKUPS);

        let parallel = snapshot
            .var("EPM_PARALLEL")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_PARALLEL)
            .max(1);

        Ok(Self {
            series_db,
            num_backups,
            parallel,
            compression: !snapshot.flag_is_enabled("EPM_NO_COMPRESS"),
            api_key: snapshot
                .var("TMDB_API_KEY")
                .filter(|key| !key.is_empty())
                .map(ToOwned::to_owned),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_apply() {
        let snapshot = EnvSnapshot::testing(&[
            ("EPM_SERIES_DB", "/tmp/series-db"),
            ("EPM_NUM_BACKUPS", "3"),
            ("EPM_PARALLEL", "0"),
            ("EPM_NO_COMPRESS", "1"),
        ]);
        let config = Config::from_snapshot(&snapshot).unwrap();
        assert_eq!(config.series_db, PathBuf::from("/tmp/series-db"));
        assert_eq!(config.num_backups, 3);
        assert_eq!(config.parallel, 1);
        assert!(!config.compression);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn defaults_are_sensible() {
        let snapshot = EnvSnapshot::testing(&[("EPM_SERIES_DB", "/tmp/series-db")]);
        let config = Config::from_snapshot(&snapshot).unwrap();
        assert_eq!(config.num_backups, DEFAULT_NUM_BACKUPS);
        assert_eq!(config.parallel, DEFAULT_PARALLEL);
        assert!(config.compression);
    }
}
