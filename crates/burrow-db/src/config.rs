use std::path::PathBuf;
use std::time::Duration;

use burrow_crypto::KDF_ITERATIONS;
use directories::ProjectDirs;

use crate::error::{Result, StoreError};

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "burrow";
pub const APP_NAME: &str = "burrow";

pub const DEFAULT_DB_FILE: &str = "messages.db";
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Everything needed to open a store.
#[derive(Clone)]
pub struct StoreConfig {
    /// Passphrase for the store. Must be non-empty.
    pub key: String,
    /// Store file. `None` resolves to the platform data directory.
    pub db_path: Option<PathBuf>,
    /// Use SQLCipher for the whole file when this build supports it.
    pub prefer_whole_store: bool,
    /// Age limit for the retention sweep. `None` disables it.
    pub retention_days: Option<u32>,
    /// Cadence of the expiry/retention sweep loop. `None` disables the loop.
    pub sweep_interval: Option<Duration>,
    /// PBKDF2 rounds for a store created by this open. Existing stores keep
    /// the count they were created with.
    pub kdf_iterations: u32,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("key", &"<redacted>")
            .field("db_path", &self.db_path)
            .field("prefer_whole_store", &self.prefer_whole_store)
            .field("retention_days", &self.retention_days)
            .field("sweep_interval", &self.sweep_interval)
            .field("kdf_iterations", &self.kdf_iterations)
            .finish()
    }
}

impl StoreConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            db_path: None,
            prefer_whole_store: true,
            retention_days: None,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
            kdf_iterations: KDF_ITERATIONS,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Read configuration from `BURROW_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`StoreConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = lookup("BURROW_KEY").unwrap_or_default();
        let mut config = Self::new(key);

        config.db_path = lookup("BURROW_DB_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        if let Some(raw) = lookup("BURROW_RETENTION_DAYS").filter(|v| !v.is_empty()) {
            let days = raw.parse::<u32>().map_err(|_| {
                StoreError::Configuration(format!("BURROW_RETENTION_DAYS is not a number: {}", raw))
            })?;
            config.retention_days = Some(days);
        }

        if let Some(raw) = lookup("BURROW_SWEEP_SECS").filter(|v| !v.is_empty()) {
            let secs = raw.parse::<u64>().map_err(|_| {
                StoreError::Configuration(format!("BURROW_SWEEP_SECS is not a number: {}", raw))
            })?;
            // 0 turns the loop off
            config.sweep_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(raw) = lookup("BURROW_WHOLE_STORE") {
            config.prefer_whole_store = !matches!(raw.as_str(), "0" | "false" | "no" | "off");
        }

        Ok(config)
    }

    /// Check the configuration and resolve the store path.
    pub(crate) fn resolve_path(&self) -> Result<PathBuf> {
        if self.key.is_empty() {
            return Err(StoreError::Configuration(
                "store requires a non-empty key".into(),
            ));
        }
        if self.kdf_iterations == 0 {
            return Err(StoreError::Configuration(
                "kdf_iterations must be positive".into(),
            ));
        }
        if self.sweep_interval.is_some_and(|every| every.is_zero()) {
            return Err(StoreError::Configuration(
                "sweep_interval must be positive; use None to disable".into(),
            ));
        }

        let path = match &self.db_path {
            Some(path) => path.clone(),
            None => default_db_path()?,
        };
        if path.as_os_str().is_empty() || path.is_dir() {
            return Err(StoreError::Configuration(format!(
                "invalid store path: {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or_else(|| {
        StoreError::Configuration("cannot determine data directory".into())
    })?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn default_db_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(DEFAULT_DB_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn env_values_are_applied() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("BURROW_KEY", "k"),
            ("BURROW_DB_PATH", "/tmp/burrow-test/messages.db"),
            ("BURROW_RETENTION_DAYS", "30"),
            ("BURROW_SWEEP_SECS", "0"),
            ("BURROW_WHOLE_STORE", "false"),
        ]))
        .unwrap();

        assert_eq!(config.key, "k");
        assert_eq!(
            config.db_path.as_deref(),
            Some(std::path::Path::new("/tmp/burrow-test/messages.db"))
        );
        assert_eq!(config.retention_days, Some(30));
        assert!(config.sweep_interval.is_none());
        assert!(!config.prefer_whole_store);
    }

    #[test]
    fn bad_retention_is_a_configuration_error() {
        let err = StoreConfig::from_lookup(lookup(&[("BURROW_RETENTION_DAYS", "soon")])).unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = StoreConfig::new("").with_path("/tmp/x.db").resolve_path().unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let mut config = StoreConfig::new("k").with_path("/tmp/x.db");
        config.sweep_interval = Some(Duration::ZERO);
        let err = config.resolve_path().unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[test]
    fn directory_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoreConfig::new("k").with_path(dir.path()).resolve_path().unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[test]
    fn debug_output_hides_the_key() {
        let rendered = format!("{:?}", StoreConfig::new("very-secret"));
        assert!(!rendered.contains("very-secret"));
    }
}
