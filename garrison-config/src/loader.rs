use std::path::Path;

use tracing::{debug, warn};

use crate::env::EnvOverlay;
use crate::error::{ConfigError, Result};
use crate::model::GarrisonConfig;

/// Loads [`GarrisonConfig`] from defaults, an optional TOML file, and the
/// process environment, in that priority order (later wins).
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration, optionally layering a TOML file on top of
    /// built-in defaults before applying environment overrides.
    pub fn load(file_path: Option<&Path>) -> Result<GarrisonConfig> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&GarrisonConfig::default())?);

        if let Some(path) = file_path {
            if path.exists() {
                debug!(path = %path.display(), "loading garrison config file");
                builder = builder.add_source(config::File::from(path));
            } else {
                warn!(path = %path.display(), "configured config file does not exist, skipping");
            }
        }

        let merged: GarrisonConfig = builder.build()?.try_deserialize()?;
        let overridden = apply_env_overlay(merged, EnvOverlay::gather());
        validate(&overridden)?;
        Ok(overridden)
    }

    /// Load using only built-in defaults plus environment overrides (no file).
    pub fn load_from_env() -> Result<GarrisonConfig> {
        Self::load(None)
    }
}

fn apply_env_overlay(mut cfg: GarrisonConfig, overlay: EnvOverlay) -> GarrisonConfig {
    if let Some(v) = overlay.event_store_capacity {
        cfg.event_store_capacity = v;
    }
    if let Some(v) = overlay.event_store_ttl_secs {
        cfg.event_store_ttl_secs = v;
    }
    if let Some(v) = overlay.backoff_cap_secs {
        cfg.backoff_cap_secs = v;
    }
    if let Some(v) = overlay.health_probe_timeout_secs {
        cfg.health_probe_timeout_secs = v;
    }
    if let Some(v) = overlay.redis_url {
        cfg.redis_url = Some(v);
    }
    if let Some(v) = overlay.tracing_filter {
        cfg.tracing_filter = v;
    }
    cfg
}

fn validate(cfg: &GarrisonConfig) -> Result<()> {
    if cfg.event_store_capacity == 0 {
        return Err(ConfigError::Invalid {
            field: "event_store_capacity",
            reason: "must be greater than zero".to_string(),
        });
    }
    if cfg.backoff_cap_secs == 0 {
        return Err(ConfigError::Invalid {
            field: "backoff_cap_secs",
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_and_validate() {
        let cfg = ConfigLoader::load(None).expect("defaults must validate");
        assert_eq!(cfg.event_store_capacity, 4096);
        assert_eq!(cfg.event_store_ttl_secs, 300);
        assert_eq!(cfg.backoff_cap_secs, 60);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garrison.toml");
        std::fs::write(&path, "event_store_capacity = 8192\n").unwrap();

        let cfg = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(cfg.event_store_capacity, 8192);
        assert_eq!(cfg.event_store_ttl_secs, 300);
    }

    #[test]
    fn rejects_zero_backoff_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garrison.toml");
        std::fs::write(&path, "backoff_cap_secs = 0\n").unwrap();

        let result = ConfigLoader::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "backoff_cap_secs"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ConfigLoader::load(Some(Path::new("/nonexistent/garrison.toml"))).unwrap();
        assert_eq!(cfg, GarrisonConfig::default());
    }
}
