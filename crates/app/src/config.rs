use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use trimatch_core::ToleranceConfig;
use trimatch_ingest::AugmentConfig;

const DEFAULT_CONFIG_FILE: &str = "trimatch.toml";
const DEFAULT_DB_FILE: &str = "trimatch.db";

/// Process configuration: matching tolerances plus the optional augmentation
/// collaborator. Loaded once at startup and handed to the pipeline and the
/// engine by value — there is no global mutable state to reach for.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tolerances: ToleranceConfig,
    /// Absent section = deterministic extraction only.
    pub augment: Option<AugmentConfig>,
    pub db_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load from an explicit path, falling back to `trimatch.toml` in the
    /// working directory, falling back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                fallback.exists().then_some(fallback)
            }
        };
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.tolerances.validate()?;
        Ok(config)
    }

    pub fn db_path(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.db_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load(Some(Path::new("/nonexistent/trimatch.toml")));
        assert!(config.is_err()); // explicit path must exist

        // No path at all is fine.
        let config = AppConfig::load(None).unwrap();
        assert!(config.augment.is_none());
        assert_eq!(config.tolerances.price_tolerance_pct, Decimal::new(2, 2));
    }

    #[test]
    fn parses_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trimatch.toml");
        std::fs::write(
            &path,
            r#"
            db_path = "/tmp/procurement.db"

            [tolerances]
            qty_tolerance_units = "2"
            price_tolerance_pct = "0.05"

            [tolerances.fx_rates]
            USD = "1.0"
            EUR = "1.10"

            [augment]
            endpoint = "http://localhost:11434/v1/chat/completions"
            model = "llama3"
            timeout_secs = 5
            "#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.tolerances.qty_tolerance_units, Decimal::TWO);
        assert_eq!(config.tolerances.rate("EUR"), Some(Decimal::new(110, 2)));
        let augment = config.augment.as_ref().unwrap();
        assert_eq!(augment.model, "llama3");
        assert_eq!(augment.timeout_secs, 5);
        assert_eq!(
            config.db_path(None),
            PathBuf::from("/tmp/procurement.db")
        );
    }

    #[test]
    fn cli_override_beats_config_db_path() {
        let config = AppConfig {
            db_path: Some(PathBuf::from("/a.db")),
            ..Default::default()
        };
        assert_eq!(config.db_path(Some(Path::new("/b.db"))), PathBuf::from("/b.db"));
        assert_eq!(config.db_path(None), PathBuf::from("/a.db"));
    }

    #[test]
    fn invalid_tolerances_are_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trimatch.toml");
        std::fs::write(&path, "[tolerances]\nqty_tolerance_units = \"-1\"\n").unwrap();
        assert!(AppConfig::load(Some(&path)).is_err());
    }
}
