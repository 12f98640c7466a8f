use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::io::RecordFormat;
use crate::ml::{
    BoostingConfig, DriftConfig, FusionWeights, IsolationConfig, MLConfig, PipelineConfig,
    ValidationConfig,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub fusion: FusionWeights,

    #[serde(default)]
    pub isolation: IsolationConfig,

    #[serde(default)]
    pub boosting: BoostingConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub drift: DriftConfig,

    #[serde(default)]
    pub io: IoConfig,
}

/// Where records and models live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Default input file
    pub input: Option<PathBuf>,
    /// Default output file
    pub output: Option<PathBuf>,
    /// Record format; inferred from the file extension when unset
    pub format: Option<RecordFormat>,
    /// Model bundle directory
    pub model_dir: PathBuf,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            format: None,
            model_dir: PathBuf::from("models"),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/logfusion/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("logfusion/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.fusion.validate()?;
        self.drift.validate()?;

        let threshold = self.pipeline.label_threshold;
        if !threshold.is_finite() {
            anyhow::bail!("label_threshold must be a number, got {}", threshold);
        }
        if !(0.0..=1.0).contains(&threshold) {
            warn!(
                "label_threshold {} is outside [0, 1]; auto-labeling will mark all or no rows",
                threshold
            );
        }
        if self.validation.n_splits < 2 {
            anyhow::bail!("validation.n_splits must be at least 2");
        }
        Ok(())
    }

    /// Engine settings
    pub fn ml(&self) -> MLConfig {
        MLConfig {
            pipeline: self.pipeline.clone(),
            fusion: self.fusion,
            isolation: self.isolation.clone(),
            boosting: self.boosting.clone(),
            validation: self.validation.clone(),
            drift: self.drift.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.pipeline.auto_label);
        assert_eq!(config.fusion.isolation, 0.4);
        assert_eq!(config.io.model_dir, PathBuf::from("models"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [pipeline]
            label_threshold = 0.9

            [io]
            format = "csv"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.pipeline.label_threshold, 0.9);
        assert_eq!(parsed.pipeline.seed, 42);
        assert_eq!(parsed.io.format, Some(RecordFormat::Csv));
        assert_eq!(parsed.boosting, BoostingConfig::default());
    }

    #[test]
    fn test_invalid_weights_rejected_on_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[fusion]\nisolation = 0.9\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_invalid_drift_rejected_on_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[drift]\nmax_buckets = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
        std::fs::write(&path, "[drift]\ndelta = 1.5\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let mut config = Config::default();
        config.drift.delta = 0.01;
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
