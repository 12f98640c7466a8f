//! Model bundle persistence
//!
//! A bundle is a directory of independently optional artifacts:
//!
//! | File | Contents |
//! |---|---|
//! | `isolation_forest.bin` | isolation ensemble (bincode) |
//! | `scaler.bin` | per-column statistics (bincode) |
//! | `booster.json` | boosted-tree dump |
//! | `booster_meta.json` | ordered training columns of the booster |
//! | `metadata.json` | training metrics and provenance |
//!
//! Loading never fails as a whole: each artifact comes back as present,
//! missing or corrupt, and the pipeline decides what it can still do.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::models::{BoosterDump, IsolationForest};
use super::refiner::TrainingMetrics;
use super::scaler::Scaler;

pub const ISOLATION_FILE: &str = "isolation_forest.bin";
pub const SCALER_FILE: &str = "scaler.bin";
pub const BOOSTER_FILE: &str = "booster.json";
pub const BOOSTER_META_FILE: &str = "booster_meta.json";
pub const METADATA_FILE: &str = "metadata.json";

/// Load state of one bundle artifact
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact<T> {
    Present(T),
    Missing,
    /// File exists but could not be decoded
    Corrupt(String),
}

impl<T> Artifact<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Artifact::Present(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Artifact::Present(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Artifact::Present(value) => Some(value),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Artifact::Present(_) => "present",
            Artifact::Missing => "missing",
            Artifact::Corrupt(_) => "corrupt",
        }
    }
}

impl<T> From<Option<T>> for Artifact<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Artifact::Missing, Artifact::Present)
    }
}

/// Boosted-tree metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterMeta {
    pub feature_columns: Vec<String>,
}

/// Training metrics plus provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    #[serde(flatten)]
    pub metrics: TrainingMetrics,
    pub trained_at: DateTime<Utc>,
    /// Crate version that produced the bundle
    pub version: String,
    pub host_id: String,
    pub feature_columns: Vec<String>,
    pub rows: usize,
    pub positives: usize,
}

impl TrainingMetadata {
    pub fn new(metrics: TrainingMetrics, feature_columns: Vec<String>, rows: usize, positives: usize) -> Self {
        Self {
            metrics,
            trained_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host_id: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            feature_columns,
            rows,
            positives,
        }
    }
}

/// In-memory bundle with per-artifact state
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub isolation: Artifact<IsolationForest>,
    pub scaler: Artifact<Scaler>,
    pub booster: Artifact<BoosterDump>,
    pub booster_meta: Artifact<BoosterMeta>,
    pub metadata: Artifact<TrainingMetadata>,
}

impl Default for ModelBundle {
    fn default() -> Self {
        Self {
            isolation: Artifact::Missing,
            scaler: Artifact::Missing,
            booster: Artifact::Missing,
            booster_meta: Artifact::Missing,
            metadata: Artifact::Missing,
        }
    }
}

impl ModelBundle {
    /// Nothing usable was found
    pub fn is_empty(&self) -> bool {
        !(self.isolation.is_present()
            || self.scaler.is_present()
            || self.booster.is_present()
            || self.booster_meta.is_present()
            || self.metadata.is_present())
    }

    /// Training columns: booster metadata first, then the booster itself,
    /// then training metadata, then the forest and scaler fit columns
    pub fn feature_columns(&self) -> Option<Vec<String>> {
        self.booster_meta
            .get()
            .map(|m| m.feature_columns.clone())
            .or_else(|| self.booster.get().map(|b| b.feature_names().to_vec()))
            .or_else(|| self.metadata.get().map(|m| m.feature_columns.clone()))
            .or_else(|| self.isolation.get().map(|f| f.feature_names().to_vec()))
            .or_else(|| self.scaler.get().map(|s| s.feature_names().to_vec()))
    }

    /// (file name, status) for every artifact
    pub fn summary(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            (ISOLATION_FILE, self.isolation.status()),
            (SCALER_FILE, self.scaler.status()),
            (BOOSTER_FILE, self.booster.status()),
            (BOOSTER_META_FILE, self.booster_meta.status()),
            (METADATA_FILE, self.metadata.status()),
        ]
    }
}

/// Reads and writes bundles under one directory
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Write every present artifact. Absent ones leave no file behind, so a
    /// stale artifact from an earlier run cannot be mixed into this bundle.
    pub fn save(&self, bundle: &ModelBundle) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create model directory {:?}", self.dir))?;

        match bundle.isolation.get() {
            Some(forest) => self.write_bincode(ISOLATION_FILE, forest)?,
            None => self.remove(ISOLATION_FILE)?,
        }
        match bundle.scaler.get() {
            Some(scaler) => self.write_bincode(SCALER_FILE, scaler)?,
            None => self.remove(SCALER_FILE)?,
        }
        match bundle.booster.get() {
            Some(dump) => {
                let text = dump.to_json()?;
                let path = self.path(BOOSTER_FILE);
                fs::write(&path, text).with_context(|| format!("Failed to write {:?}", path))?;
                info!("Saved {} ({} trees)", BOOSTER_FILE, dump.num_trees());
            }
            None => self.remove(BOOSTER_FILE)?,
        }
        match bundle.booster_meta.get() {
            Some(meta) => self.write_json(BOOSTER_META_FILE, meta)?,
            None => self.remove(BOOSTER_META_FILE)?,
        }
        match bundle.metadata.get() {
            Some(metadata) => self.write_json(METADATA_FILE, metadata)?,
            None => self.remove(METADATA_FILE)?,
        }

        info!("Saved model bundle to {:?}", self.dir);
        Ok(())
    }

    /// Read whatever artifacts exist; never fails as a whole
    pub fn load(&self) -> ModelBundle {
        let bundle = ModelBundle {
            isolation: self.read_artifact(ISOLATION_FILE, |path| self.read_bincode(path)),
            scaler: self.read_artifact(SCALER_FILE, |path| self.read_bincode(path)),
            booster: self.read_artifact(BOOSTER_FILE, |path| {
                let text = fs::read_to_string(path)?;
                Ok(BoosterDump::from_json(&text)?)
            }),
            booster_meta: self.read_artifact(BOOSTER_META_FILE, |path| self.read_json(path)),
            metadata: self.read_artifact(METADATA_FILE, |path| self.read_json(path)),
        };

        if bundle.is_empty() {
            info!("No model artifacts found in {:?}", self.dir);
        }
        bundle
    }

    fn read_artifact<T>(&self, file: &str, read: impl FnOnce(&Path) -> anyhow::Result<T>) -> Artifact<T> {
        let path = self.path(file);
        if !path.exists() {
            debug!("Artifact {} not present in {:?}", file, self.dir);
            return Artifact::Missing;
        }

        match read(&path) {
            Ok(value) => {
                info!("Loaded {} from {:?}", file, self.dir);
                Artifact::Present(value)
            }
            Err(e) => {
                warn!("Failed to load {:?}: {:#}", path, e);
                Artifact::Corrupt(format!("{:#}", e))
            }
        }
    }

    fn write_bincode<T: Serialize>(&self, file: &str, value: &T) -> anyhow::Result<()> {
        let path = self.path(file);
        let out = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
        let mut writer = BufWriter::new(out);
        bincode::serde::encode_into_std_write(value, &mut writer, bincode::config::standard())
            .with_context(|| format!("Failed to encode {}", file))?;
        info!("Saved {}", file);
        Ok(())
    }

    fn read_bincode<T: DeserializeOwned>(&self, path: &Path) -> anyhow::Result<T> {
        let mut reader = BufReader::new(File::open(path)?);
        let value = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;
        Ok(value)
    }

    fn write_json<T: Serialize>(&self, file: &str, value: &T) -> anyhow::Result<()> {
        let path = self.path(file);
        let content = serde_json::to_string_pretty(value)?;
        fs::write(&path, content).with_context(|| format!("Failed to write {:?}", path))?;
        info!("Saved {}", file);
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> anyhow::Result<T> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn remove(&self, file: &str) -> anyhow::Result<()> {
        let path = self.path(file);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("Failed to remove stale {:?}", path))?;
            debug!("Removed stale {}", file);
        }
        Ok(())
    }
}
