pub mod config;
pub mod error;
pub mod features;
pub mod io;
pub mod ml;
pub mod table;

pub use config::Config;
pub use error::{FusionError, Result};
pub use ml::{MLConfig, MLPipeline, ScoredBatch, TrainingMetrics};
pub use table::{FeatureTable, Record, Value};
