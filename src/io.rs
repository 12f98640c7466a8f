//! Record sources and sinks
//!
//! Tables move in and out of the engine through [`RecordSource`] and
//! [`RecordSink`]. File backends cover JSON lines (one object per line) and
//! CSV with a header row. Malformed rows are logged and skipped.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::table::{FeatureTable, Record, Value};

/// On-disk record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    Jsonl,
    Csv,
}

impl RecordFormat {
    /// Guess from the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jsonl" | "ndjson" | "json" => Some(RecordFormat::Jsonl),
            "csv" => Some(RecordFormat::Csv),
            _ => None,
        }
    }

    /// Explicit choice, else the extension, else JSON lines
    pub fn resolve(explicit: Option<Self>, path: &Path) -> Self {
        explicit
            .or_else(|| Self::from_path(path))
            .unwrap_or(RecordFormat::Jsonl)
    }
}

/// Anything that yields a table of records
pub trait RecordSource {
    fn read(&mut self) -> Result<FeatureTable>;
}

/// Anything that accepts a table of records
pub trait RecordSink {
    fn write(&mut self, table: &FeatureTable) -> Result<()>;
}

/// JSON-lines file
#[derive(Debug, Clone)]
pub struct JsonLinesFile {
    path: PathBuf,
}

impl JsonLinesFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl RecordSource for JsonLinesFile {
    fn read(&mut self) -> Result<FeatureTable> {
        let file = File::open(&self.path).with_context(|| format!("Failed to open {:?}", self.path))?;
        let mut table = FeatureTable::default();

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read {:?}", self.path))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(serde_json::Value::Object(map)) => {
                    table.push(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect());
                }
                Ok(_) => warn!("Line {} of {:?} is not a JSON object, skipped", idx + 1, self.path),
                Err(e) => warn!("Line {} of {:?} is not valid JSON: {}", idx + 1, self.path, e),
            }
        }

        info!("Read {} records from {:?}", table.len(), self.path);
        Ok(table)
    }
}

impl RecordSink for JsonLinesFile {
    fn write(&mut self, table: &FeatureTable) -> Result<()> {
        let file = File::create(&self.path).with_context(|| format!("Failed to create {:?}", self.path))?;
        let mut writer = BufWriter::new(file);
        for record in table.records() {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        info!("Wrote {} records to {:?}", table.len(), self.path);
        Ok(())
    }
}

/// CSV file with a header row
#[derive(Debug, Clone)]
pub struct CsvFile {
    path: PathBuf,
}

impl CsvFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl RecordSource for CsvFile {
    fn read(&mut self) -> Result<FeatureTable> {
        let mut reader =
            csv::Reader::from_path(&self.path).with_context(|| format!("Failed to open {:?}", self.path))?;
        let headers: Vec<String> = reader
            .headers()
            .context("Failed to read CSV headers")?
            .iter()
            .map(str::to_string)
            .collect();
        debug!("CSV columns: {:?}", headers);

        let mut table = FeatureTable::default();
        for (idx, row) in reader.records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("Row {} of {:?} skipped: {}", idx + 1, self.path, e);
                    continue;
                }
            };
            let record: Record = headers
                .iter()
                .zip(row.iter())
                .map(|(h, cell)| (h.clone(), Value::parse_cell(cell)))
                .collect();
            table.push(record);
        }

        info!("Read {} records from {:?}", table.len(), self.path);
        Ok(table)
    }
}

impl RecordSink for CsvFile {
    fn write(&mut self, table: &FeatureTable) -> Result<()> {
        let mut writer =
            csv::Writer::from_path(&self.path).with_context(|| format!("Failed to create {:?}", self.path))?;
        let columns = table.columns();
        writer.write_record(&columns)?;
        for record in table.records() {
            writer.write_record(
                columns
                    .iter()
                    .map(|c| record.get(c).map(Value::to_string).unwrap_or_default()),
            )?;
        }
        writer.flush()?;

        info!("Wrote {} records to {:?}", table.len(), self.path);
        Ok(())
    }
}

/// Source for `path` in the resolved format
pub fn open_source(path: &Path, format: Option<RecordFormat>) -> Box<dyn RecordSource> {
    match RecordFormat::resolve(format, path) {
        RecordFormat::Jsonl => Box::new(JsonLinesFile::new(path)),
        RecordFormat::Csv => Box::new(CsvFile::new(path)),
    }
}

/// Sink for `path` in the resolved format
pub fn open_sink(path: &Path, format: Option<RecordFormat>) -> Box<dyn RecordSink> {
    match RecordFormat::resolve(format, path) {
        RecordFormat::Jsonl => Box::new(JsonLinesFile::new(path)),
        RecordFormat::Csv => Box::new(CsvFile::new(path)),
    }
}
