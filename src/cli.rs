use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

use logfusion::config::Config;
use logfusion::features;
use logfusion::io::{open_sink, open_source, RecordFormat};
use logfusion::ml::{MLPipeline, ModelStore, ScoredBatch, TrainingMetadata};
use logfusion::table::FeatureTable;

#[derive(Parser)]
#[command(name = "logfusion")]
#[command(author, version, about = "Hybrid anomaly scoring for enriched log records")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Normalize raw log events and add feature columns
    Enrich {
        /// Raw events (JSON lines or CSV)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Where to write enriched records
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Record format, overriding the file extension
        #[arg(short, long, value_parser = parse_format)]
        format: Option<RecordFormat>,
    },

    /// Train the models and save a bundle
    Train {
        /// Training records
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Bundle directory
        #[arg(short, long)]
        model_dir: Option<PathBuf>,

        /// Skip supervised refinement when the input has no label column
        #[arg(long)]
        no_auto_label: bool,

        /// Isolation score at or above which rows are auto-labeled anomalous
        #[arg(long)]
        label_threshold: Option<f64>,

        /// Enrich raw events before training
        #[arg(long)]
        enrich: bool,

        /// Record format, overriding the file extension
        #[arg(short, long, value_parser = parse_format)]
        format: Option<RecordFormat>,
    },

    /// Score records with a saved bundle
    Predict {
        /// Records to score
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Where to write scored records
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Bundle directory
        #[arg(short, long)]
        model_dir: Option<PathBuf>,

        /// Enrich raw events before scoring
        #[arg(long)]
        enrich: bool,

        /// Rows to list in the summary
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Record format, overriding the file extension
        #[arg(short, long, value_parser = parse_format)]
        format: Option<RecordFormat>,
    },

    /// Show which artifacts a bundle holds
    Bundle {
        /// Bundle directory
        #[arg(short, long)]
        model_dir: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn parse_format(s: &str) -> std::result::Result<RecordFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "jsonl" | "json" | "ndjson" => Ok(RecordFormat::Jsonl),
        "csv" => Ok(RecordFormat::Csv),
        other => Err(format!("unknown format '{}', expected jsonl or csv", other)),
    }
}

/// Table row for bundle contents
#[derive(Tabled)]
struct ArtifactRow {
    #[tabled(rename = "Artifact")]
    file: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// Table row for scored records
#[derive(Tabled)]
struct ScoreRow {
    #[tabled(rename = "Row")]
    row: usize,
    #[tabled(rename = "Fusion")]
    fusion: String,
    #[tabled(rename = "Isolation")]
    isolation: String,
    #[tabled(rename = "Supervised")]
    supervised: String,
    #[tabled(rename = "Drift")]
    drift: u8,
}

pub fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Enrich {
            input,
            output,
            format,
        } => cmd_enrich(&config, input, output, format),
        Commands::Train {
            input,
            model_dir,
            no_auto_label,
            label_threshold,
            enrich,
            format,
        } => {
            let mut config = config;
            if no_auto_label {
                config.pipeline.auto_label = false;
            }
            if let Some(threshold) = label_threshold {
                config.pipeline.label_threshold = threshold;
            }
            config.validate()?;
            cmd_train(&config, input, model_dir, enrich, format)
        }
        Commands::Predict {
            input,
            output,
            model_dir,
            enrich,
            top,
            format,
        } => cmd_predict(&config, input, output, model_dir, enrich, top, format),
        Commands::Bundle { model_dir } => cmd_bundle(&config, model_dir),
        Commands::Config => cmd_config(&config),
    }
}

fn input_path(config: &Config, arg: Option<PathBuf>) -> Result<PathBuf> {
    arg.or_else(|| config.io.input.clone())
        .context("No input file; pass --input or set io.input")
}

fn output_path(config: &Config, arg: Option<PathBuf>) -> Result<PathBuf> {
    arg.or_else(|| config.io.output.clone())
        .context("No output file; pass --output or set io.output")
}

fn read_table(config: &Config, path: &Path, format: Option<RecordFormat>, enrich: bool) -> Result<FeatureTable> {
    let table = open_source(path, format.or(config.io.format)).read()?;
    Ok(if enrich {
        features::enrich_table(&table)
    } else {
        table
    })
}

fn cmd_enrich(
    config: &Config,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    format: Option<RecordFormat>,
) -> Result<()> {
    let input = input_path(config, input)?;
    let output = output_path(config, output)?;

    let enriched = read_table(config, &input, format, true)?;
    open_sink(&output, format.or(config.io.format)).write(&enriched)?;

    println!(
        "{} {} records to {}",
        "Enriched".green().bold(),
        enriched.len(),
        output.display()
    );
    Ok(())
}

fn cmd_train(
    config: &Config,
    input: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    enrich: bool,
    format: Option<RecordFormat>,
) -> Result<()> {
    let input = input_path(config, input)?;
    let model_dir = model_dir.unwrap_or_else(|| config.io.model_dir.clone());

    let mut table = read_table(config, &input, format, enrich)?;
    let mut pipeline = MLPipeline::new(config.ml())?;
    let metrics = pipeline.train(&mut table)?;
    pipeline
        .save(&model_dir)
        .with_context(|| format!("Failed to save model bundle to {}", model_dir.display()))?;

    println!("{}", "=== Training Summary ===".bold());
    println!("Rows:        {}", table.len());
    if let Some(columns) = pipeline.feature_columns() {
        println!("Features:    {}", columns.join(", "));
    }
    if let Some(metadata) = pipeline.metadata() {
        println!("Positives:   {}", metadata.positives);
    }
    match (metrics.cv_auc_mean, metrics.cv_pr_mean) {
        (Some(auc), Some(pr)) => {
            println!("CV-AUC:      {}", format!("{:.4}", auc).green());
            println!("CV-PR:       {}", format!("{:.4}", pr).green());
        }
        _ if pipeline.is_supervised() => {
            println!("{} too few rows for cross-validation", "Note:".yellow().bold());
        }
        _ => println!("{} supervised refinement skipped", "Note:".yellow().bold()),
    }
    println!("{} bundle to {}", "Saved".green().bold(), model_dir.display());
    Ok(())
}

fn cmd_predict(
    config: &Config,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    enrich: bool,
    top: usize,
    format: Option<RecordFormat>,
) -> Result<()> {
    let input = input_path(config, input)?;
    let output = output_path(config, output)?;
    let model_dir = model_dir.unwrap_or_else(|| config.io.model_dir.clone());

    let mut pipeline = MLPipeline::load(config.ml(), &model_dir)?;
    if !pipeline.is_trained() {
        anyhow::bail!(
            "No isolation forest in {}; run `logfusion train` first",
            model_dir.display()
        );
    }
    if !pipeline.is_supervised() {
        eprintln!(
            "{} no boosted-tree model in bundle, supervised score will be zero",
            "Note:".yellow().bold()
        );
    }

    let table = read_table(config, &input, format, enrich)?;
    let batch = pipeline.predict(&table)?;
    open_sink(&output, format.or(config.io.format)).write(&batch.apply(&table))?;

    print_scores(&batch, top);
    println!("{} {} records to {}", "Scored".green().bold(), batch.len(), output.display());
    Ok(())
}

fn print_scores(batch: &ScoredBatch, top: usize) {
    println!("{}", "=== Scoring Summary ===".bold());
    println!("Rows:        {}", batch.len());
    println!("Anomalies:   {}", batch.anomalies().to_string().red());
    println!("Drift flags: {}", batch.drift_detections().to_string().yellow());

    let mut order: Vec<usize> = (0..batch.len()).collect();
    order.sort_by(|&a, &b| batch.fusion_score[b].total_cmp(&batch.fusion_score[a]));

    let rows: Vec<ScoreRow> = order
        .into_iter()
        .take(top)
        .map(|i| ScoreRow {
            row: i,
            fusion: format!("{:.4}", batch.fusion_score[i]),
            isolation: format!("{:.4}", batch.iso_score[i]),
            supervised: format!("{:.4}", batch.lgbm_score[i]),
            drift: batch.adwin_flag[i],
        })
        .collect();
    if !rows.is_empty() {
        println!("{}", Table::new(rows));
    }
}

fn cmd_bundle(config: &Config, model_dir: Option<PathBuf>) -> Result<()> {
    let model_dir = model_dir.unwrap_or_else(|| config.io.model_dir.clone());
    let bundle = ModelStore::new(&model_dir).load();

    println!("{} {}", "Bundle:".bold(), model_dir.display());
    let rows: Vec<ArtifactRow> = bundle
        .summary()
        .into_iter()
        .map(|(file, status)| ArtifactRow {
            file: file.to_string(),
            status: match status {
                "present" => status.green().to_string(),
                "corrupt" => status.red().to_string(),
                _ => status.yellow().to_string(),
            },
        })
        .collect();
    println!("{}", Table::new(rows));

    if let Some(metadata) = bundle.metadata.get() {
        print_metadata(metadata);
    }
    Ok(())
}

fn print_metadata(metadata: &TrainingMetadata) {
    let metric = |v: Option<f64>| v.map_or_else(|| "null".to_string(), |v| format!("{:.4}", v));
    println!("Trained:     {} on {}", metadata.trained_at.format("%Y-%m-%d %H:%M:%S UTC"), metadata.host_id);
    println!("Version:     {}", metadata.version);
    println!("Rows:        {} ({} positive)", metadata.rows, metadata.positives);
    println!("Features:    {}", metadata.feature_columns.join(", "));
    println!("CV-AUC:      {}", metric(metadata.metrics.cv_auc_mean));
    println!("CV-PR:       {}", metric(metadata.metrics.cv_pr_mean));
}

fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
