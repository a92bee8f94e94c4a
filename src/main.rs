use std::io;
use std::path::PathBuf;

use alignreid::matcher;
use alignreid::report::{self, Reporter};
use alignreid::{config, gallery};
use alignreid_vision::{
    AlignedDistanceScorer, Device, FeatureExtractor, OnnxExtractor, PartDescriptorBuilder,
    Pipeline, Pooling, TimedExtractor,
};
use anyhow::{Context, Result};
use clap::Parser;
use log::info;

#[derive(Parser)]
#[command(name = "alignreid")]
#[command(
    version,
    about = "Find the gallery crop that best matches a query person crop"
)]
struct Cli {
    /// Query image
    query: PathBuf,
    /// Directory of candidate crops
    gallery: PathBuf,
    /// Directory the best match is copied into (created if missing)
    output: PathBuf,

    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// ONNX model emitting the backbone feature map
    #[arg(short, long)]
    model: Option<PathBuf>,
    /// cpu, cuda[:id] or openvino
    #[arg(short, long, env = "ALIGNREID_DEVICE")]
    device: Option<Device>,
    /// max or avg
    #[arg(long)]
    pooling: Option<Pooling>,
    /// Scan workers; 1 scans sequentially
    #[arg(short, long)]
    workers: Option<usize>,
    /// Per-candidate time limit in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        cfg.model = model;
    }
    if let Some(device) = cli.device {
        cfg.device = device;
    }
    if let Some(pooling) = cli.pooling {
        cfg.pooling = pooling;
    }
    if let Some(workers) = cli.workers {
        cfg.workers = workers;
    }
    if cli.timeout_secs.is_some() {
        cfg.timeout_secs = cli.timeout_secs;
    }
    cfg.validate()?;

    let reporter = Reporter::new(&cli.output)?;

    let mut extractor: Box<dyn FeatureExtractor> = Box::new(
        OnnxExtractor::new(&cfg.model, cfg.device)
            .context("Failed to initialize feature extractor")?,
    );
    if let Some(limit) = cfg.timeout() {
        info!("Bounding inference to {:?} per image", limit);
        extractor = Box::new(TimedExtractor::new(extractor, limit)?);
    }
    let pipeline = Pipeline::new(
        extractor,
        cfg.input_shape(),
        cfg.normalization(),
        PartDescriptorBuilder::new(cfg.parts, cfg.pooling),
    );
    let scorer = AlignedDistanceScorer::new(cfg.parts);

    let query_id = gallery::canonical(&cli.query);
    let query = pipeline
        .describe_path(&query_id)
        .with_context(|| format!("Failed to describe query {}", cli.query.display()))?;
    matcher::validate_query(&scorer, &query)
        .with_context(|| format!("Query {} is unusable", cli.query.display()))?;

    let candidates = gallery::list_candidates(&cli.gallery)?;
    info!(
        "Scanning {} candidate(s) in {}",
        candidates.len(),
        cli.gallery.display()
    );

    let scan = if cfg.workers <= 1 {
        matcher::scan(&query_id, &query, &candidates, &pipeline, &scorer)
    } else {
        matcher::scan_parallel(
            &query_id,
            &query,
            &candidates,
            &pipeline,
            &scorer,
            cfg.workers,
        )
    };

    info!(
        "Scored {} candidate(s), skipped {}",
        scan.scored,
        scan.failures.len()
    );

    let result = reporter
        .report(scan.best.as_ref())
        .context("Failed to write match to output directory")?;
    match &result {
        Some(m) => info!("✓ Best match: {} (distance {:.4})", m.filename, m.distance),
        None => info!("No candidate could be matched"),
    }

    report::emit(result.as_ref(), io::stdout().lock()).context("Failed to write result")?;
    Ok(())
}
