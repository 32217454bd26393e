use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use zipcode_geojson::{logging, pipeline, OfflineProvider, ParseMode, PipelineConfig, SourceProvider};

/// Build one GeoJSON document per US ZIP code.
#[derive(Debug, Parser)]
#[command(name = "zipcode-geojson", version)]
struct Cli {
    /// TOML pipeline config; defaults reproduce the 2019 build
    #[arg(long, env = "ZIPCODE_GEOJSON_CONFIG")]
    config: Option<PathBuf>,

    /// Where archives are downloaded and extracted
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Root of the per-state output tree
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Abort on the first malformed attribute line
    #[arg(long)]
    strict: bool,

    /// Never download; every archive must already be present
    #[arg(long)]
    offline: bool,

    /// Write a JSON run report here
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long, default_value = logging::default_log_level())]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level)?;

    let config = load_config(&cli)?;
    let provider = provider_for(&config)?;

    let report = pipeline::run(&config, provider.as_ref())?;

    info!("Output directory: {}", config.output_dir.display());
    info!("Source directory: {}", config.source_dir.display());
    println!("{}", report.summary());

    Ok(())
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &cli.source_dir {
        config.source_dir = dir.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if cli.strict {
        config.parse_mode = ParseMode::Strict;
    }
    if cli.offline {
        config.offline = true;
    }
    if let Some(path) = &cli.report {
        config.report_path = Some(path.clone());
    }

    config.validate()?;
    Ok(config)
}

#[cfg(feature = "download")]
fn provider_for(config: &PipelineConfig) -> Result<Box<dyn SourceProvider>> {
    if config.offline {
        return Ok(Box::new(OfflineProvider));
    }
    Ok(Box::new(zipcode_geojson::HttpProvider::new(
        config.download_timeout_secs,
    )?))
}

#[cfg(not(feature = "download"))]
fn provider_for(_config: &PipelineConfig) -> Result<Box<dyn SourceProvider>> {
    // Built without network support: only pre-fetched archives can be used
    Ok(Box::new(OfflineProvider))
}
