use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use trial_prep::{CohortSummary, Pipeline, PipelineConfig, prepare, read_dataset};

#[derive(Parser, Debug)]
#[command(name = "trial-prep", version, about = "Preprocess clinical trial exports")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the raw exports and the written dataset
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline and write the preprocessed dataset
    Preprocess {
        /// File name suffix of the raw exports, e.g. ".csv"
        #[arg(default_value = ".csv")]
        extension: String,
    },
    /// Log a cohort summary of the preprocessed dataset
    Summarize,
    /// Split and scale the preprocessed dataset for modelling
    Prepare,
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let config = match &cli.data_dir {
        Some(dir) => config.with_dataset_dir(dir),
        None => config,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let start = Instant::now();

    match cli.command {
        Command::Preprocess { extension } => {
            let report = Pipeline::new(config)
                .run(&extension)
                .context("preprocessing failed")?;
            info!(
                "Wrote {} records for {} patients ({} encounters from {} tables) to {}",
                report.records,
                report.patients,
                report.encounters,
                report.tables,
                report.output_path.display()
            );
        }
        Command::Summarize => {
            let path = config.output_path();
            let records = read_dataset(&path)
                .with_context(|| format!("reading dataset {}", path.display()))?;
            CohortSummary::from_records(&records).log();
        }
        Command::Prepare => {
            let path = config.output_path();
            let records = read_dataset(&path)
                .with_context(|| format!("reading dataset {}", path.display()))?;
            let splits = prepare(&records, config.random_state).context("preparation failed")?;
            info!(
                "Scaled columns: {}",
                splits.scaler.columns.join(", ")
            );
        }
    }

    info!("Done in {:?}", start.elapsed());
    Ok(())
}
