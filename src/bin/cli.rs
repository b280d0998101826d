//! Election crawler CLI
//!
//! Exit codes: 0 on success, 1 when a run is aborted (configuration, local
//! I/O or schema error), 2 when a crawl finished but some locations failed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use election_crawler::{
    error::Result,
    models::{Config, CrawlStats},
    pipeline,
};

/// Korean election result crawler and aggregator
#[derive(Parser, Debug)]
#[command(
    name = "election-crawler",
    version,
    about = "Download, parse, merge and aggregate NEC election results"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "election.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct CrawlArgs {
    /// Portal election identifier, e.g. 0020250603
    #[arg(long)]
    election_id: Option<String>,

    /// Election type code (1-8)
    #[arg(long)]
    election_code: Option<u8>,

    /// Directory for downloaded reports
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Download with a worker pool
    #[arg(long)]
    concurrent: bool,

    /// Worker pool size for --concurrent
    #[arg(long)]
    workers: Option<usize>,
}

impl CrawlArgs {
    fn apply(self, config: &mut Config) {
        if let Some(id) = self.election_id {
            config.election.id = id;
        }
        if let Some(code) = self.election_code {
            config.election.code = code;
        }
        if let Some(dir) = self.download_dir {
            config.paths.download_dir = dir;
        }
        if self.concurrent {
            config.crawler.concurrent = true;
        }
        if let Some(workers) = self.workers {
            config.crawler.max_workers = workers;
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download result reports for every location
    Crawl {
        #[command(flatten)]
        crawl: CrawlArgs,
    },

    /// Extract downloaded reports into per-location CSV files
    Parse {
        /// Directory holding downloaded reports
        #[arg(long)]
        download_dir: Option<PathBuf>,

        /// Directory for per-location CSV files
        #[arg(long)]
        csv_dir: Option<PathBuf>,

        /// Skip election_summary.csv
        #[arg(long)]
        no_summary: bool,
    },

    /// Merge per-location CSV files into one dataset
    Merge {
        /// Directory holding per-location CSV files
        #[arg(long)]
        csv_dir: Option<PathBuf>,

        /// Merged CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Aggregate the merged dataset by province, district and town
    Aggregate {
        /// Merged CSV file
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory for aggregated CSV files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Also write one report holding every level
        #[arg(long)]
        combined: bool,
    },

    /// Run full pipeline: Crawl → Parse → Merge → Aggregate
    Pipeline {
        #[command(flatten)]
        crawl: CrawlArgs,

        /// Also write one report holding every level
        #[arg(long)]
        combined: bool,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging: `--verbose`, then `RUST_LOG`, then the config level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Outcome of a command that did not abort.
enum Outcome {
    Done,
    Crawled(CrawlStats),
}

async fn run(command: Command, mut config: Config) -> Result<Outcome> {
    match command {
        Command::Crawl { crawl } => {
            crawl.apply(&mut config);
            config.validate()?;
            Ok(Outcome::Crawled(pipeline::run_crawl(&config).await?))
        }

        Command::Parse {
            download_dir,
            csv_dir,
            no_summary,
        } => {
            let download_dir = download_dir.unwrap_or(config.paths.download_dir);
            let csv_dir = csv_dir.unwrap_or(config.paths.csv_dir);
            pipeline::run_parse(
                &download_dir,
                &csv_dir,
                &config.hierarchy.provinces,
                !no_summary,
            )
            .await?;
            Ok(Outcome::Done)
        }

        Command::Merge { csv_dir, output } => {
            let csv_dir = csv_dir.unwrap_or(config.paths.csv_dir);
            let output = output.unwrap_or(config.paths.merged_file);
            pipeline::run_merge(&csv_dir, &output, &config.merge)?;
            Ok(Outcome::Done)
        }

        Command::Aggregate {
            input,
            output_dir,
            combined,
        } => {
            let input = input.unwrap_or(config.paths.merged_file);
            let output_dir = output_dir.unwrap_or(config.paths.aggregate_dir);
            pipeline::run_aggregate(&input, &output_dir, combined)?;
            Ok(Outcome::Done)
        }

        Command::Pipeline { crawl, combined } => {
            crawl.apply(&mut config);
            config.validate()?;
            Ok(Outcome::Crawled(
                pipeline::run_pipeline(&config, combined).await?,
            ))
        }

        // handled before the config is loaded
        Command::Validate => Ok(Outcome::Done),
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Command::Validate) {
        init_logging(cli.verbose, "info");
        return match pipeline::run_validate(&cli.config) {
            Ok(_) => ExitCode::SUCCESS,
            Err(_) => ExitCode::from(1),
        };
    }

    let config = match Config::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_logging(cli.verbose, "info");
            log::error!("Config load failed from {}: {}", cli.config.display(), e);
            return ExitCode::from(1);
        }
    };
    init_logging(cli.verbose, &config.logging.level);
    if !cli.config.exists() {
        log::warn!("No config file at {}. Using defaults.", cli.config.display());
    }

    match run(cli.command, config).await {
        Ok(Outcome::Crawled(stats)) if stats.has_errors() => {
            log::warn!(
                "Crawl completed with {} failed locations",
                stats.errors()
            );
            ExitCode::from(2)
        }
        Ok(_) => {
            log::info!("Done!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Aborted: {e}");
            ExitCode::from(1)
        }
    }
}
