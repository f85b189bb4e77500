use anther::commands::{
    self, metadata,
    optimize::{self, SearchMode, SearchOptions},
    simulate, RunRequest,
};
use anther::models::BucketUnit;
use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

#[derive(Parser)]
#[command(name = "anther")]
#[command(about = "Intraday strategy simulation and parameter optimization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a strategy over a date range and report results per bucket
    Simulate {
        /// Strategy template (fixed_range, bloom, sprout)
        template_id: String,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Search candidate parameters around a seed run and select the best
    Optimize {
        /// Strategy template (fixed_range, bloom, sprout)
        template_id: String,
        #[command(flatten)]
        run: RunArgs,
        /// Parameter range to search, as key=min:max:step (repeatable)
        #[arg(long = "range", value_name = "KEY=MIN:MAX:STEP")]
        ranges: Vec<String>,
        /// How candidates are generated from the ranges
        #[arg(long, value_enum, default_value_t = SearchMode::Grid)]
        search: SearchMode,
        /// Number of random samples
        #[arg(long, default_value_t = 50)]
        samples: usize,
        /// Seed for random sampling
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Report leader switches every N trades
        #[arg(long = "switch-window", value_name = "N")]
        switch_window: Option<usize>,
        /// Score following the leader for every window in MIN:MAX
        #[arg(long = "switch-windows", value_name = "MIN:MAX")]
        switch_windows: Option<String>,
    },
    /// Describe the market data per bucket
    Metadata {
        /// Path to the market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// First date included (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// First date excluded (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
        /// Bucket unit (day, month, year); defaults to SIMULATION_BUCKET_UNIT
        #[arg(long)]
        unit: Option<String>,
        /// Write the metadata as JSON
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to the market data snapshot file
    #[arg(long = "data-file", value_name = "PATH")]
    data_file: Option<PathBuf>,
    /// First date included (YYYY-MM-DD)
    #[arg(long)]
    start: NaiveDate,
    /// First date excluded (YYYY-MM-DD)
    #[arg(long)]
    end: NaiveDate,
    /// Bucket unit (day, month, year); defaults to SIMULATION_BUCKET_UNIT
    #[arg(long)]
    unit: Option<String>,
    /// Strategy parameter override, as key=value (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
    /// JSON schedule of dated parameter sets
    #[arg(long, value_name = "PATH")]
    schedule: Option<PathBuf>,
    /// Write the result as JSON
    #[arg(short, long = "output", value_name = "PATH")]
    output: Option<PathBuf>,
}

impl RunArgs {
    fn into_request(self, template_id: String) -> Result<RunRequest> {
        Ok(RunRequest {
            template_id,
            data_file: resolve_market_data_path(self.data_file),
            start: self.start,
            end: self.end,
            unit: parse_unit(self.unit.as_deref())?,
            parameters: commands::parse_parameter_overrides(&self.params)?,
            schedule: self.schedule,
            output: self.output,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting anther. Simulated results are not a forecast of live trading.");

    match cli.command {
        Commands::Simulate { template_id, run } => {
            simulate::run(&run.into_request(template_id)?)?;
        }
        Commands::Optimize {
            template_id,
            run,
            ranges,
            search,
            samples,
            seed,
            switch_window,
            switch_windows,
        } => {
            let request = run.into_request(template_id)?;
            let options = SearchOptions {
                mode: search,
                ranges: commands::parse_parameter_ranges(&ranges)?,
                samples,
                seed,
                switch_window,
                window_sweep: switch_windows
                    .as_deref()
                    .map(commands::parse_window_range)
                    .transpose()?,
            };
            optimize::run(&request, &options)?;
        }
        Commands::Metadata {
            data_file,
            start,
            end,
            unit,
            output,
        } => {
            metadata::run(
                &resolve_market_data_path(data_file),
                start,
                end,
                parse_unit(unit.as_deref())?,
                output.as_deref(),
            )?;
        }
    }

    Ok(())
}

fn parse_unit(raw: Option<&str>) -> Result<Option<BucketUnit>> {
    raw.map(BucketUnit::parse).transpose()
}

fn resolve_market_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_MARKET_DATA_FILE)
}
