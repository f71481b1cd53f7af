//! # Thinkific Ingestion
//!
//! Runs the course platform pipeline once: courses, course reviews,
//! enrollments and users are fetched from the Thinkific API and merged into
//! the warehouse.
//!
//! ## Destination selection:
//! - `ENVIRONMENT=local`: embedded SQLite file `<pipeline>.db`, dataset `data`.
//! - anything else: PostgreSQL, dataset `thinkific`.
//!
//! Flags override both. Credentials come from the layered configuration
//! (environment, `secrets.json`, `config.json` in `$CONFIGS_LOCATION`).

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use static_init::dynamic;
use tracing::{error, info};

use lib_common::assets::thinkific_pipeline::{self, ThinkificPipelineConfig};
use lib_common::configs::{get_runtime_config, ConfigError, Environment, RuntimeConfig};
use lib_common::destinations::DestinationKind;
use lib_common::loggers::{setup_logging, LoggingOptions};

#[dynamic]
static DOTENV_INIT: () = {
    // Set up environment variables
    dotenvy::dotenv().ok();
};

/// Statically initialized `RuntimeConfig`, read on first use so `.env` is already applied.
#[dynamic(lazy)]
static RUNTIMECONFIG: Result<RuntimeConfig, ConfigError> = get_runtime_config();

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Loads courses, course reviews, enrollments and users from the Thinkific API."
)]
struct Args {
    /// Destination to load into (`sqlite` or `postgres`).
    #[clap(long, env = "THINKIFIC_DESTINATION")]
    destination: Option<DestinationKind>,

    /// Pipeline name; also the configuration section and the SQLite file name.
    #[clap(long, env = "THINKIFIC_PIPELINE_NAME", default_value = "thinkific")]
    pipeline_name: String,

    /// Dataset (SQLite table prefix / PostgreSQL schema).
    #[clap(long, env = "THINKIFIC_DATASET_NAME")]
    dataset_name: Option<String>,

    /// Print the asset materializations as JSON instead of the load summary.
    #[clap(long)]
    materialize: bool,
}

fn pipeline_config(args: &Args, environment: Environment) -> ThinkificPipelineConfig {
    let (destination, dataset_name) = if environment.is_local() {
        (DestinationKind::Sqlite, "data")
    } else {
        (DestinationKind::Postgres, "thinkific")
    };

    ThinkificPipelineConfig {
        pipeline_name: args.pipeline_name.clone(),
        dataset_name: args
            .dataset_name
            .clone()
            .unwrap_or_else(|| dataset_name.to_string()),
        destination: args.destination.unwrap_or(destination),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _guard = setup_logging(&LoggingOptions::from_env("thinkific_ingest"))
        .context("Failed to initialize logging")?;

    let runtime = match &*RUNTIMECONFIG {
        Ok(runtime) => {
            info!("{}", runtime);
            runtime
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(anyhow!("Failed to load configuration: {}", e));
        }
    };

    let environment = Environment::from_env();
    let config = pipeline_config(&args, environment);
    info!(?config, %environment, "Starting Thinkific ingestion");

    if args.materialize {
        let results = thinkific_pipeline::materialize(&config, runtime)
            .await
            .context("Thinkific materialization failed")?;
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        let load_info = thinkific_pipeline::run_pipeline(&config, runtime)
            .await
            .context("Thinkific pipeline failed")?;
        println!("{}", load_info);
    }
    Ok(())
}
