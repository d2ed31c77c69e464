use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};

use seaguard_core::{SensorId, SystemClock, TimeWindow};
use seaguard_jobs::sinks::{CanonicalSink, JsonLinesSink};
use seaguard_jobs::{init_logger, ForecastService, JobConfig, JobRequest, LogLevel, Orchestrator};
use seaguard_ml::ArtifactStore;
use seaguard_schemas::parse_datetime;

#[derive(Parser)]
#[command(name = "seaguard")]
#[command(about = "Ocean-sensor ingestion, anomaly scoring and forecasting", long_about = None)]
struct Cli {
    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalize, score, optionally retrain, and forecast
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Restrict the run to these sensors (repeatable)
        #[arg(long = "sensor")]
        sensors: Vec<String>,
        /// Window start; defaults to `lookback_hours` before the end
        #[arg(long)]
        start: Option<String>,
        /// Window end; defaults to now
        #[arg(long)]
        end: Option<String>,
        /// Retrain every configured target after ingesting
        #[arg(long)]
        retrain: bool,
    },
    /// Score the newest stored event of a sensor and forecast from it
    Forecast {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        sensor: String,
        /// Lead time; defaults to the configured horizon
        #[arg(long)]
        horizon_secs: Option<i64>,
    },
}

fn load_config(path: &Path, log_level: Option<LogLevel>) -> anyhow::Result<JobConfig> {
    let mut config = JobConfig::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    if let Some(level) = log_level {
        config.logging.level = level;
    }
    init_logger(&config.logging).context("failed to install logger")?;
    Ok(config)
}

fn parse_flag(flag: &str, text: Option<&str>) -> anyhow::Result<Option<DateTime<Utc>>> {
    text.map(|t| parse_datetime(t).with_context(|| format!("invalid --{} '{}'", flag, t)))
        .transpose()
}

fn window(config: &JobConfig, start: Option<&str>, end: Option<&str>) -> anyhow::Result<TimeWindow> {
    let start = parse_flag("start", start)?;
    let end = parse_flag("end", end)?;
    Ok(config.query_window(&SystemClock, start, end)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            sensors,
            start,
            end,
            retrain,
        } => {
            let config = load_config(&config, cli.log_level)?;
            let request = JobRequest::new(window(&config, start.as_deref(), end.as_deref())?)
                .with_sensors(sensors.into_iter().map(SensorId::from))
                .with_retrain(retrain || config.retrain);

            let orchestrator = Orchestrator::from_config(&config).context("failed to set up the job")?;
            let summary = orchestrator.run(&request).await.context("run aborted")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Forecast {
            config,
            sensor,
            horizon_secs,
        } => {
            let config = load_config(&config, cli.log_level)?;
            let horizon_secs = horizon_secs.unwrap_or(config.forecast_horizon_secs);
            if horizon_secs <= 0 {
                bail!("forecast horizon must be positive");
            }

            let store = ArtifactStore::open(&config.store_path)
                .with_context(|| format!("artifact store at {}", config.store_path.display()))?;
            let service = ForecastService::from_store(&store)?;
            let sensor_id = SensorId::from(sensor);
            let history: Vec<_> = JsonLinesSink::new(&config.output.canonical)
                .history()?
                .into_iter()
                .filter(|r| r.sensor_id() == &sensor_id)
                .collect();
            if history.is_empty() {
                bail!("no stored records for sensor '{}'", sensor_id);
            }

            let evaluation = service.evaluate(&history, Some(Duration::seconds(horizon_secs)))?;
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
        }
    }
    Ok(())
}
