use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use framekeeper::config::load_recognized_storage;
use framekeeper::drift::DriftController;
use framekeeper::output::{LoggingIndicator, RecordingIndicator, SysfsGpioIndicator};
use framekeeper::recorder::state::IS_RECORDING;
use framekeeper::recorder::RecordingMediator;
use framekeeper::shutdown::shutdown_channel;
use framekeeper::sim::{SimulatedCamera, SimulationParams};
use framekeeper::storage::storage_channel;
use framekeeper::store::{MemoryStore, ParameterStore};
use framekeeper::{AppResult, FrameKeeperConfig};

#[derive(Debug, Parser)]
#[command(name = "framekeeper")]
#[command(about = "Frame-rate drift control and recording mediation")]
struct Cli {
    /// JSON configuration file; defaults apply when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the target frame rate.
    #[arg(long)]
    target: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run both controllers against a simulated camera
    Simulate {
        /// Fractional camera clock error (-0.0001 is 100 ppm slow)
        #[arg(long, default_value_t = -0.0001, allow_hyphen_values = true)]
        skew: f64,

        /// Peak per-frame jitter of the reported frame rate
        #[arg(long, default_value_t = 0.0)]
        jitter: f64,

        /// Stop after this many seconds; runs until Ctrl-C when omitted
        #[arg(long)]
        duration_secs: Option<f64>,

        /// Seconds between status lines
        #[arg(long, default_value_t = 5.0)]
        report_secs: f64,

        /// Assert recording at startup
        #[arg(long)]
        record: bool,

        /// Simulate storage removal after this many seconds
        #[arg(long)]
        remove_storage_after_secs: Option<f64>,

        /// Drive a sysfs GPIO line instead of logging the indicator
        #[arg(long)]
        gpio_line: Option<u32>,

        /// Settings file listing recognized storage devices
        #[arg(long)]
        storage_settings: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    framekeeper::init_tracing();

    let mut config = load_config(cli.config.as_deref())
        .with_context(|| format!("load configuration {:?}", cli.config))?;
    if let Some(target) = cli.target {
        config.target_framerate = target;
    }
    config.validate().context("invalid configuration")?;

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Simulate {
            skew,
            jitter,
            duration_secs,
            report_secs,
            record,
            remove_storage_after_secs,
            gpio_line,
            storage_settings,
        } => {
            if let Some(path) = storage_settings {
                config.recognized_storage.extend(load_recognized_storage(&path));
            }

            let options = SimulateOptions {
                params: SimulationParams {
                    initial_rate: config.target_framerate,
                    clock_skew: skew,
                    jitter,
                },
                duration: duration_secs.map(Duration::from_secs_f64),
                report_every: Duration::from_secs_f64(report_secs.max(0.1)),
                record,
                remove_storage_after: remove_storage_after_secs.map(Duration::from_secs_f64),
                gpio_line,
            };
            simulate(config, options).await
        }
    }
}

fn load_config(path: Option<&Path>) -> AppResult<FrameKeeperConfig> {
    match path {
        Some(path) => Ok(FrameKeeperConfig::load_or_default(path)?),
        None => Ok(FrameKeeperConfig::default()),
    }
}

struct SimulateOptions {
    params: SimulationParams,
    duration: Option<Duration>,
    report_every: Duration,
    record: bool,
    remove_storage_after: Option<Duration>,
    gpio_line: Option<u32>,
}

async fn simulate(config: FrameKeeperConfig, options: SimulateOptions) -> Result<()> {
    tracing::info!(
        "Starting FrameKeeper v{} simulation at {:.6} fps",
        env!("CARGO_PKG_VERSION"),
        config.target_framerate
    );
    if !config.recognized_storage.is_empty() {
        tracing::info!("Recognized storage: {:?}", config.recognized_storage);
    }

    let store = MemoryStore::new(config.channels.controls.clone());
    let indicator: Arc<dyn RecordingIndicator> = match options.gpio_line {
        Some(line) => Arc::new(
            SysfsGpioIndicator::open(line).with_context(|| format!("open GPIO line {}", line))?,
        ),
        None => Arc::new(LoggingIndicator),
    };

    let (trigger, shutdown) = shutdown_channel();

    let camera = SimulatedCamera::new(&config, Arc::new(store.client("camera")), options.params);
    let controller = DriftController::new(&config, Arc::new(store.client("drift")));
    let status = controller.status_handle();
    let mediator = RecordingMediator::new(&config, Arc::new(store.client("mediator")), indicator);
    let (storage_tx, storage_rx) = storage_channel(16);

    let mediator_task = mediator.spawn(storage_rx, shutdown.clone());
    let drift_tasks = controller.spawn(shutdown.clone());
    let camera_task = camera.spawn(shutdown.clone());

    if options.record {
        let operator = store.client("operator");
        operator
            .set(IS_RECORDING, "1")
            .await
            .context("assert recording")?;
        storage_tx.write_status_changed(true).await;
    }

    if let Some(after) = options.remove_storage_after {
        let storage_tx = storage_tx.clone();
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            if shutdown.sleep(after).await {
                storage_tx.removed().await;
            }
        });
    }

    let deadline = async {
        match options.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(options.report_every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::info!("Simulation duration reached");
                break;
            }
            result = tokio::signal::ctrl_c() => {
                result.context("listen for Ctrl-C")?;
                tracing::info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                println!("{}", serde_json::to_string(&status.status())?);
            }
        }
    }

    trigger.trigger();
    drift_tasks.join().await;
    if let Err(e) = camera_task.await {
        tracing::error!("Simulated camera task failed: {}", e);
    }
    if let Err(e) = mediator_task.await {
        tracing::error!("Mediator task failed: {}", e);
    }

    println!("{}", serde_json::to_string_pretty(&status.status())?);
    if let Some(session) = mediator.last_session().await {
        println!("{}", serde_json::to_string_pretty(&session)?);
    }

    Ok(())
}
