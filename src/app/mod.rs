pub mod config;
pub mod initialization;
pub mod logging_system;

pub use config::{Config, ConfigError, LogFormat, LogLevel, Mode};
pub use initialization::InitializationError;
pub use logging_system::{LoggingSystem, setup_logging_safe};

use crate::client::Telemetry;
use crate::dispatch::PassOutcome;
use crate::domain::TelemetryError;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What one drain run of the binary achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub sent: u64,
    pub pending: usize,
    pub outcome: Option<PassOutcome>,
}

pub struct App {
    telemetry: Arc<Telemetry>,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, TelemetryError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args_and_env(args)?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, TelemetryError> {
        let config = match &config.config_file {
            Some(config_file) => {
                eprintln!("Loading configuration from file: {}", config_file.display());
                Config::from_file(config_file)?
            }
            None => config,
        };

        if let Err(e) = setup_logging_safe(
            config.log_level,
            config.log_format,
            &config.log_directives,
        ) {
            eprintln!("Warning: {e}, continuing without structured logging");
        }

        info!("Starting rask-telemetry v{}", crate::VERSION);
        info!(
            "Configuration: endpoint={}, event_path={}, store={}",
            config.endpoint,
            config.event_path,
            config
                .store_path
                .as_ref()
                .map_or_else(|| "memory".to_string(), |p| p.display().to_string())
        );

        let telemetry = Telemetry::builder(config).build()?;
        Ok(Self { telemetry })
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Drains whatever the store holds with one dispatch pass.
    pub async fn run(self) -> Result<RunSummary, TelemetryError> {
        let dispatcher = self.telemetry.dispatcher();
        dispatcher.wake();
        dispatcher.wait_idle().await;

        let summary = RunSummary {
            sent: dispatcher.stats().sent,
            pending: self.telemetry.pending_requests()?,
            outcome: dispatcher.last_pass().map(|report| report.outcome),
        };

        match &summary.outcome {
            Some(PassOutcome::Drained) | None => info!(
                "rask-telemetry finished: {} sent, {} pending",
                summary.sent, summary.pending
            ),
            Some(outcome) => warn!(
                "rask-telemetry stopped early: {} sent, {} pending ({:?})",
                summary.sent, summary.pending, outcome
            ),
        }

        self.telemetry.shutdown();
        Ok(summary)
    }
}

pub async fn main() -> anyhow::Result<()> {
    let app = match App::from_args(std::env::args_os()) {
        Ok(app) => app,
        Err(e) => {
            error!("Configuration error: {}", e);
            eprintln!("Configuration error: {e}");
            process::exit(1);
        }
    };

    app.run().await?;
    Ok(())
}
