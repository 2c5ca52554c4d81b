use super::config::{LogFormat, LogLevel};
use super::initialization::{InitializationError, LogDirective};
use parking_lot::RwLock;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Crates whose chatter is capped at `warn` unless overridden.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls", "sled"];

pub struct LoggingSystem {
    directives: RwLock<Vec<LogDirective>>,
    format: LogFormat,
}

impl LoggingSystem {
    pub fn new(format: LogFormat) -> Self {
        Self {
            directives: RwLock::new(Vec::new()),
            format,
        }
    }

    /// Adds a `target=level` directive. Malformed directives are reported
    /// and skipped.
    pub fn add_directive(&self, directive: &str) -> Result<(), InitializationError> {
        match LogDirective::parse(directive) {
            Ok(parsed) => {
                self.directives.write().push(parsed);
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                eprintln!("Warning: {e}, skipping directive");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in QUIET_TARGETS {
            directives.push(LogDirective::new(*target, LogLevel::Warn));
        }
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();
        let mut parts = Vec::with_capacity(directives.len() + 1);
        parts.push(default_level.as_str().to_string());
        parts.extend(directives.iter().map(LogDirective::to_filter_string));
        parts.join(",")
    }

    pub fn initialize_tracing(&self, default_level: LogLevel) -> Result<(), InitializationError> {
        let filter_string = self.build_filter_string(default_level);
        let env_filter = EnvFilter::try_new(&filter_string).map_err(|e| {
            InitializationError::LoggingInitFailed {
                details: format!("Failed to create EnvFilter with '{filter_string}'"),
                source: Box::new(e),
            }
        })?;

        let registry = tracing_subscriber::registry().with(env_filter);
        let installed = match self.format {
            LogFormat::Compact => registry
                .with(fmt::layer().with_target(true).with_level(true).compact())
                .try_init(),
            LogFormat::Json => registry
                .with(fmt::layer().with_target(true).json())
                .try_init(),
        };

        installed.map_err(|e| InitializationError::LoggingInitFailed {
            details: "Failed to set global tracing subscriber".to_string(),
            source: Box::new(e),
        })
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }

    /// Dependency defaults followed by the configured directives, so the
    /// configured ones can lift a quieted crate back up.
    pub fn with_directives(format: LogFormat, directives: &[String]) -> Self {
        let logging_system = Self::new(format);
        logging_system.add_default_directives();
        for directive in directives {
            if let Err(e) = logging_system.add_directive(directive) {
                eprintln!("Warning: {e}");
            }
        }
        logging_system
    }
}

/// Installs the global subscriber once per process. Later calls report
/// whether the first one succeeded.
pub fn setup_logging_safe(
    level: LogLevel,
    format: LogFormat,
    directives: &[String],
) -> Result<(), InitializationError> {
    static INSTALLED: OnceLock<bool> = OnceLock::new();

    let installed = *INSTALLED.get_or_init(|| {
        let logging_system = LoggingSystem::with_directives(format, directives);
        match logging_system.initialize_tracing(level) {
            Ok(()) => true,
            Err(e) => {
                eprintln!("{e}");
                false
            }
        }
    });

    if installed {
        Ok(())
    } else {
        Err(InitializationError::LoggingInitFailed {
            details: "Logging system initialization failed".to_string(),
            source: Box::new(std::io::Error::other("subscriber not installed")),
        })
    }
}
