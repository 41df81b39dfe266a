//! Explicit logging context
//!
//! There is no process-wide logger object. A [`LogContext`] is built by the
//! caller and handed to the [`Trainer`](crate::trainer::Trainer) and the
//! [`ExperimentRecorder`](crate::experiment::ExperimentRecorder); library code
//! only emits `tracing` events inside the spans it opens.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Default filter directive when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Logging context for one training run.
#[derive(Debug, Clone)]
pub struct LogContext {
    run_name: String,
    log_location: Option<PathBuf>,
    directive: String,
}

impl LogContext {
    /// Create a context for the named run, logging to stderr.
    #[must_use]
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            log_location: None,
            directive: DEFAULT_DIRECTIVE.to_string(),
        }
    }

    /// Log to a file instead of stderr. The path is also persisted with the
    /// experiment record.
    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_location = Some(path.into());
        self
    }

    /// Fallback filter directive (e.g. `"trueno_train=debug"`).
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = directive.into();
        self
    }

    /// Run name attached to every span.
    #[must_use]
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Log file path, if logging to a file.
    #[must_use]
    pub fn log_location(&self) -> Option<&Path> {
        self.log_location.as_deref()
    }

    /// Open an `info` span for one stage of the run.
    #[must_use]
    pub fn span(&self, stage: &'static str) -> tracing::Span {
        tracing::info_span!("pipeline", run = %self.run_name, stage)
    }

    /// Install a `fmt` subscriber honouring `RUST_LOG`, falling back to this
    /// context's directive.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for an invalid directive or when a
    /// global subscriber is already installed, and `Error::Io` if the log
    /// file cannot be opened.
    pub fn init_subscriber(&self) -> Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.directive))
            .map_err(|e| Error::Configuration(format!("invalid log directive: {e}")))?;

        let installed = match &self.log_location {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .try_init()
            }
            None => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init(),
        };

        installed.map_err(|e| Error::Configuration(format!("log subscriber: {e}")))
    }
}
