//! Logging setup and run lifecycle events.

use std::env;
use std::io;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::PipelineConfig;
use crate::pipeline::PipelineReport;

pub const LOG_LEVEL_ENV: &str = "DF_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "DF_LOG_FORMAT";
pub const LOG_TARGET_ENV: &str = "DF_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    /// Single-line human output, handy for long training runs.
    Compact,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads `DF_LOG_*`; unparseable values keep the default.
pub fn logging_config_from_env() -> LoggingConfig {
    let defaults = LoggingConfig::default();
    let var = |name: &str| env::var(name).ok().map(|v| v.trim().to_string());

    LoggingConfig {
        level: var(LOG_LEVEL_ENV)
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.level),
        format: var(LOG_FORMAT_ENV)
            .and_then(|v| LogFormat::parse(&v))
            .unwrap_or(defaults.format),
        include_target: var(LOG_TARGET_ENV)
            .and_then(|v| parse_flag(&v))
            .unwrap_or(defaults.include_target),
    }
}

/// Installs the global subscriber. Events go to stderr so the run summary on
/// stdout stays machine-readable.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(config.include_target)
        .with_ansi(config.format != LogFormat::Json);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "forecast_run",
        event = "app.start",
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_format = ?config.format
    );
}

/// Records where the run configuration came from and its main choices.
pub fn log_config_selected(config: &PipelineConfig, source: &str) {
    info!(
        component = "forecast_run",
        event = "config.selected",
        source,
        calendar_key = ?config.calendar_key,
        validation = ?config.validation,
        stats_scope = ?config.stats_scope,
        n_estimators = config.boosting.n_estimators,
        seed = config.boosting.seed,
        output_path = %config.export.output_path.display()
    );
}

pub fn log_run_finish(report: &PipelineReport) {
    let summary = &report.evaluation;
    if summary.degenerate_folds > 0 {
        warn!(
            component = "forecast_run",
            event = "run.degenerate_folds",
            degenerate_folds = summary.degenerate_folds,
            folds = summary.folds.len()
        );
    }
    info!(
        component = "forecast_run",
        event = "run.finish",
        transactions = report.load.rows_loaded,
        dataset_rows = report.assembly.rows_kept,
        folds = summary.folds.len(),
        mean_wmape = ?summary.mean_wmape,
        forecast_records = report.forecast_records,
        output_path = %report.output_path.display()
    );
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_log_env<R>(
        level: Option<&str>,
        format: Option<&str>,
        target: Option<&str>,
        f: impl FnOnce() -> R,
    ) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let vars = [
            (LOG_LEVEL_ENV, level),
            (LOG_FORMAT_ENV, format),
            (LOG_TARGET_ENV, target),
        ];
        let previous: Vec<(&str, Option<String>)> =
            vars.iter().map(|(key, _)| (*key, env::var(key).ok())).collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
        let output = f();
        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
        output
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_log_env(None, None, None, logging_config_from_env);
        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn reads_level_format_and_target() {
        let cfg = with_log_env(
            Some("demand_forecast=debug"),
            Some("COMPACT"),
            Some("yes"),
            logging_config_from_env,
        );
        assert_eq!(cfg.level, "demand_forecast=debug");
        assert_eq!(cfg.format, LogFormat::Compact);
        assert!(cfg.include_target);
    }

    #[test]
    fn garbage_values_keep_defaults() {
        let cfg = with_log_env(
            Some("  "),
            Some("xml"),
            Some("sometimes"),
            logging_config_from_env,
        );
        assert_eq!(cfg, LoggingConfig::default());
    }
}
