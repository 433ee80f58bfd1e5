/// Structured logging for the scenario comparison pipeline
///
/// Provides context-rich logging with pipeline stage and scenario
/// identifiers, timestamps, and severity levels. Supports both console
/// output and file-based logging for long unattended batch runs.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Engine,
    Collector,
    Reducer,
    Analyzer,
    System,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Config => write!(f, "CFG"),
            Stage::Engine => write!(f, "SWMM"),
            Stage::Collector => write!(f, "COLLECT"),
            Stage::Reducer => write!(f, "REDUCE"),
            Stage::Analyzer => write!(f, "ANALYZE"),
            Stage::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, stage: Stage, scenario: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let entry = format_entry(level, stage, scenario, message);
        let scenario_part = scenario.map(|s| format!(" [{}]", s)).unwrap_or_default();

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", stage, scenario_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", stage, scenario_part, message),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => {} // Skip debug in non-timestamp mode
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

/// Formats one timestamped log line, e.g.
/// `2025-07-16 14:02:11 UTC WARN ANALYZE [V]: baseline is zero at J4-S_depth`.
fn format_entry(level: LogLevel, stage: Stage, scenario: Option<&str>, message: &str) -> String {
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    let scenario_part = scenario.map(|s| format!(" [{}]", s)).unwrap_or_default();
    format!("{} {} {}{}: {}", timestamp, level, stage, scenario_part, message)
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn dispatch(level: LogLevel, stage: Stage, scenario: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, stage, scenario, message);
        }
    }
}

/// Log a general informational message
pub fn info(stage: Stage, scenario: Option<&str>, message: &str) {
    dispatch(LogLevel::Info, stage, scenario, message);
}

/// Log a warning message
pub fn warn(stage: Stage, scenario: Option<&str>, message: &str) {
    dispatch(LogLevel::Warning, stage, scenario, message);
}

/// Log an error message
pub fn error(stage: Stage, scenario: Option<&str>, message: &str) {
    dispatch(LogLevel::Error, stage, scenario, message);
}

/// Log a debug message
pub fn debug(stage: Stage, scenario: Option<&str>, message: &str) {
    dispatch(LogLevel::Debug, stage, scenario, message);
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a fatal scenario failure with the operation that was running.
pub fn log_scenario_failure(scenario: &str, operation: &str, err: &dyn std::error::Error) {
    let message = format!("{} failed: {}", operation, err);
    error(Stage::Engine, Some(scenario), &message);
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of the reduction: how many nodes survived into the
/// comparison tables and how many were dropped for missing scenarios.
pub fn log_run_summary(scenarios: usize, nodes_kept: usize, nodes_dropped: usize) {
    let message = format!(
        "Reduction complete: {} scenarios, {} nodes compared, {} dropped",
        scenarios, nodes_kept, nodes_dropped
    );

    if nodes_dropped == 0 {
        info(Stage::Reducer, None, &message);
    } else if nodes_kept == 0 {
        error(Stage::Reducer, None, &message);
    } else {
        warn(Stage::Reducer, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_entry_carries_stage_and_scenario() {
        let entry = format_entry(LogLevel::Warning, Stage::Analyzer, Some("V&I"), "baseline is zero");
        assert!(entry.contains("WARN ANALYZE [V&I]: baseline is zero"), "got '{}'", entry);

        let entry = format_entry(LogLevel::Info, Stage::System, None, "done");
        assert!(entry.ends_with("INFO SYS: done"), "got '{}'", entry);
    }

    #[test]
    fn test_file_logging_appends_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        let path_str = path.to_str().expect("utf-8 path");

        Logger::append_to_file(path_str, "first").expect("append");
        Logger::append_to_file(path_str, "second").expect("append");

        let contents = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(contents, "first\nsecond\n");
    }
}
