// Logging for pool-governor
//
// Two layers live here. The first configures the process-wide `tracing` subscriber, the
// same way for binaries, services and tests. The second is the `LogSink` seam: governance
// code never calls `tracing` directly, it writes leveled lines to a sink. The default sink
// forwards to `tracing`; `MemorySink` keeps lines in memory so embedders and tests can read
// back exactly what a governor reported.
//
// # Usage Examples
//
// ```rust
// use pool_governor::logging;
//
// // INFO level, human-readable console output
// logging::init_default();
//
// // or JSON output for log aggregators
// logging::init_production();
// ```
//
// Lines emitted by a governor carry the `pool_governor` target, so they can be filtered with
// `RUST_LOG=pool_governor=warn`.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::str::FromStr;
use std::sync::Once;

use parking_lot::Mutex;
use pool_governor_api::ConfigError;
use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

/// Target used for every line a governor emits through [`TracingSink`].
pub const LOG_TARGET: &str = "pool_governor";

/// Configuration for the process-wide subscriber
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id
    pub show_thread_info: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            target_filters: None,
        }
    }
}

impl LogConfig {
    /// Parses a level name such as `"info"` or `"WARN"`.
    pub fn parse_level(level: &str) -> Result<Level, ConfigError> {
        Level::from_str(level.trim()).map_err(|_| ConfigError::InvalidLevel(level.to_string()))
    }

    /// Copy of this config with the level given by name.
    pub fn with_level_name(mut self, level: &str) -> Result<Self, ConfigError> {
        self.level = Self::parse_level(level)?;
        Ok(self)
    }

    fn env_filter(&self) -> EnvFilter {
        let mut env_filter = EnvFilter::from_default_env().add_directive(self.level.into());
        if let Some(filters) = &self.target_filters {
            for filter in filters.split(',') {
                if let Ok(directive) = filter.parse() {
                    env_filter = env_filter.add_directive(directive);
                }
            }
        }
        env_filter
    }
}

// Initialization guard to ensure we only initialize once
static INIT: Once = Once::new();

/// Installs the global subscriber. Only the first call in a process takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(config.env_filter());

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(registry.with(tracing_fmt::layer().json().flatten_event(true)))
        } else {
            Box::new(
                registry.with(
                    tracing_fmt::layer()
                        .with_ansi(atty::is(atty::Stream::Stdout))
                        .with_file(config.show_file_line)
                        .with_line_number(config.show_file_line)
                        .with_thread_names(config.show_thread_info)
                        .with_thread_ids(config.show_thread_info),
                ),
            )
        };

        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Installs a subscriber writing to the console and appending to `log_file`.
///
/// # Errors
/// Returns an error if the file cannot be opened or created.
pub fn init_with_file(config: LogConfig, log_file: &str) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;

    INIT.call_once(move || {
        let console_layer = tracing_fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let file_layer = tracing_fmt::layer()
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(config.env_filter())
            .with(console_layer)
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// INFO level, human-readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG level with file/line information and TRACE for the pools themselves.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        json_format: false,
        show_file_line: true,
        show_thread_info: true,
        target_filters: Some("pool_governor=debug,pool_governor::pool=trace".to_string()),
    });
}

/// JSON output without file/line information.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        target_filters: None,
    });
}

/// Warnings and errors only, to keep test output readable.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        target_filters: None,
    });
}

/// Destination for the leveled lines a governor emits.
///
/// The governor treats the sink as opaque; a sink must never panic and should not block for
/// long, because monitor ticks and worker hooks write to it.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: fmt::Arguments<'_>);

    fn info(&self, message: fmt::Arguments<'_>) {
        self.log(Level::INFO, message);
    }

    fn warn(&self, message: fmt::Arguments<'_>) {
        self.log(Level::WARN, message);
    }

    fn error(&self, message: fmt::Arguments<'_>) {
        self.log(Level::ERROR, message);
    }
}

/// Forwards every line to `tracing` under [`LOG_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: fmt::Arguments<'_>) {
        match level {
            Level::ERROR => tracing::error!(target: LOG_TARGET, "{}", message),
            Level::WARN => tracing::warn!(target: LOG_TARGET, "{}", message),
            Level::INFO => tracing::info!(target: LOG_TARGET, "{}", message),
            Level::DEBUG => tracing::debug!(target: LOG_TARGET, "{}", message),
            Level::TRACE => tracing::trace!(target: LOG_TARGET, "{}", message),
        }
    }
}

/// Keeps every line in memory, optionally echoing it to `tracing` as well.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(Level, String)>>,
    echo: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records lines and also forwards them to [`TracingSink`].
    pub fn echoing() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            echo: true,
        }
    }

    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lines.lock().iter().map(|(_, line)| line.clone()).collect()
    }

    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Number of recorded lines containing `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.lines.lock().iter().filter(|(_, line)| line.contains(needle)).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.count_containing(needle) > 0
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Level, message: fmt::Arguments<'_>) {
        let line = message.to_string();
        if self.echo {
            TracingSink.log(level, format_args!("{}", line));
        }
        self.lines.lock().push((level, line));
    }
}

macro_rules! sink_info {
    ($sink:expr, $($arg:tt)+) => {
        $sink.info(format_args!($($arg)+))
    };
}

macro_rules! sink_warn {
    ($sink:expr, $($arg:tt)+) => {
        $sink.warn(format_args!($($arg)+))
    };
}

macro_rules! sink_error {
    ($sink:expr, $($arg:tt)+) => {
        $sink.error(format_args!($($arg)+))
    };
}

pub(crate) use sink_error;
pub(crate) use sink_info;
pub(crate) use sink_warn;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_levels_in_order() {
        let sink = MemorySink::new();
        sink_info!(sink, "Thread pool '{}' stopped.", "a");
        sink_warn!(sink, "Thread pool '{}' is not scheduling!", "a");
        sink_error!(sink, "boom {}", 1);

        assert_eq!(sink.lines().len(), 3);
        assert_eq!(sink.messages_at(Level::WARN), vec!["Thread pool 'a' is not scheduling!"]);
        assert_eq!(sink.count_containing("Thread pool 'a'"), 2);
        assert!(sink.contains("boom 1"));

        sink.clear();
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn parse_level_rejects_unknown_names() {
        assert_eq!(LogConfig::parse_level("warn"), Ok(Level::WARN));
        assert_eq!(LogConfig::parse_level(" DEBUG "), Ok(Level::DEBUG));
        assert_eq!(
            LogConfig::parse_level("loud"),
            Err(ConfigError::InvalidLevel("loud".to_string()))
        );
    }

    #[test]
    fn with_level_name_keeps_other_fields() {
        let config = LogConfig {
            json_format: true,
            ..Default::default()
        }
        .with_level_name("error")
        .unwrap();
        assert_eq!(config.level, Level::ERROR);
        assert!(config.json_format);
    }
}
