//! Operator-facing progress output and process-wide log setup.
//!
//! Library diagnostics go through the `log` facade. Progress that an
//! operator should see while a migration runs goes through a [`LogSink`]
//! handed to the engine, so embedding code decides where it ends up.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Destination for engine progress lines.
pub trait LogSink: Send + Sync {
    fn log(&self, args: fmt::Arguments<'_>);
}

/// Write a formatted line to a [`LogSink`].
#[macro_export]
macro_rules! sink_log {
    ($sink:expr, $($arg:tt)*) => {
        $sink.log(format_args!($($arg)*))
    };
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _args: fmt::Arguments<'_>) {}
}

/// Prints each line to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn log(&self, args: fmt::Arguments<'_>) {
        println!("{args}");
    }
}

/// Forwards lines to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, args: fmt::Arguments<'_>) {
        tracing::info!(target: "town_migrate::progress", "{}", args);
    }
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, args: fmt::Arguments<'_>) {
        self.lines.lock().push(args.to_string());
    }
}

/// Install the global `tracing` subscriber for the binary.
///
/// `RUST_LOG` overrides the level picked from the `-v` count. Records sent
/// through the `log` facade are captured as well. Calling this twice is
/// harmless.
pub fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity).into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn level_from_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}
