//! Console logger.
//!
//! Backs the `log` facade with one `"[LEVEL] message"` line per record,
//! written to a console sink supplied at boot.

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Where log lines go.
pub type Sink = &'static mut (dyn Write + Send);

static SINK: Mutex<Option<Sink>> = Mutex::new(None);

static LOGGER: ConsoleLogger = ConsoleLogger;

/// `log` backend writing to the registered sink.
pub struct ConsoleLogger;

/// Fixed-width prefix for a level.
pub fn level_prefix(level: Level) -> &'static str {
    match level {
        Level::Trace => "[TRACE]",
        Level::Debug => "[DEBUG]",
        Level::Info => "[INFO ]",
        Level::Warn => "[WARN ]",
        Level::Error => "[ERROR]",
    }
}

/// Format one log line.
pub fn write_record<W: Write + ?Sized>(
    out: &mut W,
    level: Level,
    args: fmt::Arguments<'_>,
) -> fmt::Result {
    writeln!(out, "{} {}", level_prefix(level), args)
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = SINK.lock().as_mut() {
            // A console that refuses output has nowhere to report it.
            let _ = write_record(&mut **sink, record.level(), *record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the console logger.
///
/// The sink is replaced on every call; the logger itself can only be
/// registered once.
pub fn init(sink: Sink, level: LevelFilter) -> Result<(), SetLoggerError> {
    *SINK.lock() = Some(sink);
    log::set_max_level(level);
    log::set_logger(&LOGGER)
}
