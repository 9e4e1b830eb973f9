//! # Console
//!
//! The byte-sink interface diagnostics go through, a `core::fmt::Write`
//! adapter over it, and a `log::Log` implementation so the whole kernel can
//! use the `log` macros regardless of where the bytes end up.

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record};

/// A synchronous byte output (UART, stdout, test buffer).
pub trait ByteSink {
    /// Transmit `bytes`, returning how many were accepted.
    fn write_bytes(&self, bytes: &[u8]) -> usize;
}

/// `fmt::Write` over a byte sink.
pub struct Console<'a, S: ByteSink + ?Sized>(pub &'a S);

impl<S: ByteSink + ?Sized> Write for Console<'_, S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.0.write_bytes(s.as_bytes()) == s.len() {
            Ok(())
        } else {
            Err(fmt::Error)
        }
    }
}

/// Logger writing `[LEVEL] message\r\n` lines to a byte sink.
pub struct ConsoleLogger<S> {
    sink: S,
    level: LevelFilter,
}

impl<S: ByteSink> ConsoleLogger<S> {
    pub const fn new(sink: S, level: LevelFilter) -> Self {
        Self { sink, level }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: ByteSink + Send + Sync> Log for ConsoleLogger<S> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = write!(Console(&self.sink), "[{}] {}\r\n", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install `logger` as the global logger. Only the first call has any
/// effect.
pub fn init<S: ByteSink + Send + Sync>(logger: &'static ConsoleLogger<S>) {
    if log::set_logger(logger).is_ok() {
        log::set_max_level(logger.level);
    }
}
