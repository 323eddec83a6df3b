//! Injected reporting sink.
//!
//! Decoding, timing and store lookups report unusual-but-recoverable
//! conditions through a [`Diagnostics`] handle supplied by the caller rather
//! than a process-wide logger.

use std::sync::{Arc, Mutex};

use log::Level;

use crate::logging::{DECODE_NAMESPACE, GPS_NAMESPACE, STORE_NAMESPACE, TIMING_NAMESPACE};

/// Which component raised a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Decode,
    Timing,
    Gps,
    Store,
}

impl Source {
    pub fn target(self) -> &'static str {
        match self {
            Source::Decode => DECODE_NAMESPACE,
            Source::Timing => TIMING_NAMESPACE,
            Source::Gps => GPS_NAMESPACE,
            Source::Store => STORE_NAMESPACE,
        }
    }
}

pub trait Diagnostics: Send + Sync {
    fn report(&self, level: Level, source: Source, message: &str);

    fn warn(&self, source: Source, message: &str) {
        self.report(Level::Warn, source, message);
    }

    fn info(&self, source: Source, message: &str) {
        self.report(Level::Info, source, message);
    }

    fn debug(&self, source: Source, message: &str) {
        self.report(Level::Debug, source, message);
    }
}

pub type SharedDiagnostics = Arc<dyn Diagnostics>;

/// Forwards to the `log` facade, one target per [`Source`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn report(&self, level: Level, source: Source, message: &str) {
        log::log!(target: source.target(), level, "{message}");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullDiagnostics;

impl Diagnostics for NullDiagnostics {
    fn report(&self, _: Level, _: Source, _: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub level: Level,
    pub source: Source,
    pub message: String,
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct CollectingDiagnostics {
    reports: Mutex<Vec<Report>>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.reports().into_iter().map(|r| r.message).collect()
    }

    pub fn from_source(&self, source: Source) -> Vec<String> {
        self.reports()
            .into_iter()
            .filter(|r| r.source == source)
            .map(|r| r.message)
            .collect()
    }
}

impl Diagnostics for CollectingDiagnostics {
    fn report(&self, level: Level, source: Source, message: &str) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(Report {
                level,
                source,
                message: message.to_string(),
            });
        }
    }
}

pub fn log_diagnostics() -> SharedDiagnostics {
    Arc::new(LogDiagnostics)
}

pub fn null_diagnostics() -> SharedDiagnostics {
    Arc::new(NullDiagnostics)
}
