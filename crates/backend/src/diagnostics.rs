//! Diagnostic log for conditions callers should know about
//!
//! The coordinator never fails loudly: protocol violations, stalled units of
//! work, slow readers and failed queries are resolved as ordinary results.
//! Each such condition is also appended to a [`DiagnosticLog`] so it can be
//! collected somewhere an operator will see it.

use std::{fmt, sync::Mutex};

use tracing::{error, warn};

/// Category of a diagnostic entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
  /// The caller broke the unit-of-work protocol
  Bug,
  /// A unit of work stopped sending messages before it completed
  SlowWorkUnit,
  /// In-flight reads did not drain in time for an exclusive operation
  SlowReaders,
  /// The resource rejected a query
  FailedQuery,
}

impl fmt::Display for DiagnosticKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Bug => "BUG",
      Self::SlowWorkUnit => "SLOW_WORK_UNIT",
      Self::SlowReaders => "SLOW_READERS",
      Self::FailedQuery => "FAILED_QUERY",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
  pub kind: DiagnosticKind,
  pub message: String,
}

impl Diagnostic {
  pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.kind, self.message)
  }
}

/// Append-only sink for diagnostics. The coordinator never reads it back.
pub trait DiagnosticLog: Send + Sync {
  fn record(&self, diagnostic: Diagnostic);
}

/// Routes diagnostics into `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl DiagnosticLog for TracingLog {
  fn record(&self, diagnostic: Diagnostic) {
    match diagnostic.kind {
      DiagnosticKind::Bug => error!(kind = %diagnostic.kind, "{}", diagnostic.message),
      DiagnosticKind::SlowWorkUnit | DiagnosticKind::SlowReaders | DiagnosticKind::FailedQuery => {
        warn!(kind = %diagnostic.kind, "{}", diagnostic.message)
      }
    }
  }
}

/// Keeps diagnostics in memory
#[derive(Debug, Default)]
pub struct MemoryLog {
  entries: Mutex<Vec<Diagnostic>>,
}

impl MemoryLog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Snapshot of everything recorded so far, oldest first
  pub fn entries(&self) -> Vec<Diagnostic> {
    self.entries.lock().map(|e| e.clone()).unwrap_or_default()
  }

  pub fn count(&self, kind: DiagnosticKind) -> usize {
    self
      .entries
      .lock()
      .map(|e| e.iter().filter(|d| d.kind == kind).count())
      .unwrap_or(0)
  }
}

impl DiagnosticLog for MemoryLog {
  fn record(&self, diagnostic: Diagnostic) {
    if let Ok(mut entries) = self.entries.lock() {
      entries.push(diagnostic);
    }
  }
}
