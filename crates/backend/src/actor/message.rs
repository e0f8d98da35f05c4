//! Message types exchanged between callers and the coordinator
//!
//! Every operation carries a one-shot result slot. The coordinator completes
//! each slot exactly once; the caller awaits the paired receiver.
//!
//! ```text
//! caller ──Operation──▶ queue ──▶ coordinator ──▶ resource
//!   ▲                                  │
//!   └────────── QueryResult ◀──────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

// ============================================================================
// Status Codes
// ============================================================================

/// Status of a successful resource call
pub const STATUS_OK: i32 = 200;

/// The resource is too busy to serve the call; it may be retried
pub const STATUS_BUSY: i32 = 429;

/// The reader barrier timed out before the operation could run (synthetic)
pub const STATUS_TIMEOUT: i32 = -1;

/// The caller broke the unit-of-work protocol (synthetic)
pub const STATUS_PROTOCOL: i32 = -2;

/// The coordinator stopped before the operation was resolved (synthetic)
pub const STATUS_ABANDONED: i32 = -3;

// ============================================================================
// Results
// ============================================================================

/// Outcome of one query against the resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueryResult {
  Success { status: i32, query: String, response: String },
  Failure { status: i32, query: String, message: String },
}

impl QueryResult {
  pub fn success(status: i32, query: impl Into<String>, response: impl Into<String>) -> Self {
    Self::Success {
      status,
      query: query.into(),
      response: response.into(),
    }
  }

  pub fn failure(status: i32, query: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Failure {
      status,
      query: query.into(),
      message: message.into(),
    }
  }

  /// Synthetic failure for an operation whose reader barrier timed out
  pub fn timeout(query: impl Into<String>, message: impl Into<String>) -> Self {
    Self::failure(STATUS_TIMEOUT, query, message)
  }

  /// Synthetic failure for a unit-of-work protocol violation
  pub fn protocol_violation(query: impl Into<String>, message: impl Into<String>) -> Self {
    Self::failure(STATUS_PROTOCOL, query, message)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Self::Success { .. })
  }

  /// True for a failure the resource reported as transient
  pub fn is_busy(&self) -> bool {
    matches!(self, Self::Failure { status, .. } if *status == STATUS_BUSY)
  }

  pub fn status(&self) -> i32 {
    match self {
      Self::Success { status, .. } | Self::Failure { status, .. } => *status,
    }
  }

  pub fn query(&self) -> &str {
    match self {
      Self::Success { query, .. } | Self::Failure { query, .. } => query,
    }
  }
}

/// Result slot for query operations
pub type QueryReply = oneshot::Sender<QueryResult>;

/// Result slot for cancel operations: true iff every undo instruction succeeded
pub type CancelReply = oneshot::Sender<bool>;

// ============================================================================
// Unit of Work Identity
// ============================================================================

/// Opaque identifier shared by every operation of one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId(Uuid);

impl UnitId {
  pub fn new() -> Self {
    Self(Uuid::new_v4())
  }

  pub fn as_uuid(&self) -> &Uuid {
    &self.0
  }
}

impl Default for UnitId {
  fn default() -> Self {
    Self::new()
  }
}

impl From<Uuid> for UnitId {
  fn from(uuid: Uuid) -> Self {
    Self(uuid)
  }
}

impl fmt::Display for UnitId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

/// Identity and declared size of a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitScope {
  pub unit_id: UnitId,
  /// Total operations the caller intends to send (>= 1)
  pub expected_count: u32,
}

impl UnitScope {
  pub fn new(unit_id: UnitId, expected_count: u32) -> Self {
    Self {
      unit_id,
      expected_count,
    }
  }
}

// ============================================================================
// Operations
// ============================================================================

/// A caller-submitted operation
#[derive(Debug)]
pub enum Operation {
  /// Standalone read; may run in parallel with other reads
  Read { query: String, reply: QueryReply },
  /// Standalone write; runs exclusively
  Write { query: String, reply: QueryReply },
  /// Read belonging to a unit of work
  UnitRead {
    scope: UnitScope,
    /// 1-based position within the unit
    sequence: u32,
    query: String,
    reply: QueryReply,
  },
  /// Write belonging to a unit of work; runs exclusively
  UnitWrite {
    scope: UnitScope,
    /// 1-based position within the unit
    sequence: u32,
    query: String,
    reply: QueryReply,
  },
  /// Ends a unit of work. An empty `undo` list keeps its changes.
  CancelUnit {
    scope: UnitScope,
    undo: Vec<String>,
    reply: CancelReply,
  },
}

impl Operation {
  /// Build a standalone read and the receiver for its result
  pub fn read(query: impl Into<String>) -> (Self, oneshot::Receiver<QueryResult>) {
    let (reply, rx) = oneshot::channel();
    (
      Self::Read {
        query: query.into(),
        reply,
      },
      rx,
    )
  }

  /// Build a standalone write and the receiver for its result
  pub fn write(query: impl Into<String>) -> (Self, oneshot::Receiver<QueryResult>) {
    let (reply, rx) = oneshot::channel();
    (
      Self::Write {
        query: query.into(),
        reply,
      },
      rx,
    )
  }

  pub fn unit_read(
    scope: UnitScope,
    sequence: u32,
    query: impl Into<String>,
  ) -> (Self, oneshot::Receiver<QueryResult>) {
    let (reply, rx) = oneshot::channel();
    (
      Self::UnitRead {
        scope,
        sequence,
        query: query.into(),
        reply,
      },
      rx,
    )
  }

  pub fn unit_write(
    scope: UnitScope,
    sequence: u32,
    query: impl Into<String>,
  ) -> (Self, oneshot::Receiver<QueryResult>) {
    let (reply, rx) = oneshot::channel();
    (
      Self::UnitWrite {
        scope,
        sequence,
        query: query.into(),
        reply,
      },
      rx,
    )
  }

  pub fn cancel_unit(scope: UnitScope, undo: Vec<String>) -> (Self, oneshot::Receiver<bool>) {
    let (reply, rx) = oneshot::channel();
    (Self::CancelUnit { scope, undo, reply }, rx)
  }

  /// Unit-of-work scope, if this operation belongs to one
  pub fn scope(&self) -> Option<&UnitScope> {
    match self {
      Self::Read { .. } | Self::Write { .. } => None,
      Self::UnitRead { scope, .. } | Self::UnitWrite { scope, .. } | Self::CancelUnit { scope, .. } => Some(scope),
    }
  }

  pub fn unit_id(&self) -> Option<UnitId> {
    self.scope().map(|scope| scope.unit_id)
  }

  /// The query string; `None` for cancel operations
  pub fn query(&self) -> Option<&str> {
    match self {
      Self::Read { query, .. }
      | Self::Write { query, .. }
      | Self::UnitRead { query, .. }
      | Self::UnitWrite { query, .. } => Some(query),
      Self::CancelUnit { .. } => None,
    }
  }

  /// Short name for logs
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Read { .. } => "read",
      Self::Write { .. } => "write",
      Self::UnitRead { .. } => "unit_read",
      Self::UnitWrite { .. } => "unit_write",
      Self::CancelUnit { .. } => "cancel_unit",
    }
  }

  /// Split a unit-of-work operation into its scope and the rest
  ///
  /// Standalone reads and writes come back unchanged as `Err`.
  pub fn into_unit(self) -> Result<(UnitScope, UnitMessage), Self> {
    match self {
      Self::UnitRead {
        scope,
        sequence,
        query,
        reply,
      } => Ok((scope, UnitMessage::Read { sequence, query, reply })),
      Self::UnitWrite {
        scope,
        sequence,
        query,
        reply,
      } => Ok((scope, UnitMessage::Write { sequence, query, reply })),
      Self::CancelUnit { scope, undo, reply } => Ok((scope, UnitMessage::Cancel { undo, reply })),
      op @ (Self::Read { .. } | Self::Write { .. }) => Err(op),
    }
  }
}

/// A unit-of-work operation without its scope
#[derive(Debug)]
pub enum UnitMessage {
  Read { sequence: u32, query: String, reply: QueryReply },
  Write { sequence: u32, query: String, reply: QueryReply },
  Cancel { undo: Vec<String>, reply: CancelReply },
}

impl UnitMessage {
  /// Position within the unit; `None` for cancels
  pub fn sequence(&self) -> Option<u32> {
    match self {
      Self::Read { sequence, .. } | Self::Write { sequence, .. } => Some(*sequence),
      Self::Cancel { .. } => None,
    }
  }

  pub fn query(&self) -> Option<&str> {
    match self {
      Self::Read { query, .. } | Self::Write { query, .. } => Some(query),
      Self::Cancel { .. } => None,
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Self::Read { .. } => "unit_read",
      Self::Write { .. } => "unit_write",
      Self::Cancel { .. } => "cancel_unit",
    }
  }

  /// Reattach the scope
  pub fn into_operation(self, scope: UnitScope) -> Operation {
    match self {
      Self::Read { sequence, query, reply } => Operation::UnitRead {
        scope,
        sequence,
        query,
        reply,
      },
      Self::Write { sequence, query, reply } => Operation::UnitWrite {
        scope,
        sequence,
        query,
        reply,
      },
      Self::Cancel { undo, reply } => Operation::CancelUnit { scope, undo, reply },
    }
  }
}
