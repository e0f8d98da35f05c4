//! Handles for talking to the coordinator
//!
//! [`CoordinatorHandle`] is cheap to clone and wraps the inbound channel.
//! [`WorkUnit`] stamps a unit id, declared size and running sequence number
//! onto each operation so callers never build unit-of-work messages by hand.

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::message::{Operation, QueryResult, UnitId, UnitScope};

// ============================================================================
// Coordinator Handle
// ============================================================================

/// Handle to communicate with a running coordinator
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
  pub tx: mpsc::Sender<Operation>,
}

impl CoordinatorHandle {
  /// Create a new handle from a sender
  pub fn new(tx: mpsc::Sender<Operation>) -> Self {
    Self { tx }
  }

  /// Enqueue a raw operation
  pub async fn submit(&self, op: Operation) -> Result<(), SendError> {
    self.tx.send(op).await.map_err(|_| SendError::ActorGone)
  }

  /// Run a standalone read and wait for its result
  pub async fn read(&self, query: impl Into<String>) -> Result<QueryResult, SendError> {
    let (op, rx) = Operation::read(query);
    self.submit(op).await?;
    await_result(rx).await
  }

  /// Run a standalone write and wait for its result
  pub async fn write(&self, query: impl Into<String>) -> Result<QueryResult, SendError> {
    let (op, rx) = Operation::write(query);
    self.submit(op).await?;
    await_result(rx).await
  }

  /// Start a unit of work of `expected_count` operations
  ///
  /// Nothing is sent until the first operation is issued.
  pub fn begin_unit(&self, expected_count: u32) -> WorkUnit {
    WorkUnit {
      handle: self.clone(),
      scope: UnitScope::new(UnitId::new(), expected_count),
      next_sequence: 1,
      ended: false,
    }
  }

  /// True once the coordinator has stopped accepting operations
  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }
}

/// Wait for a query result slot to be completed
pub async fn await_result(rx: oneshot::Receiver<QueryResult>) -> Result<QueryResult, SendError> {
  rx.await.map_err(|_| SendError::ReplyDropped)
}

/// Wait for a cancel result slot to be completed
pub async fn await_cancel(rx: oneshot::Receiver<bool>) -> Result<bool, SendError> {
  rx.await.map_err(|_| SendError::ReplyDropped)
}

// ============================================================================
// Unit of Work
// ============================================================================

/// Caller-side builder for one unit of work
///
/// Operations are numbered 1, 2, 3, ... in the order they are issued. Their
/// results come back as receivers so reads can be pipelined; the coordinator
/// resolves them in sequence.
#[derive(Debug)]
pub struct WorkUnit {
  handle: CoordinatorHandle,
  scope: UnitScope,
  next_sequence: u32,
  /// A cancel or abort was sent
  ended: bool,
}

impl WorkUnit {
  pub fn unit_id(&self) -> UnitId {
    self.scope.unit_id
  }

  pub fn scope(&self) -> UnitScope {
    self.scope
  }

  /// Number of operations issued so far
  pub fn sent(&self) -> u32 {
    self.next_sequence - 1
  }

  /// True once every declared operation has been issued
  pub fn is_complete(&self) -> bool {
    self.sent() >= self.scope.expected_count
  }

  /// Issue the next operation as a read
  pub async fn read(&mut self, query: impl Into<String>) -> Result<oneshot::Receiver<QueryResult>, SendError> {
    let sequence = self.claim_sequence()?;
    let (op, rx) = Operation::unit_read(self.scope, sequence, query);
    self.handle.submit(op).await?;
    Ok(rx)
  }

  /// Issue the next operation as a write
  pub async fn write(&mut self, query: impl Into<String>) -> Result<oneshot::Receiver<QueryResult>, SendError> {
    let sequence = self.claim_sequence()?;
    let (op, rx) = Operation::unit_write(self.scope, sequence, query);
    self.handle.submit(op).await?;
    Ok(rx)
  }

  /// End the unit early, keeping the changes made so far
  pub async fn cancel(self) -> Result<oneshot::Receiver<bool>, SendError> {
    self.end(Vec::new()).await
  }

  /// End the unit early and run `undo`, in order, to roll back its writes
  ///
  /// `undo` must not be empty; use [`WorkUnit::cancel`] to keep changes.
  pub async fn abort(self, undo: Vec<String>) -> Result<oneshot::Receiver<bool>, SendError> {
    if undo.is_empty() {
      return Err(SendError::EmptyUndo);
    }
    self.end(undo).await
  }

  async fn end(mut self, undo: Vec<String>) -> Result<oneshot::Receiver<bool>, SendError> {
    let (op, rx) = Operation::cancel_unit(self.scope, undo);
    self.handle.submit(op).await?;
    self.ended = true;
    Ok(rx)
  }

  fn claim_sequence(&mut self) -> Result<u32, SendError> {
    if self.is_complete() {
      return Err(SendError::UnitExhausted {
        expected_count: self.scope.expected_count,
      });
    }
    let sequence = self.next_sequence;
    self.next_sequence += 1;
    Ok(sequence)
  }
}

impl Drop for WorkUnit {
  fn drop(&mut self) {
    if !self.ended && self.sent() > 0 && !self.is_complete() {
      warn!(
        unit_id = %self.scope.unit_id,
        sent = self.sent(),
        expected_count = self.scope.expected_count,
        "Unit of work dropped before all operations were issued; the coordinator will abandon it"
      );
    }
  }
}

// ============================================================================
// Errors
// ============================================================================

/// Error when talking to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
  #[error("Coordinator has shut down")]
  ActorGone,
  #[error("Coordinator dropped the result slot")]
  ReplyDropped,
  #[error("Unit of work already issued all {expected_count} operations")]
  UnitExhausted { expected_count: u32 },
  #[error("Abort needs at least one undo instruction; use cancel to keep changes")]
  EmptyUndo,
}
