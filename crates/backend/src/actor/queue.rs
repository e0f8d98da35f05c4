//! Search-capable operation queue
//!
//! Wraps the inbound channel with a spill-over buffer. While the coordinator is
//! looking for the next message of an open unit of work it pulls unrelated
//! messages off the channel and parks them, in arrival order, in the buffer.
//! Plain dequeues drain the buffer before touching the channel again, so every
//! message that was skipped is still delivered in the order it arrived.
//!
//! ```text
//! channel:  [a1] [r] [b1] [a2] [w]
//! take_next_matching(a) after a1 ─▶ a2, skipped = [r] [b1]
//! take_next() ─▶ r, then b1, then w
//! ```

use std::{collections::VecDeque, time::Duration};

use tokio::{sync::mpsc, time::Instant};
use tracing::trace;

use super::message::{Operation, UnitId, UnitMessage, UnitScope};

/// FIFO queue of operations that can jump ahead to a specific unit of work
///
/// The queue has exactly one consumer (the coordinator), which owns it, so the
/// skip list needs no lock of its own.
#[derive(Debug)]
pub struct WorkQueue {
  rx: mpsc::Receiver<Operation>,
  /// Messages pulled off the channel but not yet handed out, oldest first
  skipped: VecDeque<Operation>,
  /// All senders are gone and the channel is drained
  closed: bool,
}

impl WorkQueue {
  pub fn new(rx: mpsc::Receiver<Operation>) -> Self {
    Self {
      rx,
      skipped: VecDeque::new(),
      closed: false,
    }
  }

  /// Next operation in arrival order
  ///
  /// Returns parked messages first; otherwise waits on the channel. Returns
  /// `None` once every sender is gone and nothing is left to deliver.
  pub async fn take_next(&mut self) -> Option<Operation> {
    if let Some(op) = self.skipped.pop_front() {
      return Some(op);
    }
    if self.closed {
      return None;
    }

    let op = self.rx.recv().await;
    if op.is_none() {
      self.closed = true;
    }
    op
  }

  /// First not-yet-delivered operation belonging to `unit_id`, split into its
  /// scope and message
  ///
  /// Searches the parked messages first, then keeps reading from the channel,
  /// parking everything that doesn't match, until a match arrives or `timeout`
  /// elapses. A match is returned directly and never parked. On timeout (or a
  /// closed channel) returns `None`; messages parked in the meantime stay
  /// available to later calls in their original order.
  pub async fn take_next_matching(&mut self, unit_id: UnitId, timeout: Duration) -> Option<(UnitScope, UnitMessage)> {
    if let Some(found) = self.take_skipped(unit_id) {
      trace!(unit_id = %unit_id, "Found unit message among skipped");
      return Some(found);
    }
    if self.closed {
      return None;
    }

    let deadline = Instant::now() + timeout;
    loop {
      match tokio::time::timeout_at(deadline, self.rx.recv()).await {
        Ok(Some(op)) => match op.into_unit() {
          Ok((scope, message)) if scope.unit_id == unit_id => return Some((scope, message)),
          Ok((scope, message)) => self.park(unit_id, message.into_operation(scope)),
          Err(op) => self.park(unit_id, op),
        },
        Ok(None) => {
          self.closed = true;
          return None;
        }
        Err(_) => return None,
      }
    }
  }

  /// Remove the oldest parked message of `unit_id`, keeping the rest in order
  fn take_skipped(&mut self, unit_id: UnitId) -> Option<(UnitScope, UnitMessage)> {
    if !self.skipped.iter().any(|op| op.unit_id() == Some(unit_id)) {
      return None;
    }

    let mut found = None;
    let mut rest = VecDeque::with_capacity(self.skipped.len());
    for op in self.skipped.drain(..) {
      if found.is_some() {
        rest.push_back(op);
        continue;
      }
      match op.into_unit() {
        Ok((scope, message)) if scope.unit_id == unit_id => found = Some((scope, message)),
        Ok((scope, message)) => rest.push_back(message.into_operation(scope)),
        Err(op) => rest.push_back(op),
      }
    }
    self.skipped = rest;
    found
  }

  fn park(&mut self, unit_id: UnitId, op: Operation) {
    trace!(unit_id = %unit_id, kind = op.kind(), "Parking message while searching for unit");
    self.skipped.push_back(op);
  }

  /// Number of parked messages
  pub fn skipped_len(&self) -> usize {
    self.skipped.len()
  }

  /// True once every sender has been dropped and the channel is drained
  ///
  /// Parked messages may still be waiting; see [`WorkQueue::skipped_len`].
  pub fn is_closed(&self) -> bool {
    self.closed
  }

  /// Drain everything still queued, parked messages first
  ///
  /// Used on shutdown so pending callers can be told their operation was
  /// abandoned instead of waiting forever.
  pub fn drain(&mut self) -> Vec<Operation> {
    let mut drained: Vec<Operation> = self.skipped.drain(..).collect();
    self.rx.close();
    while let Ok(op) = self.rx.try_recv() {
      drained.push(op);
    }
    self.closed = true;
    drained
  }
}
