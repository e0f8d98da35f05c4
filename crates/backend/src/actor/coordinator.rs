//! Coordinator - the single decision-making loop
//!
//! The coordinator consumes operations from the [`WorkQueue`] and enforces the
//! access rules for the resource:
//!
//! - Reads go to the [`ReaderPool`] and run in parallel
//! - Writes wait on the reader barrier, then run alone on this task
//! - A unit of work is processed to completion (or abandonment) before any
//!   other message is looked at: the loop jumps ahead in the queue for the
//!   unit's next message, parking everything else in arrival order
//!
//! ```text
//!               ┌──────────── Read / UnitRead ──────────▶ ReaderPool ─┐
//! WorkQueue ─▶ Coordinator                                            ├─▶ Resource
//!               └─ Write / UnitWrite / undo ─▶ barrier ─▶ (inline) ───┘
//! ```
//!
//! Nothing here returns an error to the caller through a panic or a dropped
//! slot. Every failure is a completed [`QueryResult::Failure`] (or `false` for
//! cancels) plus one entry in the [`DiagnosticLog`].

use std::{
  collections::{HashMap, VecDeque},
  sync::Arc,
  time::Duration,
};

use gatehouse_core::Config;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
  handle::CoordinatorHandle,
  message::{CancelReply, Operation, QueryReply, QueryResult, STATUS_ABANDONED, UnitId, UnitMessage, UnitScope},
  pool::ReaderPool,
  queue::WorkQueue,
};
use crate::{
  diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLog, TracingLog},
  resource::{Resource, ResourceError, RetryPolicy, RetryingResource},
};

/// How many ended units of work are remembered for rejecting late messages
const CLOSED_UNIT_MEMORY: usize = 4096;

type SharedResource = Arc<RetryingResource<Arc<dyn Resource>>>;

// ============================================================================
// Settings
// ============================================================================

/// Runtime settings for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
  /// Maximum concurrent reads
  pub reader_pool_size: usize,
  /// Inbound channel capacity
  pub queue_capacity: usize,
  /// Reader barrier timeout for exclusive operations
  pub max_wait_for_resource: Duration,
  /// How long an open unit of work waits for its next message
  pub max_wait_for_work_unit: Duration,
  /// Busy-retry policy for every resource call
  pub retry: RetryPolicy,
}

impl Default for CoordinatorSettings {
  fn default() -> Self {
    Self::from_config(&Config::default()).unwrap_or(Self {
      reader_pool_size: 4,
      queue_capacity: 1024,
      max_wait_for_resource: Duration::from_secs(30),
      max_wait_for_work_unit: Duration::from_secs(10),
      retry: RetryPolicy::default(),
    })
  }
}

impl CoordinatorSettings {
  pub fn from_config(config: &Config) -> Result<Self, ResourceError> {
    Ok(Self {
      reader_pool_size: config.coordinator.effective_pool_size(),
      queue_capacity: config.coordinator.queue_capacity.max(1),
      max_wait_for_resource: config.coordinator.max_wait_for_resource(),
      max_wait_for_work_unit: config.coordinator.max_wait_for_work_unit(),
      retry: RetryPolicy::from_config(&config.retry)?,
    })
  }
}

// ============================================================================
// Closed Units
// ============================================================================

/// How a unit of work ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
  /// Its last expected message was processed
  Committed,
  /// A cancel ended it
  Cancelled,
  /// A write failed or the next message never arrived
  Abandoned,
  /// The caller broke the protocol
  Rejected,
}

impl UnitOutcome {
  fn describe(self) -> &'static str {
    match self {
      Self::Committed => "committed",
      Self::Cancelled => "cancelled",
      Self::Abandoned => "abandoned",
      Self::Rejected => "rejected",
    }
  }
}

/// Bounded memory of units of work that have ended
///
/// Late messages for an ended unit are rejected instead of silently starting a
/// fresh unit under the same id.
#[derive(Debug, Default)]
struct ClosedUnits {
  outcomes: HashMap<UnitId, UnitOutcome>,
  order: VecDeque<UnitId>,
}

impl ClosedUnits {
  fn close(&mut self, unit_id: UnitId, outcome: UnitOutcome) {
    if self.outcomes.insert(unit_id, outcome).is_none() {
      self.order.push_back(unit_id);
    }
    while self.order.len() > CLOSED_UNIT_MEMORY {
      if let Some(oldest) = self.order.pop_front() {
        self.outcomes.remove(&oldest);
      }
    }
  }

  fn outcome(&self, unit_id: &UnitId) -> Option<UnitOutcome> {
    self.outcomes.get(unit_id).copied()
  }
}

/// What the unit-of-work loop does after one step
enum UnitStep {
  /// Look for the unit's next message
  Continue,
  /// The unit is over
  Finished(UnitOutcome),
}

// ============================================================================
// Coordinator
// ============================================================================

/// The coordinator actor
///
/// # Lifecycle
///
/// The actor runs until one of:
/// - The CancellationToken is triggered
/// - Every [`CoordinatorHandle`] has been dropped and the queue is drained
///
/// Operations still queued at shutdown are completed with a
/// `STATUS_ABANDONED` failure (or `false`).
pub struct Coordinator {
  queue: WorkQueue,
  pool: ReaderPool,
  resource: SharedResource,
  settings: CoordinatorSettings,
  log: Arc<dyn DiagnosticLog>,
  closed_units: ClosedUnits,
  cancel: CancellationToken,
}

impl Coordinator {
  /// Create a coordinator reading from `rx`
  ///
  /// The actor is not started until `run()` is called.
  pub fn new(
    rx: mpsc::Receiver<Operation>,
    resource: Arc<dyn Resource>,
    settings: CoordinatorSettings,
    log: Arc<dyn DiagnosticLog>,
    cancel: CancellationToken,
  ) -> Self {
    let resource = Arc::new(RetryingResource::new(resource, settings.retry));
    Self {
      queue: WorkQueue::new(rx),
      pool: ReaderPool::new(settings.reader_pool_size),
      resource,
      settings,
      log,
      closed_units: ClosedUnits::default(),
      cancel,
    }
  }

  /// Spawn the coordinator and return a handle for submitting operations
  pub fn spawn(
    resource: Arc<dyn Resource>,
    settings: CoordinatorSettings,
    log: Arc<dyn DiagnosticLog>,
    cancel: CancellationToken,
  ) -> (CoordinatorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
    let actor = Self::new(rx, resource, settings, log, cancel);
    let task = tokio::spawn(actor.run());
    (CoordinatorHandle::new(tx), task)
  }

  /// Spawn with diagnostics routed to `tracing`
  pub fn spawn_with_tracing(
    resource: Arc<dyn Resource>,
    settings: CoordinatorSettings,
    cancel: CancellationToken,
  ) -> (CoordinatorHandle, JoinHandle<()>) {
    Self::spawn(resource, settings, Arc::new(TracingLog), cancel)
  }

  /// Main actor loop
  pub async fn run(mut self) {
    info!(
      reader_pool_size = self.pool.size(),
      max_tries = self.settings.retry.max_tries(),
      max_wait_for_resource_ms = self.settings.max_wait_for_resource.as_millis(),
      max_wait_for_work_unit_ms = self.settings.max_wait_for_work_unit.as_millis(),
      "Coordinator started"
    );

    loop {
      tokio::select! {
          biased;

          _ = self.cancel.cancelled() => {
              info!("Coordinator shutting down (cancelled)");
              break;
          }

          op = self.queue.take_next() => {
              match op {
                  Some(op) => self.dispatch(op).await,
                  None => {
                      info!("Coordinator shutting down (channel closed)");
                      break;
                  }
              }
          }
      }
    }

    self.abandon_pending();
    info!(in_flight_reads = self.pool.in_flight(), "Coordinator stopped");
  }

  /// Route one operation taken from the head of the queue
  async fn dispatch(&mut self, op: Operation) {
    trace!(kind = op.kind(), "Dispatching operation");

    match op {
      Operation::Read { query, reply } => self.dispatch_read(query, reply),
      Operation::Write { query, reply } => {
        let result = self.run_exclusive(&query).await;
        complete(reply, result);
      }
      Operation::UnitRead {
        scope,
        sequence,
        query,
        reply,
      } => self.open_unit(scope, UnitMessage::Read { sequence, query, reply }).await,
      Operation::UnitWrite {
        scope,
        sequence,
        query,
        reply,
      } => self.open_unit(scope, UnitMessage::Write { sequence, query, reply }).await,
      Operation::CancelUnit { scope, undo, reply } => self.cancel_without_open_unit(scope, undo, reply).await,
    }
  }

  // ========================================================================
  // Standalone Operations
  // ========================================================================

  /// Hand a read to the pool; the coordinator doesn't wait for it
  fn dispatch_read(&self, query: String, reply: QueryReply) {
    let resource = self.resource.clone();
    let log = self.log.clone();
    self.pool.submit(async move {
      let result = resource.call(&query).await;
      if !result.is_success() {
        log.record(Diagnostic::new(
          DiagnosticKind::FailedQuery,
          format!("Read failed with status {}: {}", result.status(), query),
        ));
      }
      complete(reply, result);
    });
  }

  /// Wait for in-flight reads to drain, then run `query` on this task
  async fn run_exclusive(&self, query: &str) -> QueryResult {
    if !self.pool.await_completion(self.settings.max_wait_for_resource).await {
      let message = format!(
        "Timed out after {}ms waiting for {} in-flight reads; not executed",
        self.settings.max_wait_for_resource.as_millis(),
        self.pool.in_flight()
      );
      self.diagnose(DiagnosticKind::SlowReaders, format!("{}: {}", message, query));
      return QueryResult::timeout(query, message);
    }

    let result = self.resource.call(query).await;
    if !result.is_success() {
      self.diagnose(
        DiagnosticKind::FailedQuery,
        format!("Exclusive query failed with status {}: {}", result.status(), query),
      );
    }
    result
  }

  // ========================================================================
  // Units of Work
  // ========================================================================

  /// Start a unit of work at `first`, unless the unit has already ended
  async fn open_unit(&mut self, scope: UnitScope, first: UnitMessage) {
    if let Some(outcome) = self.closed_units.outcome(&scope.unit_id) {
      let message = format!(
        "Late {} for unit {}, which was already {}",
        first.kind(),
        scope.unit_id,
        outcome.describe()
      );
      self.diagnose(DiagnosticKind::Bug, message.clone());
      reject(first.into_operation(scope), message);
      return;
    }
    self.run_unit(scope, first).await;
  }

  /// Handle a cancel that arrives while its unit is not open
  ///
  /// An abandoned unit still gets its undo run, so a caller aborting after a
  /// failed write rolls back what the unit already wrote. Undo for a unit that
  /// ended any other way is refused.
  async fn cancel_without_open_unit(&mut self, scope: UnitScope, undo: Vec<String>, reply: CancelReply) {
    match self.closed_units.outcome(&scope.unit_id) {
      Some(UnitOutcome::Abandoned) if !undo.is_empty() => {
        debug!(unit_id = %scope.unit_id, instructions = undo.len(), "Undoing abandoned unit of work");
        let undone = self.run_undo(&scope, &undo).await;
        self.closed_units.close(scope.unit_id, UnitOutcome::Cancelled);
        complete_cancel(reply, undone);
      }
      Some(outcome) if !undo.is_empty() => {
        self.diagnose(
          DiagnosticKind::Bug,
          format!(
            "Cancel with {} undo instructions for unit {}, which was already {}; undo not run",
            undo.len(),
            scope.unit_id,
            outcome.describe()
          ),
        );
        complete_cancel(reply, false);
      }
      Some(outcome) => {
        debug!(unit_id = %scope.unit_id, outcome = outcome.describe(), "Cancel without undo for ended unit of work");
        complete_cancel(reply, true);
      }
      None => {
        self.diagnose(
          DiagnosticKind::Bug,
          format!(
            "Cancel received for unit {}, which was never started; nothing to undo",
            scope.unit_id
          ),
        );
        complete_cancel(reply, true);
      }
    }
  }

  /// Process a unit of work, starting from its first message, until it
  /// commits, is cancelled, or is abandoned
  async fn run_unit(&mut self, start: UnitScope, first: UnitMessage) {
    debug!(unit_id = %start.unit_id, expected_count = start.expected_count, "Unit of work started");

    let mut expected_sequence = 1;
    let mut current = (start, first);

    let outcome = loop {
      let (scope, message) = current;
      if let UnitStep::Finished(outcome) = self.step_unit(&start, expected_sequence, scope, message).await {
        break outcome;
      }

      match self
        .queue
        .take_next_matching(start.unit_id, self.settings.max_wait_for_work_unit)
        .await
      {
        Some(next) => {
          expected_sequence += 1;
          current = next;
        }
        None if self.queue.is_closed() => {
          info!(unit_id = %start.unit_id, "Channel closed while unit of work was open");
          break UnitOutcome::Abandoned;
        }
        None => {
          self.diagnose(
            DiagnosticKind::SlowWorkUnit,
            format!(
              "Unit {} sent no message {} of {} within {}ms; abandoned ({} other messages waiting)",
              start.unit_id,
              expected_sequence + 1,
              start.expected_count,
              self.settings.max_wait_for_work_unit.as_millis(),
              self.queue.skipped_len()
            ),
          );
          break UnitOutcome::Abandoned;
        }
      }
    };

    debug!(unit_id = %start.unit_id, outcome = outcome.describe(), "Unit of work ended");
    self.closed_units.close(start.unit_id, outcome);
  }

  /// Validate and execute one message of an open unit of work
  async fn step_unit(
    &mut self,
    start: &UnitScope,
    expected_sequence: u32,
    scope: UnitScope,
    message: UnitMessage,
  ) -> UnitStep {
    if let Err(violation) = validate_unit_message(start, expected_sequence, &scope, &message) {
      self.diagnose(DiagnosticKind::Bug, violation.clone());
      reject(message.into_operation(scope), violation);
      return UnitStep::Finished(UnitOutcome::Rejected);
    }

    match message {
      UnitMessage::Read { sequence, query, reply } => {
        self.dispatch_read(query, reply);
        if sequence == start.expected_count {
          UnitStep::Finished(UnitOutcome::Committed)
        } else {
          UnitStep::Continue
        }
      }
      UnitMessage::Write { sequence, query, reply } => {
        let result = self.run_exclusive(&query).await;
        let succeeded = result.is_success();
        complete(reply, result);
        if !succeeded {
          UnitStep::Finished(UnitOutcome::Abandoned)
        } else if sequence == start.expected_count {
          UnitStep::Finished(UnitOutcome::Committed)
        } else {
          UnitStep::Continue
        }
      }
      UnitMessage::Cancel { undo, reply } => {
        let undone = self.run_undo(start, &undo).await;
        complete_cancel(reply, undone);
        UnitStep::Finished(UnitOutcome::Cancelled)
      }
    }
  }

  /// Run every undo instruction, in order, without stopping at failures
  ///
  /// Returns true iff all of them succeeded (trivially true when empty).
  async fn run_undo(&self, start: &UnitScope, undo: &[String]) -> bool {
    if undo.is_empty() {
      debug!(unit_id = %start.unit_id, "Unit of work cancelled, keeping changes");
      return true;
    }

    if !self.pool.await_completion(self.settings.max_wait_for_resource).await {
      self.diagnose(
        DiagnosticKind::SlowReaders,
        format!(
          "Timed out after {}ms waiting for {} in-flight reads; {} undo instructions for unit {} not executed",
          self.settings.max_wait_for_resource.as_millis(),
          self.pool.in_flight(),
          undo.len(),
          start.unit_id
        ),
      );
      return false;
    }

    let mut all_succeeded = true;
    for query in undo {
      let result = self.resource.call(query).await;
      if !result.is_success() {
        self.diagnose(
          DiagnosticKind::FailedQuery,
          format!(
            "Undo for unit {} failed with status {}: {}",
            start.unit_id,
            result.status(),
            query
          ),
        );
        all_succeeded = false;
      }
    }

    debug!(unit_id = %start.unit_id, undone = all_succeeded, instructions = undo.len(), "Unit of work undone");
    all_succeeded
  }

  // ========================================================================
  // Helpers
  // ========================================================================

  fn diagnose(&self, kind: DiagnosticKind, message: String) {
    self.log.record(Diagnostic::new(kind, message));
  }

  /// Resolve every operation still queued so no caller waits forever
  fn abandon_pending(&mut self) {
    let pending = self.queue.drain();
    if pending.is_empty() {
      return;
    }

    warn!(count = pending.len(), "Abandoning queued operations at shutdown");
    for op in pending {
      match op {
        Operation::Read { query, reply }
        | Operation::Write { query, reply }
        | Operation::UnitRead { query, reply, .. }
        | Operation::UnitWrite { query, reply, .. } => {
          complete(reply, QueryResult::failure(STATUS_ABANDONED, query, "coordinator stopped"));
        }
        Operation::CancelUnit { reply, .. } => complete_cancel(reply, false),
      }
    }
  }
}

/// Check a message against the open unit of work it was matched to
fn validate_unit_message(
  start: &UnitScope,
  expected_sequence: u32,
  scope: &UnitScope,
  message: &UnitMessage,
) -> Result<(), String> {
  if scope.unit_id != start.unit_id {
    return Err(format!(
      "expected a message for unit {}, got unit {}",
      start.unit_id, scope.unit_id
    ));
  }

  if scope.expected_count != start.expected_count {
    return Err(format!(
      "unit {} expected count {}, got {}",
      start.unit_id, start.expected_count, scope.expected_count
    ));
  }

  if start.expected_count == 0 {
    return Err(format!("unit {} declared an expected count of 0", start.unit_id));
  }

  if let Some(sequence) = message.sequence() {
    if sequence != expected_sequence {
      return Err(format!(
        "unit {} expected sequence {}, got {}",
        start.unit_id, expected_sequence, sequence
      ));
    }
    if sequence > start.expected_count {
      return Err(format!(
        "unit {} sequence {} exceeds expected count {}",
        start.unit_id, sequence, start.expected_count
      ));
    }
  }
  Ok(())
}

/// Fail an operation without touching the resource
fn reject(op: Operation, message: String) {
  match op {
    Operation::Read { query, reply }
    | Operation::Write { query, reply }
    | Operation::UnitRead { query, reply, .. }
    | Operation::UnitWrite { query, reply, .. } => {
      complete(reply, QueryResult::protocol_violation(query, message));
    }
    Operation::CancelUnit { reply, .. } => complete_cancel(reply, false),
  }
}

fn complete(reply: QueryReply, result: QueryResult) {
  if let Err(result) = reply.send(result) {
    trace!(query = result.query(), "Caller dropped result slot");
  }
}

fn complete_cancel(reply: CancelReply, undone: bool) {
  if reply.send(undone).is_err() {
    trace!("Caller dropped cancel result slot");
  }
}
