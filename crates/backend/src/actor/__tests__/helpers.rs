//! Test helpers for coordinator integration tests.
//!
//! Provides `RecordingResource`, a scripted resource that records when each
//! call starts and ends, and `TestContext`, which spawns a coordinator over it
//! with short timeouts and an in-memory diagnostic log.

use std::{
  collections::HashSet,
  sync::{Arc, Mutex},
  time::Duration,
};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
  actor::{Coordinator, CoordinatorHandle, CoordinatorSettings, message::QueryResult},
  diagnostics::MemoryLog,
  resource::{Resource, RetryPolicy},
};

/// One edge of a resource call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
  Start(String),
  End(String),
}

/// Scripted resource that records call order.
///
/// Behavior is chosen by query prefix:
/// - `SLOW ...` sleeps for `slow_delay` before answering
/// - `FAIL ...` fails with status 500
/// - `BUSY ...` answers busy the first time it sees the query, then succeeds
/// - anything else succeeds with `"{query}: CHARLIE"`
pub struct RecordingResource {
  events: Mutex<Vec<CallEvent>>,
  busy_seen: Mutex<HashSet<String>>,
  slow_delay: Duration,
}

impl RecordingResource {
  pub fn new() -> Self {
    Self::with_slow_delay(Duration::from_millis(50))
  }

  pub fn with_slow_delay(slow_delay: Duration) -> Self {
    Self {
      events: Mutex::new(Vec::new()),
      busy_seen: Mutex::new(HashSet::new()),
      slow_delay,
    }
  }

  pub fn events(&self) -> Vec<CallEvent> {
    self.events.lock().unwrap().clone()
  }

  /// Queries in the order their calls started
  pub fn started(&self) -> Vec<String> {
    self
      .events()
      .into_iter()
      .filter_map(|e| match e {
        CallEvent::Start(q) => Some(q),
        CallEvent::End(_) => None,
      })
      .collect()
  }

  /// How many times `query` was sent to the resource
  pub fn calls_for(&self, query: &str) -> usize {
    self.started().iter().filter(|q| q.as_str() == query).count()
  }

  /// Position of an event in the record
  pub fn position(&self, event: &CallEvent) -> Option<usize> {
    self.events().iter().position(|e| e == event)
  }

  /// Highest number of calls that were in progress at the same time
  pub fn max_concurrency(&self) -> usize {
    let mut current = 0usize;
    let mut peak = 0usize;
    for event in self.events() {
      match event {
        CallEvent::Start(_) => {
          current += 1;
          peak = peak.max(current);
        }
        CallEvent::End(_) => current = current.saturating_sub(1),
      }
    }
    peak
  }

  /// Assert that nothing else started or ended while `query` was running
  pub fn assert_exclusive(&self, query: &str) {
    let events = self.events();
    let start = events
      .iter()
      .position(|e| *e == CallEvent::Start(query.to_string()))
      .unwrap_or_else(|| panic!("{} never started", query));
    let end = events
      .iter()
      .position(|e| *e == CallEvent::End(query.to_string()))
      .unwrap_or_else(|| panic!("{} never ended", query));
    assert_eq!(
      end,
      start + 1,
      "{} overlapped with other calls: {:?}",
      query,
      &events[start..=end]
    );
  }

  fn first_sighting(&self, query: &str) -> bool {
    self.busy_seen.lock().unwrap().insert(query.to_string())
  }

  fn record(&self, event: CallEvent) {
    self.events.lock().unwrap().push(event);
  }
}

#[async_trait]
impl Resource for RecordingResource {
  async fn call(&self, query: &str) -> QueryResult {
    self.record(CallEvent::Start(query.to_string()));
    let first_busy = query.starts_with("BUSY ") && self.first_sighting(query);

    let result = if query.starts_with("SLOW ") {
      tokio::time::sleep(self.slow_delay).await;
      QueryResult::success(200, query, format!("{}: CHARLIE", query))
    } else if query.starts_with("FAIL ") {
      QueryResult::failure(500, query, "rejected by resource")
    } else if first_busy {
      QueryResult::failure(429, query, "too busy")
    } else {
      // Yield so concurrent calls can interleave if the coordinator lets them
      tokio::task::yield_now().await;
      QueryResult::success(200, query, format!("{}: CHARLIE", query))
    };

    self.record(CallEvent::End(query.to_string()));
    result
  }
}

/// Settings with short timeouts for tests
pub fn test_settings() -> CoordinatorSettings {
  CoordinatorSettings {
    reader_pool_size: 8,
    queue_capacity: 256,
    max_wait_for_resource: Duration::from_secs(5),
    max_wait_for_work_unit: Duration::from_millis(200),
    retry: RetryPolicy::new(2, Duration::from_millis(5)).expect("valid retry policy"),
  }
}

/// A running coordinator over a `RecordingResource`
pub struct TestContext {
  pub handle: CoordinatorHandle,
  pub resource: Arc<RecordingResource>,
  pub log: Arc<MemoryLog>,
  pub cancel: CancellationToken,
  pub task: JoinHandle<()>,
}

impl TestContext {
  pub fn spawn() -> Self {
    Self::spawn_with(test_settings(), RecordingResource::new())
  }

  pub fn spawn_with(settings: CoordinatorSettings, resource: RecordingResource) -> Self {
    let resource = Arc::new(resource);
    let log = Arc::new(MemoryLog::new());
    let cancel = CancellationToken::new();
    let (handle, task) = Coordinator::spawn(resource.clone(), settings, log.clone(), cancel.clone());
    Self {
      handle,
      resource,
      log,
      cancel,
      task,
    }
  }

  /// Cancel the coordinator and wait for it to stop
  pub async fn shutdown(self) {
    self.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), self.task)
      .await
      .expect("coordinator should stop")
      .expect("coordinator should not panic");
  }
}

/// Await a receiver with a generous timeout so a hung test fails instead of stalling
pub async fn resolve<T>(rx: tokio::sync::oneshot::Receiver<T>) -> T {
  tokio::time::timeout(Duration::from_secs(5), rx)
    .await
    .expect("result slot should complete in time")
    .expect("result slot should not be dropped")
}
