//! Reader pool
//!
//! Runs independent reads on spawned tasks, at most `size` at a time, and
//! tracks how many are still in flight. The in-flight count is the reader
//! barrier: before an exclusive operation the coordinator waits for it to
//! reach zero.
//!
//! A read counts as in flight from the moment it is submitted (even while it
//! waits for a permit) until its task finishes, including by panicking.
//! Timing out on the barrier never cancels reads; they keep running and are
//! still counted.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
  sync::{Semaphore, watch},
  task::JoinHandle,
};
use tracing::trace;

/// Handle to one submitted read
#[derive(Debug)]
pub struct ReadHandle {
  handle: JoinHandle<()>,
}

impl ReadHandle {
  /// Wait for this read to finish. Returns false if its task panicked.
  pub async fn wait(self) -> bool {
    self.handle.await.is_ok()
  }

  pub fn is_finished(&self) -> bool {
    self.handle.is_finished()
  }
}

/// Decrements the in-flight count when the task holding it ends
struct InFlightGuard {
  in_flight: Arc<watch::Sender<usize>>,
}

impl InFlightGuard {
  fn enter(in_flight: Arc<watch::Sender<usize>>) -> Self {
    in_flight.send_modify(|n| *n += 1);
    Self { in_flight }
  }
}

impl Drop for InFlightGuard {
  fn drop(&mut self) {
    self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
  }
}

/// Bounded pool for parallel reads
#[derive(Debug)]
pub struct ReaderPool {
  permits: Arc<Semaphore>,
  in_flight: Arc<watch::Sender<usize>>,
  size: usize,
}

impl ReaderPool {
  /// Create a pool running at most `size` reads at once (minimum 1)
  pub fn new(size: usize) -> Self {
    let size = size.max(1);
    let (in_flight, _) = watch::channel(0);
    Self {
      permits: Arc::new(Semaphore::new(size)),
      in_flight: Arc::new(in_flight),
      size,
    }
  }

  pub fn size(&self) -> usize {
    self.size
  }

  /// Run `task` on the pool
  ///
  /// The read is counted as in flight before this returns, so a barrier taken
  /// right after `submit` always waits for it.
  pub fn submit<F>(&self, task: F) -> ReadHandle
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let guard = InFlightGuard::enter(self.in_flight.clone());
    let permits = self.permits.clone();

    let handle = tokio::spawn(async move {
      let _guard = guard;
      // The semaphore is never closed, so acquiring only fails if the pool is torn down
      let Ok(_permit) = permits.acquire_owned().await else {
        return;
      };
      task.await;
    });

    trace!(in_flight = self.in_flight(), "Read submitted to pool");
    ReadHandle { handle }
  }

  /// Number of reads submitted but not yet finished
  pub fn in_flight(&self) -> usize {
    *self.in_flight.borrow()
  }

  /// Non-blocking: true iff no submitted read is still running
  pub fn are_all_done(&self) -> bool {
    self.in_flight() == 0
  }

  /// Wait until every submitted read has finished, up to `timeout`
  ///
  /// Returns true iff they all finished in time. Reads still running when the
  /// timeout hits stay tracked and keep running.
  pub async fn await_completion(&self, timeout: Duration) -> bool {
    let mut rx = self.in_flight.subscribe();
    match tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0)).await {
      Ok(result) => result.is_ok(),
      Err(_) => false,
    }
  }
}
