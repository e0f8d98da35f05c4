//! In-memory key/value store used as the demo resource
//!
//! Understands three queries:
//!
//! ```text
//! READ <key>           200 with the value, 404 if missing
//! WRITE <key> <value>  200, stores the value
//! DELETE <key>         200 if removed, 404 if missing
//! ```
//!
//! Anything else fails with 400. Every `busy_every`-th call answers 429
//! regardless of the query so the coordinator's retry path gets exercised.

use std::{
  collections::HashMap,
  sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use gatehouse::{QueryResult, Resource};
use tracing::trace;

pub struct KvResource {
  entries: Mutex<HashMap<String, String>>,
  calls: AtomicU64,
  busy_every: u64,
  latency: Duration,
}

impl KvResource {
  /// `busy_every == 0` disables busy answers
  pub fn new(busy_every: u64, latency: Duration) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      calls: AtomicU64::new(0),
      busy_every,
      latency,
    }
  }

  /// Total calls received, including busy answers
  pub fn calls(&self) -> u64 {
    self.calls.load(Ordering::Relaxed)
  }

  fn execute(&self, query: &str) -> QueryResult {
    let mut parts = query.splitn(3, ' ');
    let verb = parts.next().unwrap_or_default();
    let key = parts.next();
    let value = parts.next();

    let Ok(mut entries) = self.entries.lock() else {
      return QueryResult::failure(500, query, "store lock poisoned");
    };

    match (verb, key, value) {
      ("READ", Some(key), None) => match entries.get(key) {
        Some(value) => QueryResult::success(200, query, value.clone()),
        None => QueryResult::failure(404, query, format!("no such key: {}", key)),
      },
      ("WRITE", Some(key), Some(value)) => {
        entries.insert(key.to_string(), value.to_string());
        QueryResult::success(200, query, "OK")
      }
      ("DELETE", Some(key), None) => match entries.remove(key) {
        Some(_) => QueryResult::success(200, query, "OK"),
        None => QueryResult::failure(404, query, format!("no such key: {}", key)),
      },
      _ => QueryResult::failure(400, query, "unrecognised query"),
    }
  }
}

#[async_trait]
impl Resource for KvResource {
  async fn call(&self, query: &str) -> QueryResult {
    let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }

    if self.busy_every > 0 && call % self.busy_every == 0 {
      trace!(call, query, "Answering busy");
      return QueryResult::failure(429, query, "store busy");
    }

    self.execute(query)
  }
}
