//! Demo command: run a coordinator against the in-memory store

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use futures::future::join_all;
use gatehouse::{
  Config, Coordinator, CoordinatorHandle, CoordinatorSettings, QueryResult, actor::handle::await_result,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::kv::KvResource;

/// Every this-many calls the store answers busy
const BUSY_EVERY: u64 = 7;

/// Simulated latency per store call
const STORE_LATENCY: Duration = Duration::from_millis(25);

pub struct DemoOptions {
  /// Parallel reads issued ahead of the standalone write
  pub reads: usize,
  /// Print results as JSON lines
  pub json: bool,
}

/// Run the demonstration scenario and print every result
pub async fn cmd_demo(config: &Config, options: DemoOptions) -> Result<()> {
  let settings = CoordinatorSettings::from_config(config).context("Invalid retry settings")?;
  let store = Arc::new(KvResource::new(BUSY_EVERY, STORE_LATENCY));
  let cancel = CancellationToken::new();
  let (handle, task) = Coordinator::spawn_with_tracing(store.clone(), settings, cancel.clone());

  let printer = Printer { json: options.json };

  printer.section("Seed");
  for query in ["WRITE balance 100", "WRITE owner CHARLIE"] {
    let result = handle.write(query).await.context("Coordinator stopped")?;
    printer.result(&result)?;
  }

  printer.section("Parallel reads, then a write");
  run_reads_then_write(&handle, options.reads, &printer).await?;

  printer.section("Unit of work, cancelled with undo");
  run_cancelled_unit(&handle, &printer).await?;

  printer.section("Final state");
  for query in ["READ balance", "READ owner"] {
    let result = handle.read(query).await.context("Coordinator stopped")?;
    printer.result(&result)?;
  }

  cancel.cancel();
  task.await.context("Coordinator task panicked")?;
  info!(store_calls = store.calls(), "Demo finished");
  Ok(())
}

/// Issue `reads` reads without waiting, then a write that must wait for all of them
async fn run_reads_then_write(handle: &CoordinatorHandle, reads: usize, printer: &Printer) -> Result<()> {
  let pending = (0..reads).map(|i| {
    let handle = handle.clone();
    let key = if i % 2 == 0 { "balance" } else { "owner" };
    async move { handle.read(format!("READ {}", key)).await }
  });
  let write = handle.write("WRITE balance 120");

  let (results, write) = tokio::join!(join_all(pending), write);
  for result in results {
    printer.result(&result.context("Coordinator stopped")?)?;
  }
  printer.result(&write.context("Coordinator stopped")?)?;
  Ok(())
}

/// Open a unit of three operations, issue two, then cancel with an undo
async fn run_cancelled_unit(handle: &CoordinatorHandle, printer: &Printer) -> Result<()> {
  let mut unit = handle.begin_unit(3);

  let read = unit.read("READ balance").await.context("Coordinator stopped")?;
  let read = await_result(read).await.context("Coordinator stopped")?;
  printer.result(&read)?;

  let QueryResult::Success { response: previous, .. } = &read else {
    bail!("Could not read balance before updating it");
  };
  let undo = vec![format!("WRITE balance {}", previous)];

  let write = unit.write("WRITE balance 0").await.context("Coordinator stopped")?;
  printer.result(&await_result(write).await.context("Coordinator stopped")?)?;

  let cancel = unit.abort(undo).await.context("Coordinator stopped")?;
  let undone = cancel.await.context("Coordinator dropped the cancel")?;
  printer.cancelled(undone);
  Ok(())
}

struct Printer {
  json: bool,
}

impl Printer {
  fn section(&self, title: &str) {
    if !self.json {
      println!("\n--- {} ---", title);
    }
  }

  fn result(&self, result: &QueryResult) -> Result<()> {
    if self.json {
      println!("{}", serde_json::to_string(result)?);
      return Ok(());
    }

    match result {
      QueryResult::Success { status, query, response } => {
        println!("{:>4}  {:<22} {}", status, query, response);
      }
      QueryResult::Failure { status, query, message } => {
        println!("{:>4}  {:<22} FAILED: {}", status, query, message);
      }
    }
    Ok(())
  }

  fn cancelled(&self, undone: bool) {
    if self.json {
      println!("{}", serde_json::json!({ "outcome": "cancelled", "undone": undone }));
    } else {
      println!("      cancel                 {}", if undone { "undone" } else { "undo failed" });
    }
  }
}
