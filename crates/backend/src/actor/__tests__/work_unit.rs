//! End-to-end tests for the unit-of-work protocol.
//!
//! Covers in-order completion, cancel with and without undo, sequence and
//! count violations, stalled units, reader barrier timeouts inside a unit,
//! and late messages for ended units.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;

  use crate::{
    actor::{
      __tests__::helpers::{RecordingResource, TestContext, resolve, test_settings},
      message::{Operation, STATUS_PROTOCOL, STATUS_TIMEOUT, UnitId, UnitScope},
    },
    diagnostics::DiagnosticKind,
  };

  fn unit(count: u32) -> UnitScope {
    UnitScope::new(UnitId::new(), count)
  }

  /// Test: K correctly sequenced messages all succeed, in submission order.
  #[tokio::test]
  async fn test_unit_completes_in_order() {
    let ctx = TestContext::spawn();
    let mut work = ctx.handle.begin_unit(4);

    let r1 = work.read("SLOW READ BALANCE").await.unwrap();
    let r2 = work.write("WRITE BALANCE 10").await.unwrap();
    let r3 = work.read("READ BALANCE").await.unwrap();
    let r4 = work.write("WRITE AUDIT").await.unwrap();

    for rx in [r1, r2, r3, r4] {
      assert!(resolve(rx).await.is_success());
    }

    assert_eq!(
      ctx.resource.started(),
      vec!["SLOW READ BALANCE", "WRITE BALANCE 10", "READ BALANCE", "WRITE AUDIT"]
    );
    ctx.resource.assert_exclusive("WRITE BALANCE 10");
    ctx.resource.assert_exclusive("WRITE AUDIT");
    assert!(ctx.log.entries().is_empty());
    ctx.shutdown().await;
  }

  /// Test: an out-of-sequence message fails and never reaches the resource.
  #[tokio::test]
  async fn test_sequence_violation_rejected() {
    let ctx = TestContext::spawn();
    let scope = unit(3);

    let (first, first_rx) = Operation::unit_read(scope, 1, "READ A");
    let (skipped, skipped_rx) = Operation::unit_write(scope, 3, "WRITE A");
    ctx.handle.submit(first).await.unwrap();
    ctx.handle.submit(skipped).await.unwrap();

    assert!(resolve(first_rx).await.is_success());
    let rejected = resolve(skipped_rx).await;
    assert_eq!(rejected.status(), STATUS_PROTOCOL);
    assert_eq!(ctx.resource.calls_for("WRITE A"), 0);
    assert_eq!(ctx.log.count(DiagnosticKind::Bug), 1);
    ctx.shutdown().await;
  }

  /// Test: a unit that opens with anything but sequence 1 is rejected.
  #[tokio::test]
  async fn test_unit_must_start_at_one() {
    let ctx = TestContext::spawn();

    let (op, rx) = Operation::unit_write(unit(3), 2, "WRITE A");
    ctx.handle.submit(op).await.unwrap();

    assert_eq!(resolve(rx).await.status(), STATUS_PROTOCOL);
    assert!(ctx.resource.started().is_empty());
    ctx.shutdown().await;
  }

  /// Test: a message whose expected count disagrees with the unit is rejected.
  #[tokio::test]
  async fn test_count_mismatch_rejected() {
    let ctx = TestContext::spawn();
    let scope = unit(2);

    let (first, first_rx) = Operation::unit_write(scope, 1, "WRITE A");
    let (second, second_rx) = Operation::unit_write(UnitScope::new(scope.unit_id, 3), 2, "WRITE B");
    ctx.handle.submit(first).await.unwrap();
    ctx.handle.submit(second).await.unwrap();

    assert!(resolve(first_rx).await.is_success());
    assert_eq!(resolve(second_rx).await.status(), STATUS_PROTOCOL);
    assert_eq!(ctx.resource.calls_for("WRITE B"), 0);
    ctx.shutdown().await;
  }

  /// Test: cancel with no undo keeps changes and issues no resource calls.
  #[tokio::test]
  async fn test_cancel_without_undo() {
    let ctx = TestContext::spawn();
    let mut work = ctx.handle.begin_unit(3);

    let write = work.write("WRITE A").await.unwrap();
    let done = work.cancel().await.unwrap();

    assert!(resolve(write).await.is_success());
    assert!(resolve(done).await);
    assert_eq!(ctx.resource.started(), vec!["WRITE A"]);
    ctx.shutdown().await;
  }

  /// Test: every undo instruction runs even after one fails, and the cancel reports false.
  #[tokio::test]
  async fn test_undo_runs_all_instructions() {
    let ctx = TestContext::spawn();
    let mut work = ctx.handle.begin_unit(3);

    let w1 = work.write("WRITE A").await.unwrap();
    let w2 = work.write("WRITE B").await.unwrap();
    let done = work
      .abort(vec!["FAIL UNDO B".to_string(), "UNDO A".to_string()])
      .await
      .unwrap();

    assert!(resolve(w1).await.is_success());
    assert!(resolve(w2).await.is_success());
    assert!(!resolve(done).await);
    assert_eq!(
      ctx.resource.started(),
      vec!["WRITE A", "WRITE B", "FAIL UNDO B", "UNDO A"]
    );
    assert_eq!(ctx.log.count(DiagnosticKind::FailedQuery), 1);
    ctx.shutdown().await;
  }

  /// Test: a successful undo reports true.
  #[tokio::test]
  async fn test_undo_all_succeed() {
    let ctx = TestContext::spawn();
    let mut work = ctx.handle.begin_unit(2);

    let w1 = work.write("WRITE A").await.unwrap();
    let done = work.abort(vec!["UNDO A".to_string()]).await.unwrap();

    assert!(resolve(w1).await.is_success());
    assert!(resolve(done).await);
    assert_eq!(ctx.resource.started(), vec!["WRITE A", "UNDO A"]);
    ctx.shutdown().await;
  }

  /// Test: a cancel with no open unit completes true, touches nothing and is logged.
  #[tokio::test]
  async fn test_bare_cancel_is_a_bug() {
    let ctx = TestContext::spawn();

    let (cancel, rx) = Operation::cancel_unit(unit(2), vec!["UNDO A".to_string()]);
    ctx.handle.submit(cancel).await.unwrap();

    assert!(resolve(rx).await);
    assert!(ctx.resource.started().is_empty());
    assert_eq!(ctx.log.count(DiagnosticKind::Bug), 1);
    ctx.shutdown().await;
  }

  /// Test: a stalled unit is abandoned and unrelated reads still complete.
  #[tokio::test]
  async fn test_stalled_unit_does_not_block_reads() {
    let ctx = TestContext::spawn();
    let mut work = ctx.handle.begin_unit(2);

    let first = work.read("READ A").await.unwrap();
    let (read, read_rx) = Operation::read("READ NAME");
    ctx.handle.submit(read).await.unwrap();

    assert!(resolve(first).await.is_success());
    let unrelated = resolve(read_rx).await;
    assert!(unrelated.is_success());
    assert_eq!(ctx.log.count(DiagnosticKind::SlowWorkUnit), 1);
    ctx.shutdown().await;
  }

  /// Test: messages arriving for a unit that was already abandoned are rejected.
  #[tokio::test]
  async fn test_late_message_after_abandonment() {
    let ctx = TestContext::spawn();
    let mut work = ctx.handle.begin_unit(2);

    let first = work.write("WRITE A").await.unwrap();
    assert!(resolve(first).await.is_success());

    // Outlast the unit's search window, then send the rest anyway
    tokio::time::sleep(Duration::from_millis(400)).await;
    let late = work.write("WRITE B").await.unwrap();

    assert_eq!(resolve(late).await.status(), STATUS_PROTOCOL);
    assert_eq!(ctx.resource.calls_for("WRITE B"), 0);
    assert_eq!(ctx.log.count(DiagnosticKind::SlowWorkUnit), 1);
    assert_eq!(ctx.log.count(DiagnosticKind::Bug), 1);
    ctx.shutdown().await;
  }

  /// Test: a failed write stops the unit; its remaining messages are never executed.
  #[tokio::test]
  async fn test_failed_write_abandons_unit() {
    let ctx = TestContext::spawn();
    let mut work = ctx.handle.begin_unit(3);

    let w1 = work.write("FAIL WRITE A").await.unwrap();
    let w2 = work.write("WRITE B").await.unwrap();
    let w3 = work.write("WRITE C").await.unwrap();

    assert_eq!(resolve(w1).await.status(), 500);
    assert_eq!(resolve(w2).await.status(), STATUS_PROTOCOL);
    assert_eq!(resolve(w3).await.status(), STATUS_PROTOCOL);
    assert_eq!(ctx.resource.started(), vec!["FAIL WRITE A"]);
    ctx.shutdown().await;
  }

  /// Test: two interleaved units never interleave their steps.
  #[tokio::test]
  async fn test_units_do_not_interleave() {
    let ctx = TestContext::spawn();
    let a = unit(2);
    let b = unit(2);

    let (a1, a1_rx) = Operation::unit_write(a, 1, "WRITE A1");
    let (b1, b1_rx) = Operation::unit_write(b, 1, "WRITE B1");
    let (a2, a2_rx) = Operation::unit_write(a, 2, "WRITE A2");
    let (b2, b2_rx) = Operation::unit_write(b, 2, "WRITE B2");
    for op in [a1, b1, a2, b2] {
      ctx.handle.submit(op).await.unwrap();
    }

    for rx in [a1_rx, b1_rx, a2_rx, b2_rx] {
      assert!(resolve(rx).await.is_success());
    }
    assert_eq!(
      ctx.resource.started(),
      vec!["WRITE A1", "WRITE A2", "WRITE B1", "WRITE B2"]
    );
    ctx.shutdown().await;
  }

  /// Test: a unit jumps ahead of standalone writes, which then run in arrival order.
  #[tokio::test]
  async fn test_skipped_messages_keep_their_order() {
    let ctx = TestContext::spawn();
    let scope = unit(2);

    let (u1, u1_rx) = Operation::unit_write(scope, 1, "WRITE U1");
    let (w1, w1_rx) = Operation::write("WRITE X");
    let (w2, w2_rx) = Operation::write("WRITE Y");
    let (u2, u2_rx) = Operation::unit_write(scope, 2, "WRITE U2");
    for op in [u1, w1, w2, u2] {
      ctx.handle.submit(op).await.unwrap();
    }

    for rx in [u1_rx, w1_rx, w2_rx, u2_rx] {
      assert!(resolve(rx).await.is_success());
    }
    assert_eq!(
      ctx.resource.started(),
      vec!["WRITE U1", "WRITE U2", "WRITE X", "WRITE Y"]
    );
    ctx.shutdown().await;
  }

  /// Test: a committed unit's id can't be reused.
  #[tokio::test]
  async fn test_message_after_commit_rejected() {
    let ctx = TestContext::spawn();
    let scope = unit(1);

    let (only, only_rx) = Operation::unit_write(scope, 1, "WRITE A");
    ctx.handle.submit(only).await.unwrap();
    assert!(resolve(only_rx).await.is_success());

    let (again, again_rx) = Operation::unit_write(scope, 1, "WRITE A AGAIN");
    ctx.handle.submit(again).await.unwrap();

    assert_eq!(resolve(again_rx).await.status(), STATUS_PROTOCOL);
    assert_eq!(ctx.resource.calls_for("WRITE A AGAIN"), 0);
    ctx.shutdown().await;
  }

  /// Test: aborting after a failed write still rolls back the earlier writes.
  #[tokio::test]
  async fn test_abort_after_failed_write_runs_undo() {
    let ctx = TestContext::spawn();
    let mut work = ctx.handle.begin_unit(3);

    let w1 = work.write("WRITE A").await.unwrap();
    let w2 = work.write("FAIL WRITE B").await.unwrap();
    assert!(resolve(w1).await.is_success());
    assert_eq!(resolve(w2).await.status(), 500);

    let done = work.abort(vec!["UNDO A".to_string()]).await.unwrap();

    assert!(resolve(done).await);
    assert_eq!(ctx.resource.started(), vec!["WRITE A", "FAIL WRITE B", "UNDO A"]);
    assert_eq!(ctx.log.count(DiagnosticKind::Bug), 0);
    ctx.shutdown().await;
  }

  /// Test: undo for a unit that already committed is refused, not reported as done.
  #[tokio::test]
  async fn test_undo_after_commit_refused() {
    let ctx = TestContext::spawn();
    let scope = unit(1);

    let (only, only_rx) = Operation::unit_write(scope, 1, "WRITE A");
    ctx.handle.submit(only).await.unwrap();
    assert!(resolve(only_rx).await.is_success());

    let (cancel, cancel_rx) = Operation::cancel_unit(scope, vec!["UNDO A".to_string()]);
    ctx.handle.submit(cancel).await.unwrap();

    assert!(!resolve(cancel_rx).await);
    assert_eq!(ctx.resource.calls_for("UNDO A"), 0);
    assert_eq!(ctx.log.count(DiagnosticKind::Bug), 1);
    ctx.shutdown().await;
  }

  /// Test: a unit write whose readers don't drain times out and ends the unit.
  #[tokio::test]
  async fn test_unit_write_times_out_on_slow_readers() {
    let mut settings = test_settings();
    settings.max_wait_for_resource = Duration::from_millis(20);
    let ctx = TestContext::spawn_with(settings, RecordingResource::with_slow_delay(Duration::from_millis(300)));
    let mut work = ctx.handle.begin_unit(3);

    let r1 = work.read("SLOW READ A").await.unwrap();
    let w1 = work.write("WRITE A").await.unwrap();
    let w2 = work.write("WRITE B").await.unwrap();

    assert_eq!(resolve(w1).await.status(), STATUS_TIMEOUT);
    assert_eq!(resolve(w2).await.status(), STATUS_PROTOCOL);
    assert!(resolve(r1).await.is_success());
    assert_eq!(ctx.resource.calls_for("WRITE A"), 0);
    assert_eq!(ctx.resource.calls_for("WRITE B"), 0);
    assert_eq!(ctx.log.count(DiagnosticKind::SlowReaders), 1);
    ctx.shutdown().await;
  }

  /// Test: undo whose readers don't drain is not run and the cancel reports false.
  #[tokio::test]
  async fn test_undo_times_out_on_slow_readers() {
    let mut settings = test_settings();
    settings.max_wait_for_resource = Duration::from_millis(20);
    let ctx = TestContext::spawn_with(settings, RecordingResource::with_slow_delay(Duration::from_millis(300)));
    let mut work = ctx.handle.begin_unit(2);

    let r1 = work.read("SLOW READ A").await.unwrap();
    let done = work.abort(vec!["UNDO A".to_string()]).await.unwrap();

    assert!(!resolve(done).await);
    assert!(resolve(r1).await.is_success());
    assert_eq!(ctx.resource.calls_for("UNDO A"), 0);
    assert_eq!(ctx.log.count(DiagnosticKind::SlowReaders), 1);
    ctx.shutdown().await;
  }

  /// Test: closing the channel while a unit is open ends the unit and the
  /// coordinator, and messages parked during the search still run.
  #[tokio::test]
  async fn test_channel_close_with_open_unit() {
    let mut settings = test_settings();
    settings.max_wait_for_work_unit = Duration::from_secs(30);
    let ctx = TestContext::spawn_with(settings, RecordingResource::new());
    let scope = unit(3);

    let (first, first_rx) = Operation::unit_write(scope, 1, "WRITE A");
    let (read, read_rx) = Operation::read("READ NAME");
    ctx.handle.submit(first).await.unwrap();
    ctx.handle.submit(read).await.unwrap();

    let TestContext { handle, task, log, .. } = ctx;
    drop(handle);

    tokio::time::timeout(Duration::from_secs(5), task)
      .await
      .expect("coordinator should stop once the channel closes")
      .unwrap();
    assert!(resolve(first_rx).await.is_success());
    assert!(resolve(read_rx).await.is_success());
    assert_eq!(log.count(DiagnosticKind::SlowWorkUnit), 0);
  }
}
