//! Mutual exclusion between controllers of the same store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pkgstore_lib::controller::{StoreController, StoreError};
use pkgstore_lib::fetch::DirectoryFetcher;
use pkgstore_lib::store_lock::{LockMode, StoreLock, StoreLockError};

use super::common::{TestStore, names, request};

#[tokio::test]
async fn fail_mode_reports_the_holder() {
  let env = TestStore::new();
  let _holder = env.open();

  let err = StoreController::open(env.config(LockMode::Fail), Arc::new(DirectoryFetcher), "uninstall")
    .err()
    .unwrap();

  match err {
    StoreError::Lock(StoreLockError::Contention { command, pid, .. }) => {
      assert_eq!(command, "test");
      assert_eq!(pid, std::process::id());
    }
    other => panic!("expected contention, got {other}"),
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiting_controller_sees_the_first_commit() {
  let env = TestStore::new();
  let mut ctx = env.project("app");
  {
    let mut ctrl = env.open();
    ctrl
      .install(request(vec![env.package("leftpad@1.0.0", &[])], &[("leftpad", "leftpad@1.0.0")]), &mut ctx)
      .await
      .unwrap();
  }

  let mut first = env.open();

  let config = env.config(LockMode::Wait);
  let waiter = tokio::task::spawn_blocking(move || {
    let second = StoreController::open(config, Arc::new(DirectoryFetcher), "second").unwrap();
    (Instant::now(), second.graph().is_empty())
  });

  tokio::time::sleep(Duration::from_millis(300)).await;
  assert!(!waiter.is_finished(), "second controller entered while the first held the lock");

  first.uninstall(&names(&["leftpad"]), &mut ctx, None).await.unwrap();
  let released_at = Instant::now();
  drop(first);

  let (acquired_at, saw_empty_graph) = waiter.await.unwrap();
  assert!(acquired_at >= released_at);
  assert!(saw_empty_graph, "second controller saw the graph from before the uninstall");
}

#[test]
fn lock_is_released_when_controller_drops() {
  let env = TestStore::new();
  let ctrl = env.open();
  assert!(StoreLock::inspect(&env.store()).is_some());

  drop(ctrl);
  assert!(StoreLock::inspect(&env.store()).is_none());
  env.open();
}
