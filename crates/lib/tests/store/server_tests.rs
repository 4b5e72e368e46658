//! The store server against a real store directory.

use std::net::SocketAddr;
use std::sync::Arc;

use pkgstore_lib::controller::{StoreController, StoreError};
use pkgstore_lib::fetch::DirectoryFetcher;
use pkgstore_lib::server::{Request, Response, StoreClient, StoreServer, is_listening};
use pkgstore_lib::store_lock::{LockMode, StoreLockError};

use super::common::{TestStore, ids, names, request};

#[tokio::test]
async fn server_holds_the_store_until_shutdown() {
  let env = TestStore::new();
  let server = StoreServer::bind(env.open(), SocketAddr::from(([127, 0, 0, 1], 0)))
    .await
    .unwrap();
  let addr = server.local_addr().unwrap();
  let running = tokio::spawn(server.run_until(std::future::pending()));

  assert!(is_listening(addr).await);
  let standalone = StoreController::open(env.config(LockMode::Fail), Arc::new(DirectoryFetcher), "standalone");
  assert!(matches!(
    standalone,
    Err(StoreError::Lock(StoreLockError::Contention { .. }))
  ));

  let project = env.project_root("app");
  let mut client = StoreClient::connect(addr).await.unwrap();

  let response = client
    .request(&Request::Install {
      project: project.clone(),
      request: request(
        vec![env.package("a@1.0.0", &[("b", "b@1.0.0")]), env.package("b@1.0.0", &[])],
        &[("a", "a@1.0.0")],
      ),
    })
    .await
    .unwrap();
  let Response::Installed(installed) = response else {
    panic!("unexpected response: {response:?}");
  };
  assert_eq!(installed.fetched, ids(&["a@1.0.0", "b@1.0.0"]));

  let response = client
    .request(&Request::Uninstall {
      project,
      names: names(&["a"]),
      save: None,
    })
    .await
    .unwrap();
  let Response::Uninstalled(report) = response else {
    panic!("unexpected response: {response:?}");
  };
  assert_eq!(report.purged_from_store, ids(&["a@1.0.0", "b@1.0.0"]));

  assert_eq!(client.request(&Request::Shutdown).await.unwrap(), Response::ShuttingDown);
  running.await.unwrap().unwrap();

  // The lock went away with the server.
  let reopened = env.open();
  assert!(reopened.graph().is_empty());
}
