//! Implementation of the `pkgstore server` command.
//!
//! Holds the store lock for as long as the server runs, so standalone
//! commands wait (or fail) while it is up.

use anyhow::{Context, Result};

use pkgstore_lib::server::StoreServer;

use super::open_controller;
use crate::Settings;
use crate::output::{print_info, print_success};

pub fn cmd_server(settings: &Settings) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(serve(settings))?;

  print_success("Store server stopped");
  Ok(())
}

async fn serve(settings: &Settings) -> Result<()> {
  let controller = open_controller(settings, "server").await?;
  let store = controller.store_root().to_path_buf();

  let server = StoreServer::bind(controller, settings.config.server_addr).await?;
  print_info(&format!("Serving {} on {}", store.display(), server.local_addr()?));

  server.run().await.context("Store server failed")
}
