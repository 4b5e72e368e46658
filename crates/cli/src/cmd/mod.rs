mod install;
mod prune;
mod server;
mod status;
mod uninstall;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use tracing::debug;

use pkgstore_lib::controller::StoreController;
use pkgstore_lib::fetch::DirectoryFetcher;
use pkgstore_lib::manifest::SaveType;
use pkgstore_lib::server::{self as store_server, Request, Response, StoreClient};

use crate::Settings;

pub use install::cmd_install;
pub use prune::cmd_prune;
pub use server::cmd_server;
pub use status::cmd_status;
pub use uninstall::cmd_uninstall;

/// Which manifest section to update.
#[derive(Args, Debug, Default)]
#[group(multiple = false)]
pub struct SaveArgs {
  /// Save to dependencies
  #[arg(short = 'P', long)]
  save_prod: bool,

  /// Save to devDependencies
  #[arg(short = 'D', long)]
  save_dev: bool,

  /// Save to optionalDependencies
  #[arg(short = 'O', long)]
  save_optional: bool,
}

impl SaveArgs {
  pub fn save_type(&self) -> Option<SaveType> {
    if self.save_prod {
      Some(SaveType::Dependencies)
    } else if self.save_dev {
      Some(SaveType::DevDependencies)
    } else if self.save_optional {
      Some(SaveType::OptionalDependencies)
    } else {
      None
    }
  }
}

/// Sends `request` to the store server if one is listening, otherwise locks
/// the store and runs it in this process.
pub fn execute(settings: &Settings, request: Request, command: &str) -> Result<Response> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  match rt.block_on(dispatch(settings, request, command))? {
    Response::Error(err) => Err(anyhow!(err)),
    other => Ok(other),
  }
}

async fn dispatch(settings: &Settings, request: Request, command: &str) -> Result<Response> {
  let addr = settings.config.server_addr;
  if !settings.standalone && store_server::is_listening(addr).await {
    debug!(%addr, "using store server");
    let mut client = StoreClient::connect(addr).await?;
    return client.request(&request).await.context("Store server request failed");
  }

  let mut controller = open_controller(settings, command).await?;
  Ok(store_server::handle(&mut controller, request).await)
}

/// Opens the store off the async threads; waiting for the lock blocks.
pub async fn open_controller(settings: &Settings, command: &str) -> Result<StoreController> {
  let config = settings.config.clone();
  let command = command.to_string();
  let controller = tokio::task::spawn_blocking(move || StoreController::open(config, Arc::new(DirectoryFetcher), &command))
    .await
    .context("Store open task failed")?
    .context("Failed to open store")?;
  Ok(controller)
}

fn unexpected(response: Response) -> anyhow::Error {
  anyhow!("unexpected response from store: {response:?}")
}
