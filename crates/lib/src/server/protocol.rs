//! Wire messages of the store server.
//!
//! One JSON object per line in each direction. A connection may carry any
//! number of request/response pairs; responses come back in request order.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::{InstallReport, InstallRequest, PruneReport, StoreError, StoreStatus, UninstallReport};
use crate::manifest::SaveType;
use crate::repository::RepositoryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
  Install {
    project: PathBuf,
    request: InstallRequest,
  },
  Uninstall {
    project: PathBuf,
    names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    save: Option<SaveType>,
  },
  Status,
  Prune {
    #[serde(default)]
    dry_run: bool,
  },
  Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
  Installed(InstallReport),
  Uninstalled(UninstallReport),
  Status(StoreStatus),
  Pruned(PruneReport),
  ShuttingDown,
  Error(ErrorResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  ManifestMissing,
  StoreLocked,
  CorruptStore,
  Persistence,
  Fetch,
  Io,
  BadRequest,
}

/// A failed request, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ErrorResponse {
  pub kind: ErrorKind,
  pub message: String,
}

impl ErrorResponse {
  pub fn bad_request(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::BadRequest,
      message: message.into(),
    }
  }
}

impl From<&StoreError> for ErrorResponse {
  fn from(err: &StoreError) -> Self {
    let kind = match err {
      StoreError::ManifestMissing { .. } => ErrorKind::ManifestMissing,
      StoreError::Manifest(_)
      | StoreError::Config(_)
      | StoreError::InvalidEntry(_)
      | StoreError::InvalidName(_)
      | StoreError::StrayPackage(_)
      | StoreError::UnresolvedDependency { .. } => ErrorKind::BadRequest,
      StoreError::Lock(_) => ErrorKind::StoreLocked,
      StoreError::Repository(RepositoryError::Corrupt { .. }) => ErrorKind::CorruptStore,
      StoreError::Repository(RepositoryError::Persist { .. }) => ErrorKind::Persistence,
      StoreError::Repository(RepositoryError::Read { .. }) | StoreError::Io { .. } => ErrorKind::Io,
      StoreError::Fetch(_) => ErrorKind::Fetch,
    };
    Self {
      kind,
      message: err.to_string(),
    }
  }
}

impl From<StoreError> for Response {
  fn from(err: StoreError) -> Self {
    Response::Error(ErrorResponse::from(&err))
  }
}
