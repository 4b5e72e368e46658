//! Requests, reports and errors of the store controller.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::graph::{DependencyMap, GraphIssue, PkgId};
use crate::manifest::{ManifestError, SaveType};
use crate::repository::RepositoryError;
use crate::store_lock::{LockMetadata, StoreLockError};

#[derive(Debug, Error)]
pub enum StoreError {
  /// The project has no manifest, so it has no identity to uninstall from.
  #[error("no package.json found in {} - cannot modify project", .path.display())]
  ManifestMissing { path: PathBuf },

  #[error(transparent)]
  Manifest(ManifestError),

  #[error(transparent)]
  Lock(#[from] StoreLockError),

  #[error(transparent)]
  Repository(#[from] RepositoryError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("store entry id '{0}' is not a valid store path")]
  InvalidEntry(PkgId),

  #[error("'{0}' is not a valid package name")]
  InvalidName(String),

  #[error("{0} is part of the install request, but no direct dependency reaches it")]
  StrayPackage(PkgId),

  #[error("{owner} depends on {entry} as '{name}', but it is neither installed nor part of the request")]
  UnresolvedDependency { owner: PkgId, name: String, entry: PkgId },

  #[error("failed to prepare store content {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl From<ManifestError> for StoreError {
  fn from(err: ManifestError) -> Self {
    match err {
      ManifestError::NotFound(path) => StoreError::ManifestMissing { path },
      other => StoreError::Manifest(other),
    }
  }
}

/// A package the resolver has pinned to one store entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPackage {
  pub id: PkgId,
  /// The package's own dependencies, by local name.
  #[serde(default)]
  pub dependencies: DependencyMap,
  /// Where the fetcher takes the content from.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<PathBuf>,
}

/// A name the project imports directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectDependency {
  pub name: String,
  pub id: PkgId,
  /// Version range to record in the manifest when saving.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub spec: Option<String>,
}

/// Everything needed to install a resolved dependency tree into one project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequest {
  /// Every package of the tree, direct or transitive.
  pub packages: Vec<ResolvedPackage>,
  pub direct: Vec<DirectDependency>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub save: Option<SaveType>,
}

/// A file or directory that could not be removed. The operation still counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupWarning {
  pub path: PathBuf,
  pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UninstallReport {
  /// Requested names that the project actually imported through the store.
  pub removed_from_project: Vec<String>,
  /// Store entries deleted, in removal order.
  pub purged_from_store: Vec<PkgId>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub warnings: Vec<CleanupWarning>,
}

impl UninstallReport {
  pub fn is_partial(&self) -> bool {
    !self.warnings.is_empty()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
  /// Store entries whose content was fetched by this install.
  pub fetched: Vec<PkgId>,
  /// Direct dependency names linked into the project.
  pub linked: Vec<String>,
  /// Entries purged because a direct name moved to a different entry.
  pub purged_from_store: Vec<PkgId>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub warnings: Vec<CleanupWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
  pub store: PathBuf,
  pub entries: usize,
  pub owners: usize,
  pub issues: Vec<String>,
  pub unreachable: Vec<PkgId>,
  pub cycles: Vec<Vec<PkgId>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lock: Option<LockHolder>,
}

impl StoreStatus {
  pub fn is_consistent(&self) -> bool {
    self.issues.is_empty() && self.unreachable.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHolder {
  pub pid: u32,
  pub command: String,
  pub started_at_unix: u64,
}

impl From<LockMetadata> for LockHolder {
  fn from(metadata: LockMetadata) -> Self {
    Self {
      pid: metadata.pid,
      command: metadata.command,
      started_at_unix: metadata.started_at_unix,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
  pub dry_run: bool,
  /// Graph entries no project reaches any more.
  pub unreachable_entries: Vec<PkgId>,
  /// Content directories deleted (or that would be).
  pub deleted_paths: Vec<PathBuf>,
  pub bytes_freed: u64,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub warnings: Vec<CleanupWarning>,
}

pub(crate) fn issue_strings(issues: Vec<GraphIssue>) -> Vec<String> {
  issues.into_iter().map(|issue| issue.to_string()).collect()
}
