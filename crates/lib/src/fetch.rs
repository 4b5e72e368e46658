//! Materialising package content into the store.
//!
//! Resolution and download are the package manager's business; the store only
//! needs something that can fill a directory with a resolved package's files.
//! [`Fetcher`] is that seam. [`DirectoryFetcher`] copies from a local
//! directory named by the package's `source`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use thiserror::Error;
use tracing::debug;

use crate::controller::ResolvedPackage;
use crate::graph::PkgId;
use crate::platform::fs::copy_dir;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("no content source for {0}")]
  MissingSource(PkgId),

  #[error("content source {source_path} for {id} is not a directory")]
  NotADirectory { id: PkgId, source_path: PathBuf },

  #[error("failed to fetch {id}: {source}")]
  Io {
    id: PkgId,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to fetch {id}: {message}")]
  Failed { id: PkgId, message: String },
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<(), FetchError>> + Send + 'a>>;

/// Fills `target` with the files of `package`.
///
/// `target` does not exist yet; the fetcher creates it. The controller moves it
/// into the store only after the future resolves successfully.
pub trait Fetcher: Send + Sync {
  fn fetch<'a>(&'a self, package: &'a ResolvedPackage, target: &'a Path) -> FetchFuture<'a>;
}

/// Copies package content from a local directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryFetcher;

impl Fetcher for DirectoryFetcher {
  fn fetch<'a>(&'a self, package: &'a ResolvedPackage, target: &'a Path) -> FetchFuture<'a> {
    Box::pin(async move {
      let Some(source) = package.source.clone() else {
        return Err(FetchError::MissingSource(package.id.clone()));
      };
      if !source.is_dir() {
        return Err(FetchError::NotADirectory {
          id: package.id.clone(),
          source_path: source,
        });
      }

      debug!(package = %package.id, source = %source.display(), "copying package content");
      let target = target.to_path_buf();
      let id = package.id.clone();
      tokio::task::spawn_blocking(move || copy_dir(&source, &target))
        .await
        .map_err(|e| FetchError::Failed {
          id: id.clone(),
          message: e.to_string(),
        })?
        .map_err(|source| FetchError::Io { id, source })
    })
  }
}
