//! Durable storage of the store graph.
//!
//! The whole graph lives in one document, `store.json`, in the store root.
//! Saves write a sibling temp file, sync it, and rename it over the document,
//! so a crash mid-write leaves either the old or the new document in place.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::STORE_JSON;
use crate::graph::StoreGraph;

#[derive(Debug, Error)]
pub enum RepositoryError {
  /// The document exists but is not a store graph. Never reset silently.
  #[error("store document {path} is corrupt: {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to read store document {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to persist store document {path}: {source}")]
  Persist {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Loads and saves `store.json` for one store root.
#[derive(Debug, Clone)]
pub struct StoreJsonRepository {
  root: PathBuf,
}

impl StoreJsonRepository {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn document_path(&self) -> PathBuf {
    self.root.join(STORE_JSON)
  }

  fn temp_path(&self) -> PathBuf {
    self.root.join(format!("{STORE_JSON}.tmp"))
  }

  /// Load the graph. Returns an empty graph if no document exists yet.
  pub fn load(&self) -> Result<StoreGraph, RepositoryError> {
    let path = self.document_path();

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no store document yet, starting empty");
        return Ok(StoreGraph::new());
      }
      Err(source) => return Err(RepositoryError::Read { path, source }),
    };

    serde_json::from_str(&content).map_err(|source| RepositoryError::Corrupt { path, source })
  }

  /// Save the graph, replacing the document atomically.
  pub fn save(&self, graph: &StoreGraph) -> Result<(), RepositoryError> {
    let path = self.document_path();
    let temp_path = self.temp_path();

    let result = self.write_document(graph, &temp_path, &path);
    if result.is_err() {
      let _ = fs::remove_file(&temp_path);
    }
    result.map_err(|source| RepositoryError::Persist { path, source })
  }

  fn write_document(&self, graph: &StoreGraph, temp_path: &Path, path: &Path) -> io::Result<()> {
    fs::create_dir_all(&self.root)?;

    let content = serde_json::to_vec_pretty(graph).map_err(io::Error::other)?;
    let mut file = fs::File::create(temp_path)?;
    file.write_all(&content)?;
    file.sync_all()?;
    drop(file);

    fs::rename(temp_path, path)?;
    debug!(path = %path.display(), bytes = content.len(), "store document saved");
    Ok(())
  }
}
