//! Project manifest (`package.json`) access.
//!
//! The manifest is kept as an order-preserving JSON object so rewriting a
//! dependency section leaves every other field, and the field order, as the
//! user wrote it.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

pub const MANIFEST_FILENAME: &str = "package.json";

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("no package.json found in {}", .0.display())]
  NotFound(PathBuf),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("{0} does not contain a JSON object")]
  NotAnObject(PathBuf),

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Manifest section a dependency is declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SaveType {
  Dependencies,
  DevDependencies,
  OptionalDependencies,
}

impl SaveType {
  pub const ALL: [SaveType; 3] = [
    SaveType::Dependencies,
    SaveType::DevDependencies,
    SaveType::OptionalDependencies,
  ];

  pub fn field(self) -> &'static str {
    match self {
      SaveType::Dependencies => "dependencies",
      SaveType::DevDependencies => "devDependencies",
      SaveType::OptionalDependencies => "optionalDependencies",
    }
  }
}

impl fmt::Display for SaveType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.field())
  }
}

#[derive(Debug, Clone)]
pub struct ProjectManifest {
  path: PathBuf,
  fields: Map<String, Value>,
}

impl ProjectManifest {
  /// Reads `package.json` from the project root.
  pub fn load(project_root: &Path) -> Result<Self, ManifestError> {
    let path = project_root.join(MANIFEST_FILENAME);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(ManifestError::NotFound(project_root.to_path_buf()));
      }
      Err(source) => return Err(ManifestError::Read { path, source }),
    };
    Self::parse(path, &content)
  }

  pub fn parse(path: PathBuf, content: &str) -> Result<Self, ManifestError> {
    let value: Value = serde_json::from_str(content).map_err(|source| ManifestError::Parse {
      path: path.clone(),
      source,
    })?;
    match value {
      Value::Object(fields) => Ok(Self { path, fields }),
      _ => Err(ManifestError::NotAnObject(path)),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn name(&self) -> Option<&str> {
    self.fields.get("name").and_then(Value::as_str)
  }

  pub fn version(&self) -> Option<&str> {
    self.fields.get("version").and_then(Value::as_str)
  }

  /// Raw access for fields this module does not model (e.g. `bin`).
  pub fn field(&self, key: &str) -> Option<&Value> {
    self.fields.get(key)
  }

  /// Declared `(name, spec)` pairs in one section.
  pub fn declared(&self, save_type: SaveType) -> Vec<(String, String)> {
    self
      .fields
      .get(save_type.field())
      .and_then(Value::as_object)
      .map(|section| {
        section
          .iter()
          .map(|(name, spec)| (name.clone(), spec.as_str().unwrap_or_default().to_string()))
          .collect()
      })
      .unwrap_or_default()
  }

  pub fn add_dependency(&mut self, save_type: SaveType, name: &str, spec: &str) {
    let section = self
      .fields
      .entry(save_type.field())
      .or_insert_with(|| Value::Object(Map::new()));
    if !section.is_object() {
      *section = Value::Object(Map::new());
    }
    if let Value::Object(section) = section {
      section.insert(name.to_string(), Value::String(spec.to_string()));
    }
  }

  /// Removes `names` from one section and returns the ones that were present.
  pub fn remove_dependencies(&mut self, save_type: SaveType, names: &[String]) -> Vec<String> {
    let Some(Value::Object(section)) = self.fields.get_mut(save_type.field()) else {
      return Vec::new();
    };
    names
      .iter()
      .filter(|name| section.shift_remove(name.as_str()).is_some())
      .cloned()
      .collect()
  }

  /// Writes the manifest back atomically, two-space indented.
  pub fn save(&self) -> Result<(), ManifestError> {
    let write = || -> io::Result<()> {
      let mut content = serde_json::to_string_pretty(&self.fields).map_err(io::Error::other)?;
      content.push('\n');
      let temp_path = self.path.with_extension("json.tmp");
      fs::write(&temp_path, content)?;
      fs::rename(&temp_path, &self.path)
    };
    write().map_err(|source| ManifestError::Write {
      path: self.path.clone(),
      source,
    })?;
    debug!(path = %self.path.display(), "manifest saved");
    Ok(())
  }
}
