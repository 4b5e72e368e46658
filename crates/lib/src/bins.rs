//! Executable shims in a project's `node_modules/.bin`.
//!
//! A package declares executables through the `bin` field of its
//! `package.json`: either a single path, named after the package, or a map
//! from command name to path.

use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::manifest::ProjectManifest;
use crate::platform::fs::link_file;

/// A declared executable: command name and path relative to the package root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinEntry {
  pub name: String,
  pub path: PathBuf,
}

/// Executables declared by the package whose files are in `package_dir`.
///
/// A package without a readable `package.json` declares none.
pub fn bin_entries(package_dir: &Path) -> Vec<BinEntry> {
  match ProjectManifest::load(package_dir) {
    Ok(manifest) => declared_bins(&manifest),
    Err(e) => {
      debug!(package = %package_dir.display(), error = %e, "no readable manifest, assuming no executables");
      Vec::new()
    }
  }
}

fn declared_bins(manifest: &ProjectManifest) -> Vec<BinEntry> {
  let mut bins = match manifest.field("bin") {
    Some(Value::String(path)) => manifest
      .name()
      .map(|name| {
        vec![BinEntry {
          name: unscoped(name).to_string(),
          path: PathBuf::from(path),
        }]
      })
      .unwrap_or_default(),
    Some(Value::Object(map)) => map
      .iter()
      .filter_map(|(name, path)| {
        path.as_str().map(|path| BinEntry {
          name: unscoped(name).to_string(),
          path: PathBuf::from(path),
        })
      })
      .collect(),
    _ => Vec::new(),
  };
  bins.retain(|bin| is_safe_name(&bin.name));
  bins
}

fn unscoped(name: &str) -> &str {
  name.rsplit('/').next().unwrap_or(name)
}

fn is_safe_name(name: &str) -> bool {
  !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Links every executable of the package into `bin_dir`.
pub fn link_bins(package_dir: &Path, bin_dir: &Path) -> io::Result<Vec<String>> {
  let mut linked = Vec::new();
  for bin in bin_entries(package_dir) {
    let target = package_dir.join(&bin.path);
    link_file(&target, &bin_dir.join(&bin.name))?;
    make_executable(&target)?;
    linked.push(bin.name);
  }
  Ok(linked)
}

/// Whether `shim` is a link whose target lies inside `dir`.
///
/// `None` if `shim` is not a link (missing, or a plain copy).
pub fn shim_points_into(shim: &Path, dir: &Path) -> Option<bool> {
  let target = std::fs::read_link(shim).ok()?;
  let target = if target.is_relative() {
    shim.parent()?.join(target)
  } else {
    target
  };
  Some(target.starts_with(dir))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;

  let Ok(metadata) = std::fs::metadata(path) else {
    return Ok(());
  };
  let mut permissions = metadata.permissions();
  permissions.set_mode(permissions.mode() | 0o111);
  std::fs::set_permissions(path, permissions)
}

#[cfg(windows)]
fn make_executable(_path: &Path) -> io::Result<()> {
  Ok(())
}
