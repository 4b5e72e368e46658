//! Filesystem helpers shared by the store and the project install directory.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Removes a file, symlink or directory tree.
///
/// Returns `Ok(false)` if nothing existed at `path`. Links are removed without
/// touching their targets.
pub fn remove_path(path: &Path) -> io::Result<bool> {
  let metadata = match fs::symlink_metadata(path) {
    Ok(metadata) => metadata,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
    Err(e) => return Err(e),
  };

  let file_type = metadata.file_type();
  if file_type.is_symlink() {
    remove_link(path)?;
  } else if file_type.is_dir() {
    fs::remove_dir_all(path)?;
  } else {
    fs::remove_file(path)?;
  }
  Ok(true)
}

#[cfg(unix)]
fn remove_link(path: &Path) -> io::Result<()> {
  fs::remove_file(path)
}

#[cfg(windows)]
fn remove_link(path: &Path) -> io::Result<()> {
  // Directory links and junctions are removed as directories on Windows.
  fs::remove_dir(path).or_else(|_| fs::remove_file(path))
}

/// Links `link` to the directory `target`, replacing whatever was at `link`.
#[cfg(unix)]
pub fn link_dir(target: &Path, link: &Path) -> io::Result<()> {
  prepare_link(link)?;
  std::os::unix::fs::symlink(target, link)
}

/// Links `link` to the directory `target`, replacing whatever was at `link`.
#[cfg(windows)]
pub fn link_dir(target: &Path, link: &Path) -> io::Result<()> {
  prepare_link(link)?;
  junction::create(target, link)
}

/// Links `link` to the file `target`, replacing whatever was at `link`.
#[cfg(unix)]
pub fn link_file(target: &Path, link: &Path) -> io::Result<()> {
  prepare_link(link)?;
  std::os::unix::fs::symlink(target, link)
}

/// Windows shims are plain copies; symlinks need elevated privileges there.
#[cfg(windows)]
pub fn link_file(target: &Path, link: &Path) -> io::Result<()> {
  prepare_link(link)?;
  fs::copy(target, link).map(|_| ())
}

fn prepare_link(link: &Path) -> io::Result<()> {
  if let Some(parent) = link.parent() {
    fs::create_dir_all(parent)?;
  }
  remove_path(link)?;
  Ok(())
}

/// Recursively copies the directory `src` into `dst`.
pub fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
  for entry in WalkDir::new(src).follow_links(true) {
    let entry = entry.map_err(io::Error::other)?;
    let relative = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    let dest = dst.join(relative);

    if entry.file_type().is_dir() {
      fs::create_dir_all(&dest)?;
    } else {
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
      }
      fs::copy(entry.path(), &dest)?;
    }
  }
  Ok(())
}

/// Total size in bytes of the regular files below `path`.
pub fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}
