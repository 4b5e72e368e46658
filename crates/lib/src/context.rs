//! Per-project installation state.

use std::path::{Component, Path, PathBuf};

use crate::consts::{BIN_DIR, NODE_MODULES};
use crate::graph::PkgId;
use crate::manifest::{ManifestError, ProjectManifest};

/// A project that consumes store entries: its root, identity and manifest.
#[derive(Debug, Clone)]
pub struct InstallationContext {
  root: PathBuf,
  project_id: PkgId,
  manifest: ProjectManifest,
}

impl InstallationContext {
  /// Opens the project at `project_root`.
  ///
  /// The project is identified by its canonical root path, so the same project
  /// reached through different relative paths maps to one graph owner.
  pub fn load(project_root: &Path) -> Result<Self, ManifestError> {
    let root = dunce::canonicalize(project_root).map_err(|_| ManifestError::NotFound(project_root.to_path_buf()))?;
    let manifest = ProjectManifest::load(&root)?;
    let project_id = PkgId::new(root.to_string_lossy());
    Ok(Self {
      root,
      project_id,
      manifest,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn project_id(&self) -> &PkgId {
    &self.project_id
  }

  pub fn manifest(&self) -> &ProjectManifest {
    &self.manifest
  }

  pub fn manifest_mut(&mut self) -> &mut ProjectManifest {
    &mut self.manifest
  }

  /// The project's install directory.
  pub fn node_modules(&self) -> PathBuf {
    self.root.join(NODE_MODULES)
  }

  /// Where generated executable shims live.
  pub fn bin_dir(&self) -> PathBuf {
    self.node_modules().join(BIN_DIR)
  }

  /// The install-directory entry for a direct dependency name, or `None` for
  /// names that would leave `node_modules`.
  pub fn install_path(&self, name: &str) -> Option<PathBuf> {
    is_package_name(name).then(|| self.node_modules().join(name))
  }
}

/// Whether `name` is a plain (`name`) or scoped (`@scope/name`) package name
/// that stays inside the directory it is joined onto.
pub fn is_package_name(name: &str) -> bool {
  let segments: Vec<&str> = name.split('/').collect();
  let plain = |segment: &str| {
    !segment.is_empty()
      && !segment.starts_with('.')
      && !segment.contains(['\\', ':'])
      && matches!(
        Path::new(segment).components().collect::<Vec<_>>().as_slice(),
        [Component::Normal(_)]
      )
  };
  match segments.as_slice() {
    [name] => !name.starts_with('@') && plain(name),
    [scope, name] => scope.len() > 1 && scope.starts_with('@') && plain(scope) && plain(name),
    _ => false,
  }
}
