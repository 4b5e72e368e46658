//! The store controller.
//!
//! `StoreController` is the only component that mutates a store. It holds the
//! store lock for as long as it lives, keeps the loaded graph in memory, and
//! funnels every install, uninstall and prune through one sequence:
//!
//! 1. mutate a working copy of the graph
//! 2. persist it (the commit point)
//! 3. replace the in-memory graph with it
//! 4. clean up the filesystem, best effort
//!
//! A failed save leaves both the document and the in-memory graph as they were.

mod install;
mod types;

use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bins::{bin_entries, shim_points_into};
use crate::config::StoreConfig;
use crate::consts::PACKAGE_DIR;
use crate::context::{InstallationContext, is_package_name};
use crate::fetch::Fetcher;
use crate::graph::{PkgId, StoreGraph};
use crate::manifest::SaveType;
use crate::planner::{plan_uninstall, sweep_unreachable};
use crate::platform::fs::{dir_size, remove_path};
use crate::repository::StoreJsonRepository;
use crate::store_lock::StoreLock;

pub use types::{
  CleanupWarning, DirectDependency, InstallReport, InstallRequest, LockHolder, PruneReport, ResolvedPackage,
  StoreError, StoreStatus, UninstallReport,
};

pub struct StoreController {
  config: StoreConfig,
  root: PathBuf,
  repository: StoreJsonRepository,
  graph: StoreGraph,
  fetcher: Arc<dyn Fetcher>,
  lock: StoreLock,
}

impl StoreController {
  /// Locks the store named by `config` and loads its graph.
  ///
  /// Blocks or fails on contention according to `config.lock_mode`. Invalid
  /// configuration is rejected before the store is touched.
  pub fn open(config: StoreConfig, fetcher: Arc<dyn Fetcher>, command: &str) -> Result<Self, StoreError> {
    config.validate()?;
    let lock = StoreLock::acquire(&config.store, &config.lock_options(command))?;
    let root = dunce::canonicalize(&config.store).map_err(|source| StoreError::Io {
      path: config.store.clone(),
      source,
    })?;

    let repository = StoreJsonRepository::new(&root);
    let graph = repository.load()?;

    info!(
      store = %root.display(),
      entries = graph.entries().len(),
      command,
      "store opened"
    );

    Ok(Self {
      config,
      root,
      repository,
      graph,
      fetcher,
      lock,
    })
  }

  pub fn config(&self) -> &StoreConfig {
    &self.config
  }

  pub fn store_root(&self) -> &Path {
    &self.root
  }

  pub fn graph(&self) -> &StoreGraph {
    &self.graph
  }

  /// Content directory of a store entry, or `None` for ids that would escape
  /// the store root.
  pub fn content_dir(&self, entry: &PkgId) -> Option<PathBuf> {
    let relative = Path::new(entry.as_str());
    let confined = relative
      .components()
      .all(|c| matches!(c, Component::Normal(_)));
    (confined && !entry.as_str().is_empty()).then(|| self.root.join(relative))
  }

  /// Directory holding the package files of a store entry.
  pub fn package_dir(&self, entry: &PkgId) -> Option<PathBuf> {
    self.content_dir(entry).map(|dir| dir.join(PACKAGE_DIR))
  }

  /// Discards the in-memory graph and re-reads the document.
  pub fn reload(&mut self) -> Result<(), StoreError> {
    self.graph = self.repository.load()?;
    Ok(())
  }

  fn commit(&mut self, working: StoreGraph) -> Result<(), StoreError> {
    self.repository.save(&working)?;
    self.graph = working;
    Ok(())
  }

  /// Removes `names` from the project and purges every store entry left
  /// without consumers.
  ///
  /// Names the project does not import through the store are skipped. The
  /// project's `node_modules/<name>` entries are removed for every requested
  /// name regardless.
  pub async fn uninstall(
    &mut self,
    names: &[String],
    ctx: &mut InstallationContext,
    save: Option<SaveType>,
  ) -> Result<UninstallReport, StoreError> {
    if let Some(name) = names.iter().find(|name| !is_package_name(name)) {
      return Err(StoreError::InvalidName(name.clone()));
    }

    let project = ctx.project_id().clone();
    let mut working = self.graph.clone();

    let mut requested: Vec<String> = Vec::new();
    let mut removed_from_project = Vec::new();
    let mut released = Vec::new();
    for name in names {
      if requested.contains(name) {
        continue;
      }
      requested.push(name.clone());

      // Root edges go before planning so the planner never counts them.
      match working.remove_dependency(project.as_str(), name) {
        Some(entry) => {
          debug!(name = %name, entry = %entry, project = %project, "unlinked from project");
          removed_from_project.push(name.clone());
          released.push(entry);
        }
        None => debug!(name = %name, project = %project, "not installed through the store, skipping"),
      }
    }

    let scope = working.reachable_from(&released);
    let mut purged = plan_uninstall(&mut working, released.clone(), &project);
    purged.extend(sweep_unreachable(&mut working, &scope));

    // Shim targets must be read before the content is deleted.
    let shims = self.shims_to_remove(ctx, &released, &purged);

    self.commit(working)?;

    let mut targets = shims;
    for entry in &purged {
      match self.content_dir(entry) {
        Some(dir) => targets.push(dir),
        None => warn!(entry = %entry, "refusing to delete content outside the store"),
      }
    }
    targets.extend(requested.iter().filter_map(|name| ctx.install_path(name)));

    let mut warnings = remove_paths(targets).await;

    if let Some(save_type) = save {
      let dropped = ctx.manifest_mut().remove_dependencies(save_type, &requested);
      if !dropped.is_empty()
        && let Err(e) = ctx.manifest().save()
      {
        warn!(error = %e, "failed to update manifest");
        warnings.push(CleanupWarning {
          path: ctx.manifest().path().to_path_buf(),
          message: e.to_string(),
        });
      }
    }

    info!(
      project = %project,
      removed = removed_from_project.len(),
      purged = purged.len(),
      warnings = warnings.len(),
      "uninstall complete"
    );

    Ok(UninstallReport {
      removed_from_project,
      purged_from_store: purged,
      warnings,
    })
  }

  /// Shims in the project's `.bin` that were generated for the given entries.
  ///
  /// A shim link must point into the entry's content; shims that are plain
  /// files are attributed to the project's own released entries only.
  fn shims_to_remove(&self, ctx: &InstallationContext, released: &[PkgId], purged: &[PkgId]) -> Vec<PathBuf> {
    let bin_dir = ctx.bin_dir();
    let direct: HashSet<&PkgId> = released.iter().collect();
    let mut seen: HashSet<&PkgId> = HashSet::new();
    let mut shims = Vec::new();

    for entry in released.iter().chain(purged) {
      if !seen.insert(entry) {
        continue;
      }
      let (Some(content), Some(package)) = (self.content_dir(entry), self.package_dir(entry)) else {
        continue;
      };
      for bin in bin_entries(&package) {
        let shim = bin_dir.join(&bin.name);
        if shim_points_into(&shim, &content).unwrap_or(direct.contains(entry)) {
          shims.push(shim);
        }
      }
    }
    shims
  }

  /// Summary and consistency report of the graph.
  pub fn status(&self) -> StoreStatus {
    StoreStatus {
      store: self.root.clone(),
      entries: self.graph.entries().len(),
      owners: self.graph.owners().count(),
      issues: types::issue_strings(self.graph.verify()),
      unreachable: self.graph.unreachable_entries(),
      cycles: self.graph.cycles(),
      lock: self.lock.read_metadata().ok().map(LockHolder::from),
    }
  }

  /// Purges graph entries no project reaches and content directories the
  /// graph does not know.
  pub async fn prune(&mut self, dry_run: bool) -> Result<PruneReport, StoreError> {
    let mut working = self.graph.clone();
    let unreachable = working.unreachable_entries();
    for entry in &unreachable {
      for dep in working.remove_entry(entry.as_str()).into_values() {
        working.unlink_dependent(dep.as_str(), entry.as_str());
      }
    }

    let live: HashSet<String> = working
      .entries()
      .into_iter()
      .chain(working.owners())
      .map(|id| id.as_str().to_string())
      .collect();

    let garbage: Vec<PathBuf> = content_dirs(&self.root)
      .into_iter()
      .filter(|(id, _)| !live.contains(id))
      .map(|(_, path)| path)
      .collect();
    let bytes_freed: u64 = garbage.iter().map(|path| dir_size(path)).sum();

    if dry_run {
      info!(unreachable = unreachable.len(), directories = garbage.len(), "prune dry run complete");
      return Ok(PruneReport {
        dry_run,
        unreachable_entries: unreachable,
        deleted_paths: garbage,
        bytes_freed,
        warnings: Vec::new(),
      });
    }

    if !unreachable.is_empty() {
      self.commit(working)?;
    }

    let warnings = remove_paths(garbage.clone()).await;
    let failed: HashSet<&PathBuf> = warnings.iter().map(|w| &w.path).collect();
    let deleted_paths: Vec<PathBuf> = garbage.iter().filter(|p| !failed.contains(p)).cloned().collect();

    info!(
      unreachable = unreachable.len(),
      directories = deleted_paths.len(),
      bytes_freed,
      "prune complete"
    );

    Ok(PruneReport {
      dry_run,
      unreachable_entries: unreachable,
      deleted_paths,
      bytes_freed,
      warnings,
    })
  }
}

/// Content directories in the store root, keyed by the entry id they hold.
///
/// Scoped ids (`@scope/name@1.0.0`) live one level down.
fn content_dirs(root: &Path) -> Vec<(String, PathBuf)> {
  let mut dirs = BTreeSet::new();
  let Ok(entries) = std::fs::read_dir(root) else {
    return Vec::new();
  };

  for entry in entries.flatten() {
    let path = entry.path();
    if !path.is_dir() {
      continue;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
      continue;
    };
    if name.starts_with('.') {
      continue;
    }

    if name.starts_with('@') {
      let Ok(scoped) = std::fs::read_dir(&path) else {
        continue;
      };
      for child in scoped.flatten() {
        let child_path = child.path();
        if let Some(child_name) = child_path.file_name().and_then(|n| n.to_str())
          && child_path.is_dir()
        {
          dirs.insert((format!("{name}/{child_name}"), child_path.clone()));
        }
      }
    } else {
      dirs.insert((name, path));
    }
  }

  dirs.into_iter().collect()
}

/// Deletes each path, turning failures into warnings.
async fn remove_paths(paths: Vec<PathBuf>) -> Vec<CleanupWarning> {
  let task = tokio::task::spawn_blocking(move || {
    paths
      .into_iter()
      .filter_map(|path| match remove_path(&path) {
        Ok(existed) => {
          if existed {
            debug!(path = %path.display(), "removed");
          }
          None
        }
        Err(e) => {
          warn!(path = %path.display(), error = %e, "failed to remove");
          Some(CleanupWarning {
            path,
            message: e.to_string(),
          })
        }
      })
      .collect::<Vec<_>>()
  });

  match task.await {
    Ok(warnings) => warnings,
    Err(e) => {
      warn!(error = %e, "cleanup task failed");
      vec![CleanupWarning {
        path: PathBuf::new(),
        message: e.to_string(),
      }]
    }
  }
}
