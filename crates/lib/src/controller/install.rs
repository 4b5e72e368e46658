//! Installing resolved packages into the store and linking them into a project.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{StoreController, remove_paths};
use super::types::{CleanupWarning, InstallReport, InstallRequest, ResolvedPackage, StoreError};
use crate::bins::link_bins;
use crate::consts::PACKAGE_DIR;
use crate::context::{InstallationContext, is_package_name};
use crate::fetch::{FetchError, Fetcher};
use crate::graph::PkgId;
use crate::planner::{plan_uninstall, sweep_unreachable};
use crate::platform::fs::{link_dir, remove_path};

impl StoreController {
  /// Installs a resolved dependency tree into the project.
  ///
  /// Missing content is fetched first, at most `network_concurrency` packages
  /// at a time. The graph is only touched once every fetch has succeeded. A
  /// direct name that moves to a different entry releases the old one, which
  /// is purged if nothing else uses it.
  pub async fn install(
    &mut self,
    request: InstallRequest,
    ctx: &mut InstallationContext,
  ) -> Result<InstallReport, StoreError> {
    let project = ctx.project_id().clone();
    self.check_request(&request, &project)?;

    let fetched = self.fetch_missing(&request.packages).await?;

    let mut working = self.graph.clone();
    let mut released = Vec::new();
    for package in &request.packages {
      for (name, dep) in &package.dependencies {
        released.extend(working.add_dependency(&package.id, name, dep));
      }
    }
    for direct in &request.direct {
      if let Some(previous) = working.add_dependency(&project, &direct.name, &direct.id) {
        debug!(name = %direct.name, from = %previous, to = %direct.id, "direct dependency moved");
        released.push(previous);
      }
    }
    let scope = working.reachable_from(&released);
    let mut purged = plan_uninstall(&mut working, released, &project);
    purged.extend(sweep_unreachable(&mut working, &scope));

    self.commit(working)?;

    let mut warnings = Vec::new();
    let mut linked = Vec::new();
    for direct in &request.direct {
      let (Some(package_dir), Some(install_path)) = (self.package_dir(&direct.id), ctx.install_path(&direct.name)) else {
        continue;
      };
      match link_dir(&package_dir, &install_path) {
        Ok(()) => linked.push(direct.name.clone()),
        Err(e) => {
          warn!(name = %direct.name, error = %e, "failed to link dependency");
          warnings.push(CleanupWarning {
            path: install_path,
            message: e.to_string(),
          });
          continue;
        }
      }
      if let Err(e) = link_bins(&package_dir, &ctx.bin_dir()) {
        warn!(name = %direct.name, error = %e, "failed to link executables");
        warnings.push(CleanupWarning {
          path: ctx.bin_dir(),
          message: e.to_string(),
        });
      }
    }

    let purged_dirs: Vec<PathBuf> = purged.iter().filter_map(|entry| self.content_dir(entry)).collect();
    warnings.extend(remove_paths(purged_dirs).await);

    if let Some(save_type) = request.save {
      for direct in &request.direct {
        let spec = direct.spec.as_deref().unwrap_or("*");
        ctx.manifest_mut().add_dependency(save_type, &direct.name, spec);
      }
      if let Err(e) = ctx.manifest().save() {
        warn!(error = %e, "failed to update manifest");
        warnings.push(CleanupWarning {
          path: ctx.manifest().path().to_path_buf(),
          message: e.to_string(),
        });
      }
    }

    info!(
      project = %project,
      fetched = fetched.len(),
      linked = linked.len(),
      purged = purged.len(),
      "install complete"
    );

    Ok(InstallReport {
      fetched,
      linked,
      purged_from_store: purged,
      warnings,
    })
  }

  /// Every id must map into the store, every direct name must stay inside
  /// `node_modules`, every edge must point at something that is installed or
  /// about to be, and every requested package must be reached from a direct
  /// dependency.
  fn check_request(&self, request: &InstallRequest, project: &PkgId) -> Result<(), StoreError> {
    let incoming: HashSet<&PkgId> = request.packages.iter().map(|p| &p.id).collect();
    let available = |id: &PkgId| incoming.contains(id) || self.graph.contains(id.as_str());

    if let Some(direct) = request.direct.iter().find(|d| !is_package_name(&d.name)) {
      return Err(StoreError::InvalidName(direct.name.clone()));
    }

    for package in &request.packages {
      if self.content_dir(&package.id).is_none() {
        return Err(StoreError::InvalidEntry(package.id.clone()));
      }
      for (name, dep) in &package.dependencies {
        if !available(dep) {
          return Err(StoreError::UnresolvedDependency {
            owner: package.id.clone(),
            name: name.clone(),
            entry: dep.clone(),
          });
        }
      }
    }

    for direct in &request.direct {
      if self.content_dir(&direct.id).is_none() {
        return Err(StoreError::InvalidEntry(direct.id.clone()));
      }
      if !available(&direct.id) {
        return Err(StoreError::UnresolvedDependency {
          owner: project.clone(),
          name: direct.name.clone(),
          entry: direct.id.clone(),
        });
      }
    }

    let requested: HashMap<&PkgId, &ResolvedPackage> = request.packages.iter().map(|p| (&p.id, p)).collect();
    let mut reached: HashSet<&PkgId> = HashSet::new();
    let mut stack: Vec<&PkgId> = request.direct.iter().map(|d| &d.id).collect();
    while let Some(id) = stack.pop() {
      if !reached.insert(id) {
        continue;
      }
      match requested.get(id) {
        Some(package) => stack.extend(package.dependencies.values()),
        None => stack.extend(self.graph.dependencies_of(id.as_str()).values()),
      }
    }
    if let Some(stray) = request.packages.iter().find(|p| !reached.contains(&p.id)) {
      return Err(StoreError::StrayPackage(stray.id.clone()));
    }
    Ok(())
  }

  /// Fetches the packages whose content is not in the store yet.
  async fn fetch_missing(&self, packages: &[ResolvedPackage]) -> Result<Vec<PkgId>, StoreError> {
    let mut pending: BTreeMap<PkgId, (ResolvedPackage, PathBuf)> = BTreeMap::new();
    for package in packages {
      let Some(content_dir) = self.content_dir(&package.id) else {
        return Err(StoreError::InvalidEntry(package.id.clone()));
      };
      if content_dir.join(PACKAGE_DIR).is_dir() {
        continue;
      }
      pending
        .entry(package.id.clone())
        .or_insert_with(|| (package.clone(), content_dir));
    }

    if pending.is_empty() {
      return Ok(Vec::new());
    }

    info!(
      count = pending.len(),
      concurrency = self.config.network_concurrency,
      "fetching packages"
    );

    let semaphore = Arc::new(Semaphore::new(self.config.network_concurrency));
    let mut join_set = JoinSet::new();

    for (package, content_dir) in pending.into_values() {
      let semaphore = semaphore.clone();
      let fetcher = self.fetcher.clone();
      join_set.spawn(async move {
        let _permit = semaphore.acquire_owned().await;
        let result = fetch_into_store(fetcher.as_ref(), &package, &content_dir).await;
        (package.id, result)
      });
    }

    let mut fetched = Vec::new();
    let mut first_error: Option<StoreError> = None;
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((id, Ok(()))) => {
          debug!(package = %id, "fetched");
          fetched.push(id);
        }
        Ok((id, Err(e))) => {
          error!(package = %id, error = %e, "fetch failed");
          first_error.get_or_insert(e);
        }
        Err(e) => {
          error!(error = %e, "fetch task panicked");
          first_error.get_or_insert(StoreError::Fetch(FetchError::Failed {
            id: PkgId::from("unknown"),
            message: e.to_string(),
          }));
        }
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => {
        fetched.sort();
        Ok(fetched)
      }
    }
  }
}

/// Fetches into a staging directory next to the final one, then renames it
/// into place so a content directory is either complete or absent.
async fn fetch_into_store(
  fetcher: &dyn Fetcher,
  package: &ResolvedPackage,
  content_dir: &std::path::Path,
) -> Result<(), StoreError> {
  let io_err = |path: &std::path::Path| {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
  };

  let file_name = content_dir
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  let staging = content_dir.with_file_name(format!("{file_name}.partial-{}", std::process::id()));

  let cleanup = staging.clone();
  tokio::task::spawn_blocking(move || remove_path(&cleanup))
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))
    .and_then(|r| r)
    .map_err(io_err(&staging))?;

  if let Err(e) = fetcher.fetch(package, &staging.join(PACKAGE_DIR)).await {
    let _ = tokio::fs::remove_dir_all(&staging).await;
    return Err(e.into());
  }

  if tokio::fs::try_exists(content_dir).await.unwrap_or(false) {
    // Partial leftovers from an interrupted run; the fresh copy wins.
    tokio::fs::remove_dir_all(content_dir)
      .await
      .map_err(io_err(content_dir))?;
  }
  tokio::fs::rename(&staging, content_dir)
    .await
    .map_err(io_err(content_dir))?;
  Ok(())
}
