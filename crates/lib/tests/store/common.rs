use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pkgstore_lib::config::StoreConfig;
use pkgstore_lib::context::InstallationContext;
use pkgstore_lib::controller::{DirectDependency, InstallRequest, ResolvedPackage, StoreController};
use pkgstore_lib::fetch::DirectoryFetcher;
use pkgstore_lib::graph::{DependencyMap, PkgId};
use pkgstore_lib::store_lock::LockMode;
use tempfile::TempDir;

/// A temp directory holding one store, its projects and content sources.
pub struct TestStore {
  pub temp: TempDir,
}

impl TestStore {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn store(&self) -> PathBuf {
    self.temp.path().join("store")
  }

  pub fn config(&self, lock_mode: LockMode) -> StoreConfig {
    StoreConfig {
      store: self.store(),
      lock_stale_duration: Duration::from_secs(30),
      lock_mode,
      ..StoreConfig::default()
    }
  }

  pub fn open(&self) -> StoreController {
    StoreController::open(self.config(LockMode::Fail), Arc::new(DirectoryFetcher), "test").unwrap()
  }

  pub fn project_root(&self, name: &str) -> PathBuf {
    let root = self.temp.path().join("projects").join(name);
    if !root.exists() {
      fs::create_dir_all(&root).unwrap();
      fs::write(
        root.join("package.json"),
        format!("{{\n  \"name\": \"{name}\",\n  \"version\": \"1.0.0\"\n}}\n"),
      )
      .unwrap();
    }
    root
  }

  pub fn project(&self, name: &str) -> InstallationContext {
    InstallationContext::load(&self.project_root(name)).unwrap()
  }

  pub fn package(&self, id: &str, deps: &[(&str, &str)]) -> ResolvedPackage {
    let source = self.temp.path().join("sources").join(id.replace('/', "+"));
    fs::create_dir_all(&source).unwrap();
    let name = id.rsplit_once('@').map(|(n, _)| n).unwrap_or(id);
    fs::write(source.join("package.json"), format!(r#"{{"name": "{name}"}}"#)).unwrap();

    ResolvedPackage {
      id: PkgId::from(id),
      dependencies: deps
        .iter()
        .map(|(name, entry)| (name.to_string(), PkgId::from(*entry)))
        .collect::<DependencyMap>(),
      source: Some(source),
    }
  }

  /// Writes `store.json` and a content directory for every entry it names.
  pub fn seed(&self, document: &str, entries: &[&str]) {
    fs::create_dir_all(self.store()).unwrap();
    fs::write(self.store().join("store.json"), document).unwrap();
    for entry in entries {
      let package = self.store().join(entry).join("package");
      fs::create_dir_all(&package).unwrap();
      fs::write(package.join("package.json"), "{}").unwrap();
    }
  }
}

pub fn request(packages: Vec<ResolvedPackage>, direct: &[(&str, &str)]) -> InstallRequest {
  InstallRequest {
    packages,
    direct: direct
      .iter()
      .map(|(name, id)| DirectDependency {
        name: name.to_string(),
        id: PkgId::from(*id),
        spec: None,
      })
      .collect(),
    save: None,
  }
}

pub fn names(list: &[&str]) -> Vec<String> {
  list.iter().map(|s| s.to_string()).collect()
}

pub fn ids(list: &[&str]) -> Vec<PkgId> {
  list.iter().map(|s| PkgId::from(*s)).collect()
}

/// JSON-escaped canonical project id, for hand-written documents.
pub fn json_id(ctx: &InstallationContext) -> String {
  serde_json::to_string(ctx.project_id().as_str()).unwrap()
}
