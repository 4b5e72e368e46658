use std::time::Duration;

use pkgstore_lib::store_lock::{LockMode, LockOptions, StoreLock};
use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn uninstall_purges_unused_package() {
  let env = TestEnv::new();
  let project = env.project("app");
  env.install_leftpad(&project);

  env
    .pkgstore_cmd()
    .args(["uninstall", "leftpad", "-C"])
    .arg(&project)
    .assert()
    .success()
    .stdout(predicate::str::contains("Removed 1 package(s)"))
    .stdout(predicate::str::contains("Purged from store: 1"));

  assert!(!env.store_path().join("leftpad@1.0.0").exists());
  assert!(std::fs::symlink_metadata(project.join("node_modules/leftpad")).is_err());
  assert!(std::fs::symlink_metadata(project.join("node_modules/.bin/leftpad")).is_err());
}

#[test]
fn uninstall_keeps_package_used_elsewhere() {
  let env = TestEnv::new();
  let first = env.project("first");
  let second = env.project("second");
  env.install_leftpad(&first);
  env.install_leftpad(&second);

  env
    .pkgstore_cmd()
    .args(["uninstall", "leftpad", "-o", "json", "-C"])
    .arg(&first)
    .assert()
    .success()
    .stdout(predicate::str::contains("\"removedFromProject\""))
    .stdout(predicate::str::contains("\"purgedFromStore\": []"));

  assert!(env.store_path().join("leftpad@1.0.0/package").exists());
  assert!(second.join("node_modules/leftpad/index.js").exists());
}

#[test]
fn uninstall_twice_is_a_no_op() {
  let env = TestEnv::new();
  let project = env.project("app");
  env.install_leftpad(&project);

  env.pkgstore_cmd().args(["uninstall", "leftpad", "-C"]).arg(&project).assert().success();
  env
    .pkgstore_cmd()
    .args(["uninstall", "leftpad", "-C"])
    .arg(&project)
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to uninstall"));
}

#[test]
fn uninstall_without_manifest_fails() {
  let env = TestEnv::new();
  let bare = env.temp.path().join("bare");
  std::fs::create_dir_all(&bare).unwrap();

  env
    .pkgstore_cmd()
    .args(["uninstall", "leftpad", "-C"])
    .arg(&bare)
    .assert()
    .failure()
    .stderr(predicate::str::contains("no package.json found"));
}

#[test]
fn uninstall_save_removes_manifest_entry() {
  let env = TestEnv::new();
  let project = env.project("app");
  env.install_leftpad(&project);
  env.write_file(
    "app/package.json",
    "{\n  \"name\": \"app\",\n  \"dependencies\": {\n    \"leftpad\": \"^1.0.0\",\n    \"react\": \"^18.0.0\"\n  }\n}\n",
  );

  env
    .pkgstore_cmd()
    .args(["uninstall", "leftpad", "--save-prod", "-C"])
    .arg(&project)
    .assert()
    .success();

  let manifest = std::fs::read_to_string(project.join("package.json")).unwrap();
  assert!(!manifest.contains("leftpad"));
  assert!(manifest.contains("react"));
}

#[test]
fn uninstall_fails_fast_when_store_is_locked() {
  let env = TestEnv::new();
  let project = env.project("app");
  let options = LockOptions {
    stale: Duration::from_secs(300),
    mode: LockMode::Fail,
    command: "install".to_string(),
  };
  let _held = StoreLock::acquire(&env.store_path(), &options).unwrap();

  env
    .pkgstore_cmd()
    .args(["uninstall", "leftpad", "-C"])
    .arg(&project)
    .assert()
    .failure()
    .stderr(predicate::str::contains("Store is locked by another process: install"));
}
