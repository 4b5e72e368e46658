use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn prune_with_no_store_succeeds() {
  let env = TestEnv::new();

  env
    .pkgstore_cmd()
    .arg("prune")
    .assert()
    .success()
    .stdout(predicate::str::contains("Prune complete"));
}

#[test]
fn prune_removes_stray_directories() {
  let env = TestEnv::new();
  let project = env.project("app");
  env.install_leftpad(&project);
  env.write_file("store/orphan@0.1.0/package/index.js", "module.exports = 1\n");

  env
    .pkgstore_cmd()
    .args(["prune", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"))
    .stdout(predicate::str::contains("Directories removed: 1"));
  assert!(env.store_path().join("orphan@0.1.0").exists());

  env
    .pkgstore_cmd()
    .arg("prune")
    .assert()
    .success()
    .stdout(predicate::str::contains("Directories removed: 1"));
  assert!(!env.store_path().join("orphan@0.1.0").exists());
  assert!(env.store_path().join("leftpad@1.0.0").exists());
}

#[test]
fn prune_json_output_is_valid() {
  let env = TestEnv::new();

  env
    .pkgstore_cmd()
    .args(["prune", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("unreachableEntries"))
    .stdout(predicate::str::contains("deletedPaths"))
    .stdout(predicate::str::contains("bytesFreed"));
}
