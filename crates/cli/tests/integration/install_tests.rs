use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn install_links_packages_and_bins() {
  let env = TestEnv::new();
  let project = env.project("app");
  env.install_leftpad(&project);

  assert!(project.join("node_modules/leftpad/index.js").exists());
  assert!(std::fs::symlink_metadata(project.join("node_modules/.bin/leftpad")).is_ok());
  assert!(env.store_path().join("leftpad@1.0.0/package/package.json").exists());
  assert!(env.store_path().join("store.json").exists());
}

#[test]
fn install_saves_to_manifest() {
  let env = TestEnv::new();
  let project = env.project("app");
  env.source("lodash@4.17.21", None);
  let request = env.request(
    "lodash.json",
    r#"{
      "packages": [{ "id": "lodash@4.17.21", "source": "sources/lodash@4.17.21" }],
      "direct": [{ "name": "lodash", "id": "lodash@4.17.21", "spec": "^4.17.21" }]
    }"#,
  );

  env
    .pkgstore_cmd()
    .arg("install")
    .arg(&request)
    .arg("-C")
    .arg(&project)
    .arg("--save-dev")
    .assert()
    .success()
    .stdout(predicate::str::contains("Linked 1 package(s)"));

  let manifest = std::fs::read_to_string(project.join("package.json")).unwrap();
  assert!(manifest.contains("devDependencies"));
  assert!(manifest.contains("\"lodash\": \"^4.17.21\""));
}

#[test]
fn install_with_unknown_dependency_fails() {
  let env = TestEnv::new();
  let project = env.project("app");
  env.source("a@1.0.0", None);
  let request = env.request(
    "a.json",
    r#"{
      "packages": [{ "id": "a@1.0.0", "source": "sources/a@1.0.0", "dependencies": { "b": "b@1.0.0" } }],
      "direct": [{ "name": "a", "id": "a@1.0.0" }]
    }"#,
  );

  env
    .pkgstore_cmd()
    .arg("install")
    .arg(&request)
    .arg("-C")
    .arg(&project)
    .assert()
    .failure()
    .stderr(predicate::str::contains("b@1.0.0"));

  assert!(!env.store_path().join("a@1.0.0").exists());
}

#[test]
fn install_with_malformed_request_fails() {
  let env = TestEnv::new();
  let project = env.project("app");
  let request = env.request("bad.json", "{ not json");

  env
    .pkgstore_cmd()
    .arg("install")
    .arg(&request)
    .arg("-C")
    .arg(&project)
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid install request"));
}
