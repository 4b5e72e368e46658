//! Uninstall behaviour over seeded and installed stores.

use pkgstore_lib::controller::StoreError;
use pkgstore_lib::graph::PkgId;
use pkgstore_lib::repository::{RepositoryError, StoreJsonRepository};

use super::common::{TestStore, ids, json_id, names, request};

#[tokio::test]
async fn seeded_leftpad_is_purged() {
  let env = TestStore::new();
  let mut ctx = env.project("proj");
  let project = json_id(&ctx);
  env.seed(
    &format!(
      r#"{{
        "dependencies": {{ {project}: {{ "leftpad": "leftpad@1.0" }} }},
        "dependents": {{ "leftpad@1.0": [{project}] }}
      }}"#
    ),
    &["leftpad@1.0"],
  );

  let mut ctrl = env.open();
  let report = ctrl.uninstall(&names(&["leftpad"]), &mut ctx, None).await.unwrap();

  assert_eq!(report.removed_from_project, names(&["leftpad"]));
  assert_eq!(report.purged_from_store, ids(&["leftpad@1.0"]));
  assert!(!env.store().join("leftpad@1.0").exists());

  let on_disk = StoreJsonRepository::new(env.store()).load().unwrap();
  assert!(on_disk.is_empty());
}

#[tokio::test]
async fn seeded_lodash_stays_for_other_project() {
  let env = TestStore::new();
  let mut a = env.project("projA");
  let b = env.project("projB");
  let (id_a, id_b) = (json_id(&a), json_id(&b));
  env.seed(
    &format!(
      r#"{{
        "dependencies": {{
          {id_a}: {{ "lodash": "lodash@4.0" }},
          {id_b}: {{ "lodash": "lodash@4.0" }}
        }},
        "dependents": {{ "lodash@4.0": [{id_a}, {id_b}] }}
      }}"#
    ),
    &["lodash@4.0"],
  );

  let mut ctrl = env.open();
  let report = ctrl.uninstall(&names(&["lodash"]), &mut a, None).await.unwrap();

  assert_eq!(report.removed_from_project, names(&["lodash"]));
  assert!(report.purged_from_store.is_empty());
  assert_eq!(
    ctrl.graph().dependents_of("lodash@4.0").iter().cloned().collect::<Vec<_>>(),
    vec![b.project_id().clone()]
  );
  assert!(env.store().join("lodash@4.0").exists());
}

#[tokio::test]
async fn chain_is_removed_completely() {
  let env = TestStore::new();
  let mut ctx = env.project("app");
  let mut ctrl = env.open();

  ctrl
    .install(
      request(
        vec![
          env.package("a@1.0.0", &[("b", "b@1.0.0")]),
          env.package("b@1.0.0", &[("c", "c@1.0.0")]),
          env.package("c@1.0.0", &[]),
        ],
        &[("a", "a@1.0.0")],
      ),
      &mut ctx,
    )
    .await
    .unwrap();

  let report = ctrl.uninstall(&names(&["a"]), &mut ctx, None).await.unwrap();

  assert_eq!(report.purged_from_store, ids(&["a@1.0.0", "b@1.0.0", "c@1.0.0"]));
  for entry in ["a@1.0.0", "b@1.0.0", "c@1.0.0"] {
    assert!(!env.store().join(entry).exists(), "{entry} should be gone");
  }
  assert!(ctrl.graph().is_empty());
}

#[tokio::test]
async fn chain_keeps_entry_used_by_another_project() {
  let env = TestStore::new();
  let mut app = env.project("app");
  let mut other = env.project("other");
  let mut ctrl = env.open();

  ctrl
    .install(
      request(
        vec![
          env.package("a@1.0.0", &[("b", "b@1.0.0")]),
          env.package("b@1.0.0", &[("c", "c@1.0.0")]),
          env.package("c@1.0.0", &[]),
        ],
        &[("a", "a@1.0.0")],
      ),
      &mut app,
    )
    .await
    .unwrap();
  ctrl
    .install(request(vec![env.package("c@1.0.0", &[])], &[("c", "c@1.0.0")]), &mut other)
    .await
    .unwrap();

  let report = ctrl.uninstall(&names(&["a"]), &mut app, None).await.unwrap();

  assert_eq!(report.purged_from_store, ids(&["a@1.0.0", "b@1.0.0"]));
  assert!(env.store().join("c@1.0.0").join("package").exists());
  assert_eq!(
    ctrl.graph().dependents_of("c@1.0.0").iter().cloned().collect::<Vec<_>>(),
    vec![other.project_id().clone()]
  );
}

#[tokio::test]
async fn uninstalling_absent_name_is_a_no_op() {
  let env = TestStore::new();
  let mut ctx = env.project("app");
  let mut ctrl = env.open();

  let report = ctrl.uninstall(&names(&["never-installed"]), &mut ctx, None).await.unwrap();

  assert!(report.removed_from_project.is_empty());
  assert!(report.purged_from_store.is_empty());
  assert!(report.warnings.is_empty());
}

#[tokio::test]
async fn graph_stays_symmetric_through_a_session() {
  let env = TestStore::new();
  let projects = ["one", "two", "three"];
  let mut contexts: Vec<_> = projects.iter().map(|p| env.project(p)).collect();
  let mut ctrl = env.open();

  let pool = [
    ("react", "react@18.0.0", Some(("loose-envify", "loose-envify@1.4.0"))),
    ("loose-envify", "loose-envify@1.4.0", Some(("js-tokens", "js-tokens@4.0.0"))),
    ("js-tokens", "js-tokens@4.0.0", None),
    ("leftpad", "leftpad@1.0.0", None),
  ];

  let mut step = 0usize;
  for round in 0..3 {
    for (i, ctx) in contexts.iter_mut().enumerate() {
      let (name, id, dep) = pool[(i + round) % pool.len()];
      let mut packages = Vec::new();
      // Install the whole chain below the picked package.
      let mut next = Some((name, id, dep));
      while let Some((_, id, dep)) = next {
        let deps: Vec<(&str, &str)> = dep.into_iter().collect();
        packages.push(env.package(id, &deps));
        next = dep.and_then(|(_, dep_id)| pool.iter().find(|(_, pid, _)| *pid == dep_id).copied());
      }

      ctrl.install(request(packages, &[(name, id)]), ctx).await.unwrap();
      step += 1;
      assert!(ctrl.graph().verify().is_empty(), "asymmetric after install step {step}");

      if (i + round) % 2 == 0 {
        ctrl.uninstall(&names(&[name]), ctx, None).await.unwrap();
        step += 1;
        assert!(ctrl.graph().verify().is_empty(), "asymmetric after uninstall step {step}");
      }
    }
  }

  for ctx in &mut contexts {
    let held: Vec<String> = ctrl.graph().dependencies_of(ctx.project_id().as_str()).keys().cloned().collect();
    ctrl.uninstall(&held, ctx, None).await.unwrap();
    assert!(ctrl.graph().verify().is_empty());
  }

  assert!(ctrl.graph().is_empty());
  assert!(ctrl.status().is_consistent());
}

#[tokio::test]
async fn entries_with_consumers_are_never_deleted() {
  let env = TestStore::new();
  let mut app = env.project("app");
  let mut other = env.project("other");
  let mut ctrl = env.open();

  ctrl
    .install(
      request(vec![env.package("tool@1.0.0", &[("dep", "dep@1.0.0")]), env.package("dep@1.0.0", &[])], &[("tool", "tool@1.0.0")]),
      &mut app,
    )
    .await
    .unwrap();
  ctrl
    .install(request(vec![env.package("dep@1.0.0", &[])], &[("dep", "dep@1.0.0")]), &mut other)
    .await
    .unwrap();

  let report = ctrl.uninstall(&names(&["tool", "dep"]), &mut app, None).await.unwrap();

  for purged in &report.purged_from_store {
    assert!(
      ctrl.graph().dependents_of(purged.as_str()).is_empty(),
      "{purged} was purged while still in use"
    );
  }
  assert!(!report.purged_from_store.contains(&PkgId::from("dep@1.0.0")));
  assert!(env.store().join("dep@1.0.0").exists());
}

#[tokio::test]
async fn corrupt_document_refuses_to_open() {
  let env = TestStore::new();
  env.seed(r#"{"dependencies": {}}"#, &[]);

  let result = pkgstore_lib::controller::StoreController::open(
    env.config(pkgstore_lib::store_lock::LockMode::Fail),
    std::sync::Arc::new(pkgstore_lib::fetch::DirectoryFetcher),
    "test",
  );

  assert!(matches!(
    result,
    Err(StoreError::Repository(RepositoryError::Corrupt { .. }))
  ));
  // The broken document is left for the user to inspect.
  assert_eq!(
    std::fs::read_to_string(env.store().join("store.json")).unwrap(),
    r#"{"dependencies": {}}"#
  );
}
