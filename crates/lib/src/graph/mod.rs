//! The store's dependency graph.
//!
//! `StoreGraph` is the in-memory form of `store.json`: a forward map from an
//! owner (a project or a store entry) to the store entries it imports under
//! local names, and the reverse map from each store entry to the owners that
//! depend on it. The two maps are kept as exact transposes of each other; every
//! edge mutation goes through the methods here so both sides change together.
//!
//! Lookups treat a missing key as an empty collection. Empty collections are
//! never stored.

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

/// Identifier of a node in the graph.
///
/// Store entries (`name@version`) and projects (canonical root paths) share
/// one namespace. Projects are the ids with a root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PkgId(pub String);

impl PkgId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Whether this id names a project rather than a store entry.
  pub fn is_project(&self) -> bool {
    Path::new(&self.0).has_root()
  }
}

impl Borrow<str> for PkgId {
  fn borrow(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for PkgId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for PkgId {
  fn from(id: &str) -> Self {
    Self(id.to_string())
  }
}

impl From<String> for PkgId {
  fn from(id: String) -> Self {
    Self(id)
  }
}

/// Local name to store entry.
pub type DependencyMap = BTreeMap<String, PkgId>;

static NO_DEPENDENCIES: DependencyMap = BTreeMap::new();
static NO_DEPENDENTS: BTreeSet<PkgId> = BTreeSet::new();

/// A consistency problem found by [`StoreGraph::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphIssue {
  /// `owner` imports `entry` but is missing from `dependents[entry]`.
  MissingDependent { owner: PkgId, entry: PkgId },
  /// `dependents[entry]` lists `dependent`, which has no edge to `entry`.
  DanglingDependent { entry: PkgId, dependent: PkgId },
  /// An empty map or set was left behind for this id.
  EmptyRecord { id: PkgId },
}

impl fmt::Display for GraphIssue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GraphIssue::MissingDependent { owner, entry } => {
        write!(f, "{owner} depends on {entry} but is not recorded as its dependent")
      }
      GraphIssue::DanglingDependent { entry, dependent } => {
        write!(f, "{dependent} is recorded as a dependent of {entry} without an edge")
      }
      GraphIssue::EmptyRecord { id } => write!(f, "empty record left for {id}"),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreGraph {
  dependencies: BTreeMap<PkgId, DependencyMap>,
  dependents: BTreeMap<PkgId, BTreeSet<PkgId>>,
}

impl StoreGraph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.dependencies.is_empty() && self.dependents.is_empty()
  }

  /// The owner's dependency map, empty if the owner is unknown.
  pub fn dependencies_of(&self, owner: &str) -> &DependencyMap {
    self.dependencies.get(owner).unwrap_or(&NO_DEPENDENCIES)
  }

  /// The entry's dependents, empty if the entry is unknown.
  pub fn dependents_of(&self, entry: &str) -> &BTreeSet<PkgId> {
    self.dependents.get(entry).unwrap_or(&NO_DEPENDENTS)
  }

  /// Whether `owner` imports `entry` under any name.
  pub fn has_edge(&self, owner: &str, entry: &str) -> bool {
    self.dependencies_of(owner).values().any(|target| target.as_str() == entry)
  }

  /// True if nothing but `excluding` still depends on `entry`.
  pub fn is_orphan(&self, entry: &str, excluding: &str) -> bool {
    let dependents = self.dependents_of(entry);
    match dependents.len() {
      0 => true,
      1 => dependents.contains(excluding),
      _ => false,
    }
  }

  /// Removes one reverse edge, dropping the key once the set is empty.
  pub fn unlink_dependent(&mut self, entry: &str, dependent: &str) {
    let Some(set) = self.dependents.get_mut(entry) else {
      return;
    };
    set.remove(dependent);
    if set.is_empty() {
      self.dependents.remove(entry);
    }
  }

  /// Deletes both records of `entry` and returns its former dependency map.
  ///
  /// Reverse edges that `entry` held on its own dependencies are left to the
  /// caller, which needs the returned map to cascade anyway.
  pub fn remove_entry(&mut self, entry: &str) -> DependencyMap {
    self.dependents.remove(entry);
    self.dependencies.remove(entry).unwrap_or_default()
  }

  /// Points `owner`'s `name` at `entry`, updating both maps.
  ///
  /// Returns the entry the name pointed at before, if it was a different one.
  pub fn add_dependency(&mut self, owner: &PkgId, name: &str, entry: &PkgId) -> Option<PkgId> {
    let previous = self
      .dependencies
      .entry(owner.clone())
      .or_default()
      .insert(name.to_string(), entry.clone());

    self.dependents.entry(entry.clone()).or_default().insert(owner.clone());

    match previous {
      Some(old) if old != *entry => {
        self.release(owner.as_str(), old.as_str());
        Some(old)
      }
      _ => None,
    }
  }

  /// Removes `owner`'s `name` edge from both maps and returns its target.
  pub fn remove_dependency(&mut self, owner: &str, name: &str) -> Option<PkgId> {
    let deps = self.dependencies.get_mut(owner)?;
    let entry = deps.remove(name)?;
    if deps.is_empty() {
      self.dependencies.remove(owner);
    }
    self.release(owner, entry.as_str());
    Some(entry)
  }

  /// Drops the reverse edge unless another name of `owner` still uses `entry`.
  fn release(&mut self, owner: &str, entry: &str) {
    if !self.has_edge(owner, entry) {
      self.unlink_dependent(entry, owner);
    }
  }

  /// Ids that own dependency records.
  pub fn owners(&self) -> impl Iterator<Item = &PkgId> {
    self.dependencies.keys()
  }

  /// Every store entry known to the graph: edge targets and dependents keys.
  pub fn entries(&self) -> BTreeSet<&PkgId> {
    let mut entries: BTreeSet<&PkgId> = self.dependents.keys().collect();
    for deps in self.dependencies.values() {
      entries.extend(deps.values());
    }
    entries
  }

  /// Whether `id` appears anywhere in the graph.
  pub fn contains(&self, id: &str) -> bool {
    self.dependencies.contains_key(id)
      || self.dependents.contains_key(id)
      || self.dependencies.values().any(|deps| deps.values().any(|e| e.as_str() == id))
  }

  /// Projects that own dependencies. An entry that lost all dependents but
  /// still owns records is not a root.
  pub fn roots(&self) -> Vec<&PkgId> {
    self.dependencies.keys().filter(|owner| owner.is_project()).collect()
  }

  /// Ids reachable from `starts` through dependency edges, `starts` included.
  pub fn reachable_from<'a>(&self, starts: impl IntoIterator<Item = &'a PkgId>) -> HashSet<PkgId> {
    let mut reachable: HashSet<PkgId> = HashSet::new();
    let mut stack: Vec<&PkgId> = starts.into_iter().collect();
    while let Some(id) = stack.pop() {
      if reachable.insert(id.clone()) {
        stack.extend(self.dependencies_of(id.as_str()).values());
      }
    }
    reachable
  }

  /// Removes `entry` with every edge into and out of it. Returns its former
  /// dependency map.
  pub fn detach_entry(&mut self, entry: &str) -> DependencyMap {
    let owners: Vec<PkgId> = self.dependents_of(entry).iter().cloned().collect();
    for owner in owners {
      let aliases: Vec<String> = self
        .dependencies_of(owner.as_str())
        .iter()
        .filter(|(_, target)| target.as_str() == entry)
        .map(|(name, _)| name.clone())
        .collect();
      for name in aliases {
        self.remove_dependency(owner.as_str(), &name);
      }
    }

    let deps = self.remove_entry(entry);
    for dep in deps.values() {
      self.unlink_dependent(dep.as_str(), entry);
    }
    deps
  }

  /// Store entries that no root reaches through dependency edges.
  pub fn unreachable_entries(&self) -> Vec<PkgId> {
    let mut reachable: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = self.roots().into_iter().map(PkgId::as_str).collect();

    while let Some(id) = stack.pop() {
      if !reachable.insert(id) {
        continue;
      }
      stack.extend(self.dependencies_of(id).values().map(PkgId::as_str));
    }

    let mut unreachable: BTreeSet<&PkgId> = self.entries();
    unreachable.extend(self.dependencies.keys());
    unreachable
      .into_iter()
      .filter(|id| !reachable.contains(id.as_str()))
      .cloned()
      .collect()
  }

  /// Dependency cycles, each as a sorted list of members.
  pub fn cycles(&self) -> Vec<Vec<PkgId>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for (owner, deps) in &self.dependencies {
      for entry in deps.values() {
        graph.add_edge(owner.as_str(), entry.as_str(), ());
      }
    }

    let mut cycles: Vec<Vec<PkgId>> = tarjan_scc(&graph)
      .into_iter()
      .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
      .map(|scc| {
        let mut members: Vec<PkgId> = scc.into_iter().map(PkgId::from).collect();
        members.sort();
        members
      })
      .collect();
    cycles.sort();
    cycles
  }

  /// Checks that the two maps are transposes and hold no empty records.
  pub fn verify(&self) -> Vec<GraphIssue> {
    let mut issues = Vec::new();

    for (owner, deps) in &self.dependencies {
      if deps.is_empty() {
        issues.push(GraphIssue::EmptyRecord { id: owner.clone() });
      }
      let targets: BTreeSet<&PkgId> = deps.values().collect();
      for entry in targets {
        if !self.dependents_of(entry.as_str()).contains(owner) {
          issues.push(GraphIssue::MissingDependent {
            owner: owner.clone(),
            entry: entry.clone(),
          });
        }
      }
    }

    for (entry, dependents) in &self.dependents {
      if dependents.is_empty() {
        issues.push(GraphIssue::EmptyRecord { id: entry.clone() });
      }
      for dependent in dependents {
        if !self.has_edge(dependent.as_str(), entry.as_str()) {
          issues.push(GraphIssue::DanglingDependent {
            entry: entry.clone(),
            dependent: dependent.clone(),
          });
        }
      }
    }

    issues
  }
}
