//! Cascading uninstall planning.
//!
//! Given the store entries a project stops importing, [`plan_uninstall`] finds
//! every entry that no longer has a consumer, removes it from the graph, and
//! follows its own dependencies down the tree. The cascade runs as a worklist
//! that is rescanned until a full round removes nothing, so deep dependency
//! trees never grow the call stack.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::graph::{PkgId, StoreGraph};

/// Removes orphaned entries from `graph` and returns them in removal order.
///
/// `candidates` are the entries `project` is releasing. The project's root
/// edges should already be unlinked; a leftover reverse edge from `project` is
/// discounted only while `project` holds no live dependency on the candidate.
///
/// An entry always precedes its own dependencies in the result, so callers can
/// delete content front to back without leaving a live edge to missing content.
pub fn plan_uninstall(graph: &mut StoreGraph, candidates: Vec<PkgId>, project: &PkgId) -> Vec<PkgId> {
  let mut worklist = candidates;
  let mut removed: Vec<PkgId> = Vec::new();
  let mut seen: HashSet<PkgId> = HashSet::new();
  let mut round = 0usize;

  loop {
    round += 1;
    let mut progress = false;
    let mut i = 0;

    while i < worklist.len() {
      let candidate = &worklist[i];

      if seen.contains(candidate) {
        worklist.remove(i);
        continue;
      }

      if !is_removable(graph, candidate, project) {
        i += 1;
        continue;
      }

      let candidate = worklist.remove(i);
      let deps = graph.remove_entry(candidate.as_str());
      debug!(entry = %candidate, dependencies = deps.len(), round, "entry orphaned");

      for dep in deps.into_values() {
        graph.unlink_dependent(dep.as_str(), candidate.as_str());
        worklist.push(dep);
      }

      seen.insert(candidate.clone());
      removed.push(candidate);
      progress = true;
    }

    if !progress {
      break;
    }
  }

  debug!(removed = removed.len(), retained = worklist.len(), rounds = round, "uninstall plan complete");
  removed
}

/// Removes the unreachable entries among `scope` and returns them.
///
/// The cascade cannot break a cycle whose members only depend on each other.
/// Passing what the released entries reached before planning as `scope` sweeps
/// exactly the cycles the uninstall orphaned; older garbage stays for prune.
pub fn sweep_unreachable(graph: &mut StoreGraph, scope: &HashSet<PkgId>) -> Vec<PkgId> {
  let mut garbage: BTreeSet<PkgId> = graph
    .unreachable_entries()
    .into_iter()
    .filter(|entry| scope.contains(entry))
    .collect();

  // An entry still used by garbage outside the scope goes when that does.
  loop {
    let held: Vec<PkgId> = garbage
      .iter()
      .filter(|entry| {
        graph
          .dependents_of(entry.as_str())
          .iter()
          .any(|dependent| !garbage.contains(dependent))
      })
      .cloned()
      .collect();
    if held.is_empty() {
      break;
    }
    for entry in &held {
      garbage.remove(entry);
    }
  }

  for entry in &garbage {
    graph.detach_entry(entry.as_str());
    debug!(entry = %entry, "unreachable entry swept");
  }
  garbage.into_iter().collect()
}

fn is_removable(graph: &StoreGraph, candidate: &PkgId, project: &PkgId) -> bool {
  graph.is_orphan(candidate.as_str(), project.as_str()) && !graph.has_edge(project.as_str(), candidate.as_str())
}
