use std::path::Path;

use anyhow::{Context, Result};

use pkgstore_lib::manifest::SaveType;
use pkgstore_lib::server::{Request, Response};

use super::{execute, unexpected};
use crate::Settings;
use crate::output::{print_info, print_json, print_stat, print_success, print_warning, symbols};

pub fn cmd_uninstall(settings: &Settings, names: Vec<String>, dir: &Path, save: Option<SaveType>) -> Result<()> {
  let project = dunce::canonicalize(dir).with_context(|| format!("Project directory not found: {}", dir.display()))?;

  let request = Request::Uninstall { project, names, save };
  let report = match execute(settings, request, "uninstall")? {
    Response::Uninstalled(report) => report,
    other => return Err(unexpected(other)),
  };

  if settings.output.is_json() {
    return print_json(&report);
  }

  if report.removed_from_project.is_empty() {
    print_info("Nothing to uninstall");
    return Ok(());
  }

  print_success(&format!("Removed {} package(s)", report.removed_from_project.len()));
  for name in &report.removed_from_project {
    println!("  {} {}", symbols::REMOVE, name);
  }
  print_stat("Purged from store", &report.purged_from_store.len().to_string());
  if settings.verbose {
    for entry in &report.purged_from_store {
      println!("  {} {}", symbols::REMOVE, entry);
    }
  }
  for warning in &report.warnings {
    print_warning(&format!("Could not remove {}: {}", warning.path.display(), warning.message));
  }

  Ok(())
}
