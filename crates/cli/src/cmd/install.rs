use std::path::Path;

use anyhow::{Context, Result};

use pkgstore_lib::controller::InstallRequest;
use pkgstore_lib::manifest::SaveType;
use pkgstore_lib::server::{Request, Response};

use super::{execute, unexpected};
use crate::Settings;
use crate::output::{print_json, print_stat, print_success, print_warning, symbols};

pub fn cmd_install(settings: &Settings, request_path: &Path, dir: &Path, save: Option<SaveType>) -> Result<()> {
  let content = std::fs::read_to_string(request_path)
    .with_context(|| format!("Failed to read install request: {}", request_path.display()))?;
  let mut request: InstallRequest = serde_json::from_str(&content)
    .with_context(|| format!("Invalid install request: {}", request_path.display()))?;
  if save.is_some() {
    request.save = save;
  }

  // Relative content sources are relative to the request file.
  let base = request_path.parent().unwrap_or(Path::new("."));
  for package in &mut request.packages {
    let Some(source) = package.source.take() else {
      continue;
    };
    let source = if source.is_relative() { base.join(source) } else { source };
    package.source = Some(dunce::canonicalize(&source).unwrap_or(source));
  }

  let project = dunce::canonicalize(dir).with_context(|| format!("Project directory not found: {}", dir.display()))?;
  let report = match execute(settings, Request::Install { project, request }, "install")? {
    Response::Installed(report) => report,
    other => return Err(unexpected(other)),
  };

  if settings.output.is_json() {
    return print_json(&report);
  }

  print_success(&format!("Linked {} package(s)", report.linked.len()));
  for name in &report.linked {
    println!("  {} {}", symbols::ADD, name);
  }
  print_stat("Fetched", &report.fetched.len().to_string());
  if !report.purged_from_store.is_empty() {
    print_stat("Purged from store", &report.purged_from_store.len().to_string());
  }
  for warning in &report.warnings {
    print_warning(&format!("{}: {}", warning.path.display(), warning.message));
  }

  Ok(())
}
