use std::time::Instant;

use anyhow::Result;

use pkgstore_lib::server::{Request, Response};

use super::{execute, unexpected};
use crate::Settings;
use crate::output::{format_bytes, format_duration, print_info, print_json, print_stat, print_success, print_warning};

pub fn cmd_prune(settings: &Settings, dry_run: bool) -> Result<()> {
  let start = Instant::now();

  let report = match execute(settings, Request::Prune { dry_run }, "prune")? {
    Response::Pruned(report) => report,
    other => return Err(unexpected(other)),
  };

  if settings.output.is_json() {
    return print_json(&report);
  }

  println!();
  if dry_run {
    print_info("Dry run - no changes made");
  } else {
    print_success("Prune complete!");
  }
  print_stat("Unreachable entries", &report.unreachable_entries.len().to_string());
  print_stat("Directories removed", &report.deleted_paths.len().to_string());
  print_stat("Space freed", &format_bytes(report.bytes_freed));
  print_stat("Duration", &format_duration(start.elapsed()));

  if settings.verbose {
    for path in &report.deleted_paths {
      println!("  {}", path.display());
    }
  }
  for warning in &report.warnings {
    print_warning(&format!("Could not remove {}: {}", warning.path.display(), warning.message));
  }

  Ok(())
}
