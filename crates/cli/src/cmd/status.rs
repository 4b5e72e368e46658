//! Status command implementation.
//!
//! Displays store size, consistency problems and who holds the lock.

use anyhow::Result;

use pkgstore_lib::server::{Request, Response};

use super::{execute, unexpected};
use crate::Settings;
use crate::output::{print_error, print_info, print_json, print_stat, print_success, print_warning, symbols};

pub fn cmd_status(settings: &Settings) -> Result<()> {
  let status = match execute(settings, Request::Status, "status")? {
    Response::Status(status) => status,
    other => return Err(unexpected(other)),
  };

  if settings.output.is_json() {
    return print_json(&status);
  }

  print_info(&format!("Store: {}", status.store.display()));
  print_stat("Entries", &status.entries.to_string());
  print_stat("Owners", &status.owners.to_string());
  if let Some(holder) = &status.lock {
    print_stat("Locked by", &format!("{} (PID {})", holder.command, holder.pid));
  }
  println!();

  if status.is_consistent() && status.cycles.is_empty() {
    print_success("Store is consistent");
    return Ok(());
  }

  for issue in &status.issues {
    print_error(issue);
  }
  if !status.unreachable.is_empty() {
    print_warning(&format!(
      "{} unreachable entr(ies), run 'pkgstore prune' to remove them",
      status.unreachable.len()
    ));
    if settings.verbose {
      for entry in &status.unreachable {
        println!("  {} {}", symbols::INFO, entry);
      }
    }
  }
  for cycle in &status.cycles {
    let members: Vec<&str> = cycle.iter().map(|id| id.as_str()).collect();
    print_info(&format!("Dependency cycle: {}", members.join(&format!(" {} ", symbols::ARROW))));
  }

  Ok(())
}
