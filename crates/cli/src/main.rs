use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pkgstore_lib::config::StoreConfig;
use pkgstore_lib::store_lock::LockMode;

mod cmd;
mod output;

use cmd::{SaveArgs, cmd_install, cmd_prune, cmd_server, cmd_status, cmd_uninstall};
use output::OutputFormat;

/// pkgstore - shared package store for Node.js projects
#[derive(Parser)]
#[command(name = "pkgstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
  output: OutputFormat,

  #[command(flatten)]
  store: StoreArgs,

  #[command(subcommand)]
  command: Commands,
}

/// Overrides for the configuration file and environment.
#[derive(Args)]
struct StoreArgs {
  /// Store directory
  #[arg(long, global = true)]
  store: Option<PathBuf>,

  /// Age after which a store lock is considered abandoned (e.g. "5m")
  #[arg(long, global = true, value_parser = humantime::parse_duration)]
  lock_stale_duration: Option<Duration>,

  /// Maximum number of packages fetched at the same time
  #[arg(long, global = true)]
  network_concurrency: Option<usize>,

  /// What to do when the store is locked: wait or fail
  #[arg(long, global = true)]
  lock_mode: Option<LockMode>,

  /// Store server address
  #[arg(long, global = true)]
  server: Option<SocketAddr>,

  /// Never go through a running store server
  #[arg(long, global = true)]
  standalone: bool,
}

#[derive(Subcommand)]
enum Commands {
  /// Install resolved packages into a project
  Install {
    /// JSON file describing the resolved packages and direct dependencies
    request: PathBuf,

    /// Project directory
    #[arg(short = 'C', long, default_value = ".")]
    dir: PathBuf,

    #[command(flatten)]
    save: SaveArgs,
  },

  /// Remove packages from a project and purge what nothing else uses
  #[command(alias = "remove", alias = "rm")]
  Uninstall {
    /// Package names as they appear in node_modules
    #[arg(required = true)]
    names: Vec<String>,

    /// Project directory
    #[arg(short = 'C', long, default_value = ".")]
    dir: PathBuf,

    #[command(flatten)]
    save: SaveArgs,
  },

  /// Run a store server so several package manager runs can share the store
  Server,

  /// Show store contents and consistency
  Status,

  /// Delete store entries and directories no project uses
  Prune {
    /// Show what would be removed without removing anything
    #[arg(long)]
    dry_run: bool,
  },
}

/// Effective settings for one invocation.
pub struct Settings {
  pub config: StoreConfig,
  pub standalone: bool,
  pub output: OutputFormat,
  pub verbose: bool,
}

impl StoreArgs {
  fn apply(self, config: &mut StoreConfig) {
    if let Some(store) = self.store {
      config.store = store;
    }
    if let Some(stale) = self.lock_stale_duration {
      config.lock_stale_duration = stale;
    }
    if let Some(concurrency) = self.network_concurrency {
      config.network_concurrency = concurrency;
    }
    if let Some(mode) = self.lock_mode {
      config.lock_mode = mode;
    }
    if let Some(server) = self.server {
      config.server_addr = server;
    }
  }
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let mut config = StoreConfig::load().context("Failed to load configuration")?;
  let standalone = cli.store.standalone;
  cli.store.apply(&mut config);
  config.validate().context("Invalid configuration")?;

  let settings = Settings {
    config,
    standalone,
    output: cli.output,
    verbose: cli.verbose,
  };

  match cli.command {
    Commands::Install { request, dir, save } => cmd_install(&settings, &request, &dir, save.save_type()),
    Commands::Uninstall { names, dir, save } => cmd_uninstall(&settings, names, &dir, save.save_type()),
    Commands::Server => cmd_server(&settings),
    Commands::Status => cmd_status(&settings),
    Commands::Prune { dry_run } => cmd_prune(&settings, dry_run),
  }
}
