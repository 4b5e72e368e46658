//! Store configuration.
//!
//! Values are layered: built-in defaults, then the optional JSON file at
//! `{config_dir}/config.json`, then `PKGSTORE_*` environment variables.
//! Command-line flags are applied on top by the CLI.
//!
//! ```json
//! {
//!   "store": "/var/cache/pkgstore",
//!   "lockStaleDuration": "5m",
//!   "networkConcurrency": 16,
//!   "lockMode": "wait",
//!   "server": "127.0.0.1:5813"
//! }
//! ```

use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::consts::DEFAULT_SERVER_PORT;
use crate::platform::paths::{config_dir, store_dir};
use crate::store_lock::{LockMode, LockOptions};

const CONFIG_FILENAME: &str = "config.json";
const DEFAULT_LOCK_STALE: Duration = Duration::from_secs(5 * 60);
const DEFAULT_NETWORK_CONCURRENCY: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid value for {key}: {message}")]
  Invalid { key: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
  /// Store root.
  pub store: PathBuf,
  /// Age after which a lock file is considered abandoned.
  pub lock_stale_duration: Duration,
  /// Maximum simultaneous fetches within one install.
  pub network_concurrency: usize,
  pub lock_mode: LockMode,
  /// Address the store server listens on and clients connect to.
  pub server_addr: SocketAddr,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      store: store_dir(),
      lock_stale_duration: DEFAULT_LOCK_STALE,
      network_concurrency: DEFAULT_NETWORK_CONCURRENCY,
      lock_mode: LockMode::Wait,
      server_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_SERVER_PORT)),
    }
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConfigFile {
  store: Option<PathBuf>,
  lock_stale_duration: Option<String>,
  network_concurrency: Option<usize>,
  lock_mode: Option<LockMode>,
  server: Option<String>,
}

impl StoreConfig {
  /// Load configuration from the default file location and the environment.
  pub fn load() -> Result<Self, ConfigError> {
    Self::load_from(&config_dir().join(CONFIG_FILENAME))
  }

  /// Load configuration from `path` (if it exists) and the environment.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let mut config = Self::default();

    match fs::read_to_string(path) {
      Ok(content) => {
        let file: ConfigFile = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
          path: path.to_path_buf(),
          source,
        })?;
        config.apply_file(file)?;
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(source) => {
        return Err(ConfigError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    }

    config.apply_env()?;
    config.validate()?;
    Ok(config)
  }

  fn apply_file(&mut self, file: ConfigFile) -> Result<(), ConfigError> {
    if let Some(store) = file.store {
      self.store = store;
    }
    if let Some(stale) = file.lock_stale_duration {
      self.lock_stale_duration = parse_duration("lockStaleDuration", &stale)?;
    }
    if let Some(concurrency) = file.network_concurrency {
      self.network_concurrency = concurrency;
    }
    if let Some(mode) = file.lock_mode {
      self.lock_mode = mode;
    }
    if let Some(server) = file.server {
      self.server_addr = parse_addr("server", &server)?;
    }
    Ok(())
  }

  fn apply_env(&mut self) -> Result<(), ConfigError> {
    if let Ok(store) = std::env::var("PKGSTORE_STORE") {
      self.store = PathBuf::from(store);
    }
    if let Ok(stale) = std::env::var("PKGSTORE_LOCK_STALE") {
      self.lock_stale_duration = parse_duration("PKGSTORE_LOCK_STALE", &stale)?;
    }
    if let Ok(concurrency) = std::env::var("PKGSTORE_NETWORK_CONCURRENCY") {
      self.network_concurrency = concurrency.parse().map_err(|e| ConfigError::Invalid {
        key: "PKGSTORE_NETWORK_CONCURRENCY".to_string(),
        message: format!("{e}"),
      })?;
    }
    if let Ok(mode) = std::env::var("PKGSTORE_LOCK_MODE") {
      self.lock_mode = mode.parse().map_err(|message| ConfigError::Invalid {
        key: "PKGSTORE_LOCK_MODE".to_string(),
        message,
      })?;
    }
    if let Ok(server) = std::env::var("PKGSTORE_SERVER") {
      self.server_addr = parse_addr("PKGSTORE_SERVER", &server)?;
    }
    Ok(())
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.lock_stale_duration.is_zero() {
      return Err(ConfigError::Invalid {
        key: "lockStaleDuration".to_string(),
        message: "must be longer than zero".to_string(),
      });
    }
    if self.network_concurrency == 0 {
      return Err(ConfigError::Invalid {
        key: "networkConcurrency".to_string(),
        message: "must be at least 1".to_string(),
      });
    }
    Ok(())
  }

  pub fn lock_options(&self, command: &str) -> LockOptions {
    LockOptions {
      stale: self.lock_stale_duration,
      mode: self.lock_mode,
      command: command.to_string(),
    }
  }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
  humantime::parse_duration(value).map_err(|e| ConfigError::Invalid {
    key: key.to_string(),
    message: e.to_string(),
  })
}

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr, ConfigError> {
  value.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
    key: key.to_string(),
    message: e.to_string(),
  })
}
