//! File-based store locking for mutual exclusion.
//!
//! The lock is an OS advisory lock (`flock` on unix, `LockFileEx` on Windows)
//! on a `.lock` file in the store root. The file holds JSON metadata about the
//! holder. The OS drops the lock when the holder's process dies, so a crashed
//! holder never blocks the store; its metadata is left behind and reported as
//! reclaimed by the next acquirer.
//!
//! While held, a background thread keeps the file's modification time fresh.
//! A held lock whose modification time is older than the stale duration
//! belongs to a holder that stopped refreshing; contenders log it, but only
//! the OS can break the lock.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::LOCK_FILENAME;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(10);

/// What to do when another live process holds the lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
  /// Block until the holder releases it.
  #[default]
  Wait,
  /// Return [`StoreLockError::Contention`] immediately.
  Fail,
}

impl fmt::Display for LockMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LockMode::Wait => f.write_str("wait"),
      LockMode::Fail => f.write_str("fail"),
    }
  }
}

impl FromStr for LockMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "wait" => Ok(LockMode::Wait),
      "fail" => Ok(LockMode::Fail),
      other => Err(format!("unknown lock mode '{other}' (expected 'wait' or 'fail')")),
    }
  }
}

#[derive(Debug, Clone)]
pub struct LockOptions {
  pub stale: Duration,
  pub mode: LockMode,
  pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub store: PathBuf,
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "Store is locked by another process: {command} (PID {pid}, started {started_at})\n\
             If you're sure no pkgstore process is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    command: String,
    pid: u32,
    started_at: String,
    lock_path: PathBuf,
  },

  #[error(
    "Store is locked (could not read lock metadata)\n\
             If you're sure no pkgstore process is running, remove the lock file:\n  {lock_path}"
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("Failed to create store directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("Failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("Failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("Failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// An exclusive hold on a store directory. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
  file: File,
  lock_path: PathBuf,
  refresher: Option<Refresher>,
}

#[derive(Debug)]
struct Refresher {
  stop: mpsc::Sender<()>,
  handle: JoinHandle<()>,
}

impl StoreLock {
  pub fn acquire(store: &Path, options: &LockOptions) -> Result<Self, StoreLockError> {
    let lock_path = store.join(LOCK_FILENAME);

    if !store.exists() {
      fs::create_dir_all(store).map_err(StoreLockError::CreateDir)?;
    }

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(StoreLockError::OpenFile)?;

    let mut announced_wait = false;
    let mut announced_stale = false;

    loop {
      match try_lock(&file) {
        Ok(()) => break,
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
        Err(err) => return Err(StoreLockError::LockFailed(err)),
      }

      if !announced_stale && let Some(age) = heartbeat_age(&lock_path, options.stale) {
        warn!(
          lock = %lock_path.display(),
          age = %humantime::format_duration(truncate_to_secs(age)),
          "store lock holder has stopped refreshing its lock"
        );
        announced_stale = true;
      }

      match options.mode {
        LockMode::Fail => return Err(Self::read_contention_error(&lock_path)),
        LockMode::Wait => {
          if !announced_wait {
            info!(lock = %lock_path.display(), "store is locked by another process, waiting");
            announced_wait = true;
          }
          std::thread::sleep(POLL_INTERVAL);
        }
      }
    }

    if let Some(previous) = read_from(&file) {
      warn!(
        lock = %lock_path.display(),
        pid = previous.pid,
        command = %previous.command,
        "reclaiming stale store lock"
      );
    }
    Self::write_metadata(&file, &options.command, store)?;
    debug!(lock = %lock_path.display(), command = %options.command, "store lock acquired");

    let refresher = match file.try_clone() {
      Ok(handle) => Some(Refresher::spawn(handle, lock_path.clone(), refresh_interval(options.stale))),
      Err(e) => {
        warn!(lock = %lock_path.display(), error = %e, "store lock will not be refreshed");
        None
      }
    };

    Ok(StoreLock {
      file,
      lock_path,
      refresher,
    })
  }

  /// Metadata of the process currently holding the lock on `store`.
  ///
  /// `None` when nobody holds it, including when a lock file was left behind
  /// by a holder that died.
  pub fn inspect(store: &Path) -> Option<LockMetadata> {
    let lock_path = store.join(LOCK_FILENAME);
    let file = File::open(&lock_path).ok()?;
    match try_lock(&file) {
      // Nobody holds it; dropping the handle unlocks it again.
      Ok(()) => None,
      Err(_) => {
        let contents = fs::read_to_string(&lock_path).ok()?;
        serde_json::from_str(&contents).ok()
      }
    }
  }

  /// Reads the lock metadata from the held file handle.
  ///
  /// A second handle cannot read the locked range on Windows.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  fn write_metadata(file: &File, command: &str, store: &Path) -> Result<(), StoreLockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
      store: store.to_path_buf(),
    };

    file.set_len(0).map_err(StoreLockError::WriteMetadata)?;
    let mut file = file;
    file.seek(SeekFrom::Start(0)).map_err(StoreLockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata)
      .map_err(|e| StoreLockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(StoreLockError::WriteMetadata)?;

    Ok(())
  }

  fn read_contention_error(lock_path: &Path) -> StoreLockError {
    if let Ok(contents) = fs::read_to_string(lock_path)
      && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
    {
      let started = UNIX_EPOCH + Duration::from_secs(metadata.started_at_unix);
      return StoreLockError::Contention {
        command: metadata.command,
        pid: metadata.pid,
        started_at: humantime::format_rfc3339_seconds(started).to_string(),
        lock_path: lock_path.to_path_buf(),
      };
    }

    StoreLockError::ContentionUnknown {
      lock_path: lock_path.to_path_buf(),
    }
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

impl Drop for StoreLock {
  fn drop(&mut self) {
    if let Some(refresher) = self.refresher.take() {
      drop(refresher.stop);
      let _ = refresher.handle.join();
    }
    // An empty file tells the next holder this one released cleanly. The OS
    // lock goes away with the handle.
    match self.file.set_len(0) {
      Ok(()) => debug!(lock = %self.lock_path.display(), "store lock released"),
      Err(e) => warn!(lock = %self.lock_path.display(), error = %e, "failed to clear store lock metadata"),
    }
  }
}

impl Refresher {
  fn spawn(file: File, lock_path: PathBuf, interval: Duration) -> Self {
    let (stop, stop_rx) = mpsc::channel::<()>();
    let handle = std::thread::spawn(move || {
      loop {
        match stop_rx.recv_timeout(interval) {
          Err(RecvTimeoutError::Timeout) => {
            if let Err(e) = file.set_modified(SystemTime::now()) {
              warn!(lock = %lock_path.display(), error = %e, "failed to refresh store lock");
            }
          }
          Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
      }
    });
    Refresher { stop, handle }
  }
}

fn refresh_interval(stale: Duration) -> Duration {
  (stale / 2).max(MIN_REFRESH_INTERVAL)
}

/// Metadata a previous holder left in the file, if any.
fn read_from(file: &File) -> Option<LockMetadata> {
  let mut file = file;
  file.seek(SeekFrom::Start(0)).ok()?;
  let mut contents = String::new();
  file.read_to_string(&mut contents).ok()?;
  serde_json::from_str(&contents).ok()
}

/// How long the holder has gone without refreshing, once that exceeds `stale`.
fn heartbeat_age(lock_path: &Path, stale: Duration) -> Option<Duration> {
  let modified = fs::metadata(lock_path).and_then(|m| m.modified()).ok()?;
  modified.elapsed().ok().filter(|age| *age > stale)
}

fn truncate_to_secs(duration: Duration) -> Duration {
  Duration::from_secs(duration.as_secs())
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(
      handle,
      LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
      0,
      1,
      0,
      &mut overlapped,
    )
  };

  if result != 0 {
    return Ok(());
  }
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    Err(io::Error::new(io::ErrorKind::WouldBlock, err))
  } else {
    Err(err)
  }
}
