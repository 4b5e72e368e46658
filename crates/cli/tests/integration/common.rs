//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own store, config directory and projects. The server
/// address points at a port nothing listens on, so every command runs
/// standalone.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn store_path(&self) -> PathBuf {
    self.temp.path().join("store")
  }

  /// A project with a minimal manifest.
  pub fn project(&self, name: &str) -> PathBuf {
    self.write_file(
      &format!("{name}/package.json"),
      &format!("{{\n  \"name\": \"{name}\",\n  \"version\": \"1.0.0\"\n}}\n"),
    );
    dunce::canonicalize(self.temp.path().join(name)).unwrap()
  }

  /// A local package source with a manifest and one file.
  pub fn source(&self, id: &str, bin: Option<&str>) {
    let name = id.rsplit_once('@').map(|(n, _)| n).unwrap_or(id);
    let manifest = match bin {
      Some(bin) => format!(r#"{{"name": "{name}", "bin": "{bin}"}}"#),
      None => format!(r#"{{"name": "{name}"}}"#),
    };
    self.write_file(&format!("sources/{id}/package.json"), &manifest);
    self.write_file(&format!("sources/{id}/index.js"), "module.exports = {}\n");
    if let Some(bin) = bin {
      self.write_file(&format!("sources/{id}/{bin}"), "#!/bin/sh\necho ok\n");
    }
  }

  /// Writes an install request next to the sources and returns its path.
  pub fn request(&self, file: &str, json: &str) -> PathBuf {
    self.write_file(file, json)
  }

  /// Get a pre-configured Command for the pkgstore binary.
  ///
  /// - `PKGSTORE_STORE`: isolated store
  /// - `PKGSTORE_SERVER`: an address with no server behind it
  /// - `PKGSTORE_LOCK_MODE`: fail instead of waiting
  /// - `XDG_CONFIG_HOME` / `APPDATA`: no user config file
  pub fn pkgstore_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("pkgstore");
    cmd.env("PKGSTORE_STORE", self.store_path());
    cmd.env("PKGSTORE_SERVER", "127.0.0.1:9");
    cmd.env("PKGSTORE_LOCK_MODE", "fail");
    cmd.env("XDG_CONFIG_HOME", self.temp.path().join("config"));
    cmd.env("APPDATA", self.temp.path().join("config"));
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// Installs leftpad (with a `leftpad` executable) into `project`.
  pub fn install_leftpad(&self, project: &PathBuf) {
    self.source("leftpad@1.0.0", Some("cli.js"));
    let request = self.request(
      "leftpad.json",
      r#"{
        "packages": [{ "id": "leftpad@1.0.0", "source": "sources/leftpad@1.0.0" }],
        "direct": [{ "name": "leftpad", "id": "leftpad@1.0.0", "spec": "^1.0.0" }]
      }"#,
    );
    self
      .pkgstore_cmd()
      .arg("install")
      .arg(&request)
      .arg("-C")
      .arg(project)
      .assert()
      .success();
  }
}
