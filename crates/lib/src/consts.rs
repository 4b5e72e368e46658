/// Application name, used for platform directories.
pub const APP_NAME: &str = "pkgstore";

/// Name of the persisted dependency graph inside the store root.
pub const STORE_JSON: &str = "store.json";

/// Name of the lock file inside the store root.
pub const LOCK_FILENAME: &str = ".lock";

/// Subdirectory of a content directory holding the package files.
pub const PACKAGE_DIR: &str = "package";

/// Port the store server listens on unless configured otherwise.
pub const DEFAULT_SERVER_PORT: u16 = 5813;

/// Project-local install directory.
pub const NODE_MODULES: &str = "node_modules";

/// Shim directory inside the install directory.
pub const BIN_DIR: &str = ".bin";
