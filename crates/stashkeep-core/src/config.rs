//! Centralized configuration for stashkeep.
//!
//! Constants live on marker structs; runtime-tunable values live on the
//! options structs with `Default` impls.

use std::path::PathBuf;
use std::time::Duration;

/// Registry persistence configuration.
pub struct RegistryConfig;

impl RegistryConfig {
    pub const APP_DIR_NAME: &'static str = "stashkeep";
    pub const FILE_NAME: &'static str = "containers.json";
    pub const SCHEMA_VERSION: u32 = 1;
    pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(100);
    /// Suffix for a registry file that failed to parse.
    pub const CORRUPT_SUFFIX: &'static str = "corrupt";
}

/// Container access configuration.
pub struct AccessConfig;

impl AccessConfig {
    /// Lock name shared by every container when the coarse scope is used.
    pub const SHARED_LOCK_NAME: &'static str = "container";
    /// Upper bound on the volume scanned by a single discovery call.
    pub const MAX_SCAN_BLOCKS: u64 = 262_144;
}

/// Options for [`crate::registry::RegistryStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Path of the registry JSON document.
    pub path: PathBuf,
    /// Window in which repeated saves collapse into one write.
    pub debounce: Duration,
}

impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            debounce: RegistryConfig::SAVE_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new(default_registry_path())
    }
}

/// Platform default location of the registry file.
///
/// Falls back to the working directory when no data directory is known.
pub fn default_registry_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(RegistryConfig::APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(RegistryConfig::FILE_NAME)
}

/// How container accesses are keyed in the [`crate::lock::KeyedMutex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockScope {
    /// Every container shares one key, so an actor touches one container at a time.
    Shared(String),
    /// Each container gets its own key, derived from world and primary coordinate.
    PerContainer,
}

impl Default for LockScope {
    fn default() -> Self {
        LockScope::Shared(AccessConfig::SHARED_LOCK_NAME.to_string())
    }
}

/// Options for [`crate::access::AccessCoordinator`].
#[derive(Debug, Clone, Default)]
pub struct CoordinatorOptions {
    pub lock_scope: LockScope,
    /// Bound on approach + open + use. Closing always runs after it.
    pub access_timeout: Option<Duration>,
}
