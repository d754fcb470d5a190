use crate::storage::DurabilityMode;
use std::time::Duration;

/// What startup does with a store it cannot use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPolicy {
    /// Report the failure and leave the store on disk untouched.
    #[default]
    Fail,
    /// Replace the store with a fresh empty one. Destroys user data.
    Recreate,
}

/// Persistence controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// fsync store files before they replace the previous version
    pub durability: DurabilityMode,

    /// Policy when the registry has no path from the stored schema
    pub on_incompatible: RecoveryPolicy,

    /// Policy when the store header is unreadable
    pub on_corrupt: RecoveryPolicy,

    /// Keep the pre-migration store as `<file>.bak`
    pub keep_backup: bool,

    /// Maximum wait for another `start()` on the same location (None waits forever)
    pub lock_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            durability: DurabilityMode::Sync,
            on_incompatible: RecoveryPolicy::Fail,
            on_corrupt: RecoveryPolicy::Fail,
            keep_backup: false,
            lock_timeout: None,
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set durability mode
    pub fn durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Set policy for stores with no migration path
    pub fn on_incompatible(mut self, policy: RecoveryPolicy) -> Self {
        self.on_incompatible = policy;
        self
    }

    /// Set policy for corrupt stores
    pub fn on_corrupt(mut self, policy: RecoveryPolicy) -> Self {
        self.on_corrupt = policy;
        self
    }

    /// Keep a backup of the store before migrating it
    pub fn keep_backup(mut self, keep: bool) -> Self {
        self.keep_backup = keep;
        self
    }

    /// Set lock wait timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_timeout == Some(Duration::ZERO) {
            return Err("lock_timeout must be > 0".to_string());
        }

        Ok(())
    }
}
