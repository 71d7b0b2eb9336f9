//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::transaction::IsolationLevel;

/// Default time a write waits for a row lock before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default iteration bound for recursive common table expressions
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Default nesting bound for triggers that issue statements
pub const DEFAULT_MAX_TRIGGER_DEPTH: usize = 16;

/// Commit log file name inside the data directory
pub const LOG_FILE_NAME: &str = "keeldb.log";

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the commit log; `None` keeps the database in memory only
    pub data_dir: Option<PathBuf>,
    /// How long a write blocks on a row held by another transaction
    pub lock_timeout: Duration,
    /// Maximum fixed-point iterations of a recursive CTE
    pub max_recursion_depth: usize,
    /// Isolation level for sessions that never set one
    pub default_isolation: IsolationLevel,
    /// Maximum nesting of trigger-issued statements
    pub max_trigger_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            default_isolation: IsolationLevel::ReadCommitted,
            max_trigger_depth: DEFAULT_MAX_TRIGGER_DEPTH,
        }
    }
}

impl EngineConfig {
    /// Create a new engine config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist commits to a log in this directory
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Set the lock wait timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the recursive CTE iteration limit
    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    /// Set the default isolation level for new sessions
    pub fn default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = level;
        self
    }

    /// Set the trigger nesting limit
    pub fn max_trigger_depth(mut self, depth: usize) -> Self {
        self.max_trigger_depth = depth;
        self
    }

    /// Path of the commit log, if persistence is enabled
    pub fn log_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(LOG_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::new()
            .lock_timeout(Duration::from_millis(250))
            .max_recursion_depth(10)
            .default_isolation(IsolationLevel::Serializable)
            .data_dir("/tmp/keel");

        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.max_recursion_depth, 10);
        assert_eq!(config.default_isolation, IsolationLevel::Serializable);
        assert_eq!(
            config.log_path(),
            Some(PathBuf::from("/tmp/keel").join(LOG_FILE_NAME))
        );
    }

    #[test]
    fn test_in_memory_by_default() {
        assert!(EngineConfig::default().log_path().is_none());
    }
}
