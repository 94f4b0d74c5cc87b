//! Store configuration
//!
//! Loaded from TOML so ingestion behaviour can be adjusted per trace producer
//! without recompiling.
//!
//! # Example TOML
//! ```toml
//! root_task = 0
//! link_parent_on_register = true
//! require_registered_root = false
//! ```

use crate::task::{TaskId, ROOT_TASK};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Ingestion and traversal settings for a [`crate::store::TraceStore`]
///
/// # Example
/// ```
/// use taskscope::config::StoreConfig;
///
/// let config = StoreConfig::default();
/// assert_eq!(config.root_task, 0);
/// assert!(config.link_parent_on_register);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Synthetic root every critical path starts from
    pub root_task: TaskId,

    /// Record the parent/child relation when a task is registered with a parent
    ///
    /// Trace producers that emit relations separately should turn this off.
    pub link_parent_on_register: bool,

    /// Require the root task to be registered before critical edges leave it
    ///
    /// Off by default: the root is synthetic and usually has no task row.
    pub require_registered_root: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_task: ROOT_TASK,
            link_parent_on_register: true,
            require_registered_root: false,
        }
    }
}

impl StoreConfig {
    /// Load configuration from a TOML file; missing keys take their defaults
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML store configuration")
    }
}
