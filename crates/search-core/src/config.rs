// search-core/src/config.rs
//! 配置模块

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Core configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoreConfig {
    /// Roots of the name index
    pub watch_paths: Vec<PathBuf>,
    pub backends: BackendFilter,
    pub shutdown: ShutdownConfig,
    /// Change notifications buffered per session before it starts lagging
    pub change_feed_capacity: usize,
}

/// Which backends may register, by case-insensitive name.
///
/// A non-empty allow list wins; otherwise every backend not denied is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendFilter {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

/// Shutdown drain configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownConfig {
    /// Upper bound between two progress reports while draining
    pub poll_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            watch_paths: vec![],
            backends: BackendFilter::default(),
            shutdown: ShutdownConfig::default(),
            change_feed_capacity: 256,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl BackendFilter {
    pub fn permits(&self, name: &str) -> bool {
        if !self.allow.is_empty() {
            return self.allow.iter().any(|allowed| allowed.eq_ignore_ascii_case(name));
        }
        !self.deny.iter().any(|denied| denied.eq_ignore_ascii_case(name))
    }
}
