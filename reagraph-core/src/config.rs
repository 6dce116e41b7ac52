//! Context configuration.
//!
//! ```rust
//! use reagraph_core::{Context, ContextConfig};
//!
//! let config = ContextConfig::from_json(r#"{ "label": "editor", "max_depth": 64 }"#).unwrap();
//! assert!(!config.log_commits);
//!
//! let ctx = Context::with_config(config);
//! assert_eq!(ctx.label(), "editor");
//! ```

use serde::{Deserialize, Serialize};

/// Default bound on nested recomputations within one transaction.
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// Settings of a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Name used in logs.
    pub label: Option<String>,
    /// Install [`log_commit`](crate::reactive::log_commit) as an observer.
    pub log_commits: bool,
    /// Deepest chain of atoms that may be recomputing at once before the
    /// transaction gives up with [`Error::DepthExceeded`](crate::Error::DepthExceeded).
    pub max_depth: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            label: None,
            log_commits: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ContextConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_log_commits(mut self, enabled: bool) -> Self {
        self.log_commits = enabled;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
