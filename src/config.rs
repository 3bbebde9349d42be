//! API configuration.
//!
//! Everything here has a usable default, so `ApiConfig::default()` serves a
//! schema as-is. Configuration can also be loaded from JSON:
//!
//! ```json
//! {
//!   "url_prefix": "/api",
//!   "page_size": 10,
//!   "resources": {
//!     "person": {"exclude": ["password"], "default_includes": ["comments"]},
//!     "comment": {"allow_client_generated_ids": true, "read_only": true}
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 100;

/// Per-collection options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// When set, only these fields and relationships are serialized
    pub only: Option<BTreeSet<String>>,
    /// Fields and relationships never serialized
    pub exclude: BTreeSet<String>,
    /// Relationship paths included when the request has no `include`
    pub default_includes: Vec<String>,
    pub allow_client_generated_ids: bool,
    /// Refuse POST, PATCH and DELETE with 405
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Path prefix of every generated URL, such as `/api`
    pub url_prefix: String,
    /// Scheme and host prepended to generated links; empty for relative links
    pub base_url: String,
    pub page_size: u64,
    pub max_page_size: u64,
    pub resources: BTreeMap<String, ResourceConfig>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url_prefix: String::new(),
            base_url: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            resources: BTreeMap::new(),
        }
    }
}

impl ApiConfig {
    /// # Errors
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Options for `collection`; defaults when none are configured.
    pub fn resource(&self, collection: &str) -> ResourceConfig {
        self.resources.get(collection).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn with_resource(mut self, collection: impl Into<String>, config: ResourceConfig) -> Self {
        self.resources.insert(collection.into(), config);
        self
    }

    /// Absolute or relative URL for `path` below the prefix.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url.trim_end_matches('/'),
            self.url_prefix.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
