//! Engine configuration

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::vars::Variables;

/// Configuration shared by every cluster in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Default namespace for namespaced resources
    pub namespace: String,

    /// Only component names fully matching this pattern are kept
    pub include_filter: String,

    /// Component names fully matching this pattern are dropped
    pub exclude_filter: String,

    /// Add a Namespace component under the root and make everything in
    /// that namespace depend on it
    pub auto_maintain_namespace: bool,

    /// Suffix of the DOT file written in show-dependencies mode
    pub dotfile: String,

    /// Variables fed to `${...}` expansion over the definition text
    pub variables: Variables,

    /// Treat failed API calls during teardown as success
    pub ignore_errors: bool,

    /// Optional run deadline in seconds; when it passes, every unfinished
    /// task is aborted and the run fails
    pub timeout: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            include_filter: ".*".to_string(),
            exclude_filter: "^$".to_string(),
            auto_maintain_namespace: false,
            dotfile: "deps.dot".to_string(),
            variables: Variables::new(),
            ignore_errors: false,
            timeout: None,
        }
    }
}

impl Config {
    /// Compile the include/exclude patterns into a name filter
    pub fn name_filters(&self) -> Result<NameFilters> {
        NameFilters::new(&self.include_filter, &self.exclude_filter)
    }
}

/// Compiled include/exclude component-name filters.
///
/// Patterns match the full name, as with `regex_match` semantics.
#[derive(Debug, Clone)]
pub struct NameFilters {
    include: Regex,
    exclude: Regex,
}

impl NameFilters {
    pub fn new(include: &str, exclude: &str) -> Result<Self> {
        Ok(Self {
            include: Regex::new(&format!("^(?:{include})$"))?,
            exclude: Regex::new(&format!("^(?:{exclude})$"))?,
        })
    }

    /// Whether a component with this name (and its subtree) is kept
    pub fn keeps(&self, name: &str) -> bool {
        self.include.is_match(name) && !self.exclude.is_match(name)
    }
}
