use serde::{Deserialize, Serialize};

use crate::error::{RepoError, RepoResult};

/// Behavioral settings for a [`Repository`](crate::Repository).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Nickname of the branch created by `init_workspace`.
    pub default_branch: String,
    /// Fetch from the attached element store when an object is not cached
    /// locally. When `false`, a miss is reported as `ObjectNotResident`.
    pub fetch_on_miss: bool,
    /// Resolve leaf objects eagerly on checkout instead of on first access.
    pub load_leaves_on_checkout: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_branch: "master".into(),
            fetch_on_miss: false,
            load_leaves_on_checkout: false,
        }
    }
}

impl RepositoryConfig {
    /// Parse from TOML. Missing keys take their default values.
    pub fn from_toml_str(s: &str) -> RepoResult<Self> {
        toml::from_str(s).map_err(|e| RepoError::Config(e.to_string()))
    }

    /// Configuration for a repository backed by a shared element store.
    pub fn fetching() -> Self {
        Self {
            fetch_on_miss: true,
            ..Default::default()
        }
    }
}
