use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{NxError, NxResult, DEFAULT_UNBOUNDED_ESTIMATE};

pub const DEFAULT_MAX_LINK_DEPTH: usize = 16;
pub const DEFAULT_CLASS_ATTRIBUTE: &str = "NX_class";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Soft link redirections plus nested file delegations allowed per resolve.
    #[serde(alias = "max_symlink_depth")]
    pub max_link_depth: usize,
    /// Test-open external files while populating and skip the unreachable ones.
    #[serde(alias = "check_external_links")]
    pub verify_external_links: bool,
    pub unbounded_chunk_estimate: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_link_depth: DEFAULT_MAX_LINK_DEPTH,
            verify_external_links: true,
            unbounded_chunk_estimate: DEFAULT_UNBOUNDED_ESTIMATE,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> NxResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NxError::IoError(format!("read {} failed: {}", path.display(), e)))?;
        serde_json::from_str::<Self>(&content)
            .map_err(|e| NxError::InvalidData(format!("parse {} failed: {}", path.display(), e)))
    }
}
