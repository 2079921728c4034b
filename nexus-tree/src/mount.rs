use std::path::{Path, PathBuf};

use crate::{resolve_relative_file, AugmentedPath, NxError, NxResult};

/// Attribute that turns a group into a virtual mount of another file.
pub const NAPIMOUNT_ATTRIBUTE: &str = "napimount";
pub const NXFILE_SCHEME: &str = "nxfile://";

/// A location inside another container file, written as
/// `nxfile://<file>#<internal-path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalTarget {
    pub file: String,
    pub path: String,
}

impl ExternalTarget {
    pub fn new(file: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            path: path.into(),
        }
    }

    pub fn parse(uri: &str) -> NxResult<Self> {
        let rest = uri.trim().strip_prefix(NXFILE_SCHEME).unwrap_or(uri.trim());
        let (file, fragment) = match rest.split_once('#') {
            Some((file, fragment)) => (file, fragment),
            None => (rest, ""),
        };
        if file.is_empty() {
            return Err(NxError::InvalidParam(format!(
                "external link has no file: {}",
                uri
            )));
        }

        let path = if fragment.is_empty() {
            "/".to_string()
        } else {
            AugmentedPath::parse(fragment)?.plain()
        };

        Ok(Self {
            file: file.to_string(),
            path,
        })
    }

    pub fn to_uri(&self) -> String {
        format!("{}{}#{}", NXFILE_SCHEME, self.file, self.path)
    }

    pub fn resolve_file(&self, anchor: &Path) -> PathBuf {
        resolve_relative_file(anchor, &self.file)
    }
}

impl std::fmt::Display for ExternalTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}
