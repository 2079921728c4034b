use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{AttrValue, ExternalTarget, LinkToken, NxResult};

/// Marker for an unbounded dimension in a maximum shape.
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    None,
    Group,
    Dataset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Hard,
    Soft(String),
    External(ExternalTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub kind: LinkKind,
}

impl LinkInfo {
    pub fn hard() -> Self {
        Self {
            kind: LinkKind::Hard,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.kind, LinkKind::External(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    String,
}

impl ElementType {
    pub fn size(&self) -> u64 {
        match self {
            ElementType::Int8 | ElementType::Bool => 1,
            ElementType::Int16 => 2,
            ElementType::Int32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::Float64 => 8,
            // variable length strings are stored as references
            ElementType::String => 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub shape: Vec<u64>,
    /// Entries of zero or below mean unbounded.
    pub max_shape: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_shape: Vec<u64>,
    pub element_type: ElementType,
    #[serde(default)]
    pub unsigned: bool,
}

impl DatasetDescriptor {
    /// Fixed-size dataset: maximum shape equals shape.
    pub fn fixed(shape: Vec<u64>, element_type: ElementType) -> Self {
        let max_shape = shape.iter().map(|v| *v as i64).collect();
        Self {
            shape,
            max_shape,
            chunk_shape: Vec::new(),
            element_type,
            unsigned: false,
        }
    }

    pub fn extensible(shape: Vec<u64>, max_shape: Vec<i64>, element_type: ElementType) -> Self {
        Self {
            shape,
            max_shape,
            chunk_shape: Vec::new(),
            element_type,
            unsigned: false,
        }
    }

    pub fn with_chunks(mut self, chunk_shape: Vec<u64>) -> Self {
        self.chunk_shape = chunk_shape;
        self
    }

    pub fn with_unsigned(mut self, unsigned: bool) -> Self {
        self.unsigned = unsigned;
        self
    }

    pub fn is_extensible(&self) -> bool {
        self.shape.len() != self.max_shape.len()
            || self
                .shape
                .iter()
                .zip(self.max_shape.iter())
                .any(|(s, m)| *m != *s as i64)
    }
}

/// Primitive operations the engine needs from the container store. Paths are
/// plain absolute paths. Soft and hard links are followed by every call except
/// `link_info`; links into other files are never followed, so `object_type`
/// reports `None` and `link_token` reports `External` for them.
pub trait StorageBackend: Send + Sync {
    /// File this backend is bound to, used to anchor relative external links.
    fn file_path(&self) -> &Path;

    fn object_type(&self, path: &str) -> NxResult<ObjectType>;
    /// Kind of the final link of `path`; `None` when no such link exists.
    fn link_info(&self, path: &str) -> NxResult<Option<LinkInfo>>;
    fn link_token(&self, path: &str) -> NxResult<LinkToken>;
    /// Children of a group as `(name, path)` pairs.
    fn list_children(&self, group_path: &str) -> NxResult<Vec<(String, String)>>;

    fn attributes(&self, path: &str) -> NxResult<Vec<(String, AttrValue)>>;
    fn set_attribute(&self, path: &str, name: &str, value: &AttrValue) -> NxResult<()>;

    fn create_group(&self, path: &str, class_hint: Option<&str>) -> NxResult<()>;
    fn create_dataset(&self, path: &str, descriptor: &DatasetDescriptor) -> NxResult<()>;
    fn create_hard_link(&self, src_path: &str, dst_path: &str) -> NxResult<()>;
    fn create_soft_link(&self, target: &str, dst_path: &str) -> NxResult<()>;
    fn create_external_link(
        &self,
        target_file: &str,
        target_path: &str,
        dst_path: &str,
    ) -> NxResult<()>;
    fn remove_link(&self, path: &str) -> NxResult<()>;

    fn read_dataset_descriptor(&self, path: &str) -> NxResult<DatasetDescriptor>;
    fn read_data(&self, path: &str) -> NxResult<Vec<u8>>;
    fn write_data(&self, path: &str, data: &[u8]) -> NxResult<()>;
}

/// Opens backends for other files; used for external links and napimounts.
pub trait BackendFactory: Send + Sync {
    fn open(&self, file: &Path) -> NxResult<Box<dyn StorageBackend>>;
}

/// Resolve `file` against the directory holding `anchor` when it is relative.
pub fn resolve_relative_file(anchor: &Path, file: &str) -> PathBuf {
    let candidate = PathBuf::from(file);
    if candidate.is_absolute() {
        return candidate;
    }
    match anchor.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(candidate),
        _ => candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_extensible() {
        let fixed = DatasetDescriptor::fixed(vec![10, 20], ElementType::Float64);
        assert!(!fixed.is_extensible());
        let ext = DatasetDescriptor::extensible(vec![0, 20], vec![UNLIMITED, 20], ElementType::Int32);
        assert!(ext.is_extensible());
    }

    #[test]
    fn test_descriptor_json_shape() {
        let desc = DatasetDescriptor::fixed(vec![3], ElementType::Int16).with_unsigned(true);
        let json = serde_json::to_string(&desc).unwrap();
        assert!(json.contains("\"element_type\":\"int16\""));
        let back: DatasetDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn test_resolve_relative_file() {
        let anchor = Path::new("/data/scan/main.nxs");
        assert_eq!(
            resolve_relative_file(anchor, "detector.nxs"),
            PathBuf::from("/data/scan/detector.nxs")
        );
        assert_eq!(
            resolve_relative_file(anchor, "/abs/other.nxs"),
            PathBuf::from("/abs/other.nxs")
        );
        assert_eq!(
            resolve_relative_file(Path::new("main.nxs"), "detector.nxs"),
            PathBuf::from("detector.nxs")
        );
    }
}
