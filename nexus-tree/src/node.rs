use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{DatasetDescriptor, ExternalTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AttrValue {
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl AttrValue {
    pub fn text(value: impl Into<String>) -> Self {
        AttrValue::Text(vec![value.into()])
    }

    /// First string of a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(values) => values.first().map(|s| s.as_str()),
            _ => None,
        }
    }
}

/// Attributes of a node, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    entries: Vec<(String, AttrValue)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns false and leaves the value alone if `name` is already present.
    pub fn insert_if_absent(&mut self, name: impl Into<String>, value: AttrValue) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.entries.push((name, value));
        true
    }

    pub fn set(&mut self, name: impl Into<String>, value: AttrValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<AttrValue> {
        let pos = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupNode {
    pub nx_class: Option<String>,
    pub children: BTreeMap<String, NodeId>,
    /// Children have been enumerated from the backend in this session.
    pub populated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Lazy,
    Loaded(Vec<u8>),
    /// Supplied by a caller and written when the node is inserted.
    Pending(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataNode {
    pub descriptor: DatasetDescriptor,
    /// Path the dataset was first found at; any hard link to it reads the same.
    pub source_path: Option<String>,
    pub value: DataValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Path inside the same file, written as a hard link.
    Internal(String),
    External(ExternalTarget),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolicNode {
    pub target: LinkTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Group(GroupNode),
    Data(DataNode),
    Symbolic(SymbolicNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub attributes: Attributes,
    /// Set on by-value copies of nodes that live in another file.
    pub origin: Option<ExternalTarget>,
}

impl Node {
    pub fn group(nx_class: Option<String>) -> Self {
        Self {
            kind: NodeKind::Group(GroupNode {
                nx_class,
                ..Default::default()
            }),
            attributes: Attributes::new(),
            origin: None,
        }
    }

    pub fn data(descriptor: DatasetDescriptor, source_path: Option<String>) -> Self {
        Self {
            kind: NodeKind::Data(DataNode {
                descriptor,
                source_path,
                value: DataValue::Lazy,
            }),
            attributes: Attributes::new(),
            origin: None,
        }
    }

    pub fn symbolic(target: LinkTarget) -> Self {
        Self {
            kind: NodeKind::Symbolic(SymbolicNode { target }),
            attributes: Attributes::new(),
            origin: None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group(_))
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, NodeKind::Data(_))
    }

    pub fn is_foreign(&self) -> bool {
        self.origin.is_some()
    }

    pub fn as_group(&self) -> Option<&GroupNode> {
        match &self.kind {
            NodeKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut GroupNode> {
        match &mut self.kind {
            NodeKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&DataNode> {
        match &self.kind {
            NodeKind::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_data_mut(&mut self) -> Option<&mut DataNode> {
        match &mut self.kind {
            NodeKind::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_symbolic(&self) -> Option<&SymbolicNode> {
        match &self.kind {
            NodeKind::Symbolic(s) => Some(s),
            _ => None,
        }
    }

    pub fn nx_class(&self) -> Option<&str> {
        self.as_group().and_then(|g| g.nx_class.as_deref())
    }
}
