use std::collections::HashMap;

use crate::{
    DataValue, DatasetDescriptor, ExternalTarget, LinkTarget, Node, NodeId, NodeKind, NxError,
    NxResult,
};

/// Arena of nodes rooted at a group. A node reachable under several names is
/// the same `NodeId`, which is how hard links show up in memory.
#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::group(None)],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub(crate) fn node(&self, id: NodeId) -> NxResult<&Node> {
        self.get(id)
            .ok_or_else(|| NxError::InvalidParam(format!("unknown node {}", id)))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> NxResult<&mut Node> {
        self.get_mut(id)
            .ok_or_else(|| NxError::InvalidParam(format!("unknown node {}", id)))
    }

    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn add_group(&mut self, nx_class: Option<&str>) -> NodeId {
        self.add(Node::group(nx_class.map(|c| c.to_string())))
    }

    pub fn add_data(&mut self, descriptor: DatasetDescriptor) -> NodeId {
        self.add(Node::data(descriptor, None))
    }

    /// Data node whose value is written when the tree is inserted into a file.
    pub fn add_data_with_value(&mut self, descriptor: DatasetDescriptor, value: Vec<u8>) -> NodeId {
        let mut node = Node::data(descriptor, None);
        if let Some(data) = node.as_data_mut() {
            data.value = DataValue::Pending(value);
        }
        self.add(node)
    }

    pub fn add_symbolic(&mut self, target: LinkTarget) -> NodeId {
        self.add(Node::symbolic(target))
    }

    /// Link `child` under `parent` by `name`, replacing any previous child of
    /// that name.
    pub fn attach(&mut self, parent: NodeId, name: &str, child: NodeId) -> NxResult<()> {
        self.node(child)?;
        let group = self
            .node_mut(parent)?
            .as_group_mut()
            .ok_or_else(|| NxError::TypeMismatch(format!("node {} is not a group", parent)))?;
        group.children.insert(name.to_string(), child);
        Ok(())
    }

    pub fn detach(&mut self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.get_mut(parent)?.as_group_mut()?.children.remove(name)
    }

    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.get(parent)?.as_group()?.children.get(name).copied()
    }

    pub fn children(&self, id: NodeId) -> Vec<(String, NodeId)> {
        match self.get(id).and_then(|n| n.as_group()) {
            Some(group) => group
                .children
                .iter()
                .map(|(name, child)| (name.clone(), *child))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Walk plain child names from `from`, without any backend access.
    pub fn lookup(&self, from: NodeId, names: &[&str]) -> Option<NodeId> {
        let mut current = from;
        for name in names {
            current = self.child(current, name)?;
        }
        Some(current)
    }

    /// Set the class of a group once it becomes known. Returns false for
    /// non-group nodes.
    pub fn retag(&mut self, id: NodeId, nx_class: &str) -> bool {
        match self.get_mut(id).and_then(|n| n.as_group_mut()) {
            Some(group) => {
                group.nx_class = Some(nx_class.to_string());
                true
            }
            None => false,
        }
    }

    /// Deep copy `from_id` of another tree into this one. Sharing inside the
    /// copied subtree is preserved; nothing is shared with `from`.
    pub fn copy_subtree(
        &mut self,
        from: &NodeTree,
        from_id: NodeId,
        origin: Option<&ExternalTarget>,
    ) -> NxResult<NodeId> {
        let mut copied = HashMap::new();
        self.copy_node(from, from_id, origin, &mut copied)
    }

    fn copy_node(
        &mut self,
        from: &NodeTree,
        from_id: NodeId,
        origin: Option<&ExternalTarget>,
        copied: &mut HashMap<NodeId, NodeId>,
    ) -> NxResult<NodeId> {
        if let Some(id) = copied.get(&from_id) {
            return Ok(*id);
        }

        let source = from.node(from_id)?;
        let mut node = source.clone();
        if let NodeKind::Group(group) = &mut node.kind {
            group.children.clear();
        }
        // nodes already copied from a third file keep their own origin
        if node.origin.is_none() {
            node.origin = origin.cloned();
        }
        let id = self.add(node);
        copied.insert(from_id, id);

        for (name, child) in from.children(from_id) {
            let new_child = self.copy_node(from, child, origin, copied)?;
            self.attach(id, &name, new_child)?;
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttrValue, ElementType};

    #[test]
    fn test_attach_and_lookup() {
        let mut tree = NodeTree::new();
        let entry = tree.add_group(Some("NXentry"));
        let data = tree.add_data(DatasetDescriptor::fixed(vec![4], ElementType::Int32));
        tree.attach(tree.root(), "entry", entry).unwrap();
        tree.attach(entry, "counts", data).unwrap();

        assert_eq!(tree.lookup(tree.root(), &["entry", "counts"]), Some(data));
        assert_eq!(tree.lookup(tree.root(), &["entry", "missing"]), None);
        assert_eq!(tree.get(entry).unwrap().nx_class(), Some("NXentry"));
    }

    #[test]
    fn test_attach_under_data_fails() {
        let mut tree = NodeTree::new();
        let data = tree.add_data(DatasetDescriptor::fixed(vec![1], ElementType::Int8));
        let other = tree.add_group(None);
        assert!(matches!(
            tree.attach(data, "x", other),
            Err(NxError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_retag_group_only() {
        let mut tree = NodeTree::new();
        let g = tree.add_group(None);
        let d = tree.add_data(DatasetDescriptor::fixed(vec![1], ElementType::Int8));
        assert!(tree.retag(g, "NXdata"));
        assert!(!tree.retag(d, "NXdata"));
        assert_eq!(tree.get(g).unwrap().nx_class(), Some("NXdata"));
    }

    #[test]
    fn test_copy_subtree_preserves_sharing_not_identity() {
        let mut src = NodeTree::new();
        let entry = src.add_group(Some("NXentry"));
        let shared = src.add_data(DatasetDescriptor::fixed(vec![2], ElementType::Float32));
        src.attach(src.root(), "entry", entry).unwrap();
        src.attach(entry, "a", shared).unwrap();
        src.attach(entry, "b", shared).unwrap();
        src.get_mut(entry)
            .unwrap()
            .attributes
            .set("title", AttrValue::text("scan"));

        let mut dst = NodeTree::new();
        let origin = ExternalTarget::new("other.nxs", "/entry");
        let copy = dst.copy_subtree(&src, entry, Some(&origin)).unwrap();

        let a = dst.child(copy, "a").unwrap();
        let b = dst.child(copy, "b").unwrap();
        assert_eq!(a, b);
        assert_eq!(dst.get(a).unwrap().origin.as_ref(), Some(&origin));

        dst.get_mut(copy)
            .unwrap()
            .attributes
            .set("title", AttrValue::text("changed"));
        assert_eq!(
            src.get(entry).unwrap().attributes.get("title"),
            Some(&AttrValue::text("scan"))
        );
    }

    #[test]
    fn test_copy_subtree_with_cycle_terminates() {
        let mut src = NodeTree::new();
        let g = src.add_group(None);
        src.attach(src.root(), "g", g).unwrap();
        src.attach(g, "back", src.root()).unwrap();

        let mut dst = NodeTree::new();
        let copy = dst.copy_subtree(&src, src.root(), None).unwrap();
        let g_copy = dst.child(copy, "g").unwrap();
        assert_eq!(dst.child(g_copy, "back"), Some(copy));
    }
}
