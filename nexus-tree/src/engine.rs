use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{
    chunk_is_plausible, estimate_chunking_with, join_path, normalize_link_target, plain_path,
    split_parent_name, AttrValue, AugmentedPath, BackendFactory, DataValue, DatasetDescriptor,
    EngineConfig, ExternalTarget, IdentityCache, InsertionMap, LinkKind, LinkTarget, LinkToken,
    Node, NodeId, NodeKind, NodeTree, NxError, NxResult, ObjectType, PathSegment, StorageBackend,
    DEFAULT_CLASS_ATTRIBUTE, NAPIMOUNT_ATTRIBUTE,
};

enum Step {
    Descend(NodeId),
    Done(NodeId),
    Redirect(Vec<PathSegment>),
}

/// What the walk needs to know about a node, copied out of the tree so the
/// session can be mutated while acting on it.
enum Visit {
    Data,
    SoftLink(String),
    ExternalLink(ExternalTarget),
    Group {
        nx_class: Option<String>,
        // mount descriptor and the file it is relative to
        mount: Option<(String, PathBuf)>,
    },
}

/// One open container file: the lazily built node tree, the identity cache
/// and the backend it was read from. A session is used from one thread at a
/// time; wrap it in a `Mutex` to share it.
pub struct NexusFile {
    backend: Box<dyn StorageBackend>,
    factory: Arc<dyn BackendFactory>,
    config: EngineConfig,
    tree: NodeTree,
    cache: IdentityCache,
    // copies attached at a mount point, not mounted again
    mounted: HashSet<NodeId>,
    // link redirections already spent by the sessions that opened this one
    depth: usize,
}

impl NexusFile {
    pub fn open(
        file: impl AsRef<Path>,
        factory: Arc<dyn BackendFactory>,
        config: EngineConfig,
    ) -> NxResult<Self> {
        let backend = factory.open(file.as_ref())?;
        let session = Self::start(backend, factory, config, 0)?;
        info!("open nexus file {}", session.file_path().display());
        Ok(session)
    }

    pub fn open_with_backend(
        backend: Box<dyn StorageBackend>,
        factory: Arc<dyn BackendFactory>,
        config: EngineConfig,
    ) -> NxResult<Self> {
        let session = Self::start(backend, factory, config, 0)?;
        info!("open nexus file {}", session.file_path().display());
        Ok(session)
    }

    fn start(
        backend: Box<dyn StorageBackend>,
        factory: Arc<dyn BackendFactory>,
        config: EngineConfig,
        depth: usize,
    ) -> NxResult<Self> {
        let mut session = Self {
            backend,
            factory,
            config,
            tree: NodeTree::new(),
            cache: IdentityCache::new(),
            mounted: HashSet::new(),
            depth,
        };
        let root = session.tree.root();
        session.cache.insert(LinkToken::Root, root);
        session.load_attributes(root, "/")?;
        Ok(session)
    }

    /// Release the backend. The tree and every node handed out go with it.
    pub fn close(self) {
        info!(
            "close nexus file {}, {} nodes, {} cached",
            self.file_path().display(),
            self.tree.len(),
            self.cache.len()
        );
    }

    pub fn file_path(&self) -> &Path {
        self.backend.file_path()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn identity_cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn node(&self, id: NodeId) -> NxResult<&Node> {
        self.tree.node(id)
    }

    /// In-memory access only; nothing is written back to the file.
    pub fn node_mut(&mut self, id: NodeId) -> NxResult<&mut Node> {
        self.tree.node_mut(id)
    }

    pub fn get_node(&mut self, path: &str) -> NxResult<NodeId> {
        self.resolve(path, false)
    }

    pub fn get_group(&mut self, path: &str, create_if_missing: bool) -> NxResult<NodeId> {
        let id = self.resolve(path, create_if_missing)?;
        if !self.tree.node(id)?.is_group() {
            return Err(NxError::TypeMismatch(AugmentedPath::parse(path)?.plain()));
        }
        Ok(id)
    }

    pub fn get_data(&mut self, path: &str) -> NxResult<NodeId> {
        let id = self.resolve(path, false)?;
        if !self.tree.node(id)?.is_data() {
            return Err(NxError::TypeMismatch(AugmentedPath::parse(path)?.plain()));
        }
        Ok(id)
    }

    /// Walk `path` from the root, loading what is not in memory yet. With
    /// `create_if_missing`, absent segments become groups tagged with their
    /// class hint.
    pub fn resolve(&mut self, path: &str, create_if_missing: bool) -> NxResult<NodeId> {
        let parsed = AugmentedPath::parse(path)?;
        self.resolve_segments(parsed.segments, create_if_missing)
    }

    fn resolve_segments(
        &mut self,
        mut segments: Vec<PathSegment>,
        create: bool,
    ) -> NxResult<NodeId> {
        let mut depth = self.depth;
        'walk: loop {
            let mut parent = self.tree.root();
            for i in 0..segments.len() {
                self.ensure_populated(parent, &plain_path(&segments[..i]))?;
                let step = match self.tree.child(parent, &segments[i].name) {
                    Some(child) => self.visit(parent, child, &segments, i, create, &mut depth)?,
                    None => self.lookup_backend(parent, &segments, i, create, &mut depth)?,
                };
                match step {
                    Step::Descend(id) => parent = id,
                    Step::Done(id) => return Ok(id),
                    Step::Redirect(next) => {
                        segments = next;
                        continue 'walk;
                    }
                }
            }
            return Ok(parent);
        }
    }

    fn visit(
        &mut self,
        parent: NodeId,
        id: NodeId,
        segments: &[PathSegment],
        i: usize,
        create: bool,
        depth: &mut usize,
    ) -> NxResult<Step> {
        let seg = &segments[i];
        let is_last = i + 1 == segments.len();
        let path = plain_path(&segments[..=i]);

        let node = self.tree.node(id)?;
        let visit = match &node.kind {
            NodeKind::Data(_) => Visit::Data,
            NodeKind::Symbolic(sym) => match &sym.target {
                LinkTarget::Internal(target) => Visit::SoftLink(target.clone()),
                LinkTarget::External(target) => Visit::ExternalLink(target.clone()),
            },
            NodeKind::Group(group) => Visit::Group {
                nx_class: group.nx_class.clone(),
                mount: if self.mounted.contains(&id) {
                    None
                } else {
                    node.attributes
                        .get(NAPIMOUNT_ATTRIBUTE)
                        .and_then(|v| v.as_text())
                        .map(|descriptor| {
                            let anchor = match &node.origin {
                                Some(origin) => PathBuf::from(&origin.file),
                                None => self.backend.file_path().to_path_buf(),
                            };
                            (descriptor.to_string(), anchor)
                        })
                },
            },
        };

        match visit {
            Visit::Data => {
                if is_last {
                    Ok(Step::Done(id))
                } else {
                    Err(NxError::DatasetNotLeaf(path))
                }
            }
            Visit::SoftLink(target) => self.redirect(segments, i, &target, depth),
            Visit::ExternalLink(target) => {
                let mounted = self.mount_external(parent, &seg.name, &target, &path, depth)?;
                self.visit(parent, mounted, segments, i, create, depth)
            }
            Visit::Group { nx_class, mount } => {
                if let Some(hint) = &seg.class_hint {
                    match &nx_class {
                        Some(class) if class != hint => {
                            warn!("class hint {} does not match {} at {}", hint, class, path);
                            return Err(NxError::TypeMismatch(path));
                        }
                        Some(_) => {}
                        None => {
                            self.tree.retag(id, hint);
                        }
                    }
                }

                if let Some((descriptor, anchor)) = mount {
                    let mounted =
                        self.mount_napi(parent, &seg.name, &descriptor, &anchor, &path, depth)?;
                    return match mounted {
                        Some(mounted) => self.visit(parent, mounted, segments, i, create, depth),
                        // the local group stands in for an unreachable mount
                        None if is_last => Ok(Step::Done(id)),
                        None => Err(NxError::MountUnreachable(path)),
                    };
                }

                if is_last {
                    Ok(Step::Done(id))
                } else {
                    Ok(Step::Descend(id))
                }
            }
        }
    }

    fn lookup_backend(
        &mut self,
        parent: NodeId,
        segments: &[PathSegment],
        i: usize,
        create: bool,
        depth: &mut usize,
    ) -> NxResult<Step> {
        let seg = &segments[i];
        let is_last = i + 1 == segments.len();
        let path = plain_path(&segments[..=i]);

        // foreign copies are complete, the local file knows nothing below them
        if self.tree.node(parent)?.is_foreign() {
            return Err(if create {
                NxError::Unsupported(format!("create below foreign node: {}", path))
            } else {
                NxError::NotFound(path)
            });
        }

        let Some(info) = self.backend.link_info(&path)? else {
            if !create {
                return Err(NxError::NotFound(path));
            }
            debug!("create missing group {}", path);
            self.backend.create_group(&path, seg.class_hint.as_deref())?;
            let id = self.group_node_for(parent, &seg.name, &path)?;
            if let Some(group) = self.tree.node_mut(id)?.as_group_mut() {
                group.populated = true;
            }
            return self.visit(parent, id, segments, i, create, depth);
        };

        match info.kind {
            LinkKind::Soft(target) => {
                if create && self.backend.object_type(&path)? == ObjectType::None {
                    return Err(NxError::NotFound(path));
                }
                self.redirect(segments, i, &target, depth)
            }
            LinkKind::External(target) => {
                let mounted = self.mount_external(parent, &seg.name, &target, &path, depth)?;
                self.visit(parent, mounted, segments, i, create, depth)
            }
            LinkKind::Hard => match self.backend.object_type(&path)? {
                ObjectType::Dataset => {
                    if !is_last {
                        return Err(NxError::DatasetNotLeaf(path));
                    }
                    let id = self.data_node_for(parent, &seg.name, &path)?;
                    Ok(Step::Done(id))
                }
                ObjectType::Group => {
                    let id = self.group_node_for(parent, &seg.name, &path)?;
                    self.visit(parent, id, segments, i, create, depth)
                }
                ObjectType::None => Err(NxError::NotFound(path)),
            },
        }
    }

    fn redirect(
        &self,
        segments: &[PathSegment],
        i: usize,
        target: &str,
        depth: &mut usize,
    ) -> NxResult<Step> {
        let path = plain_path(&segments[..=i]);
        *depth += 1;
        if *depth > self.config.max_link_depth {
            warn!("soft link {} exceeds depth {}", path, self.config.max_link_depth);
            return Err(NxError::LinkCycle(path));
        }
        let next = normalize_link_target(&segments[..i], target, &segments[i + 1..])?;
        debug!("follow soft link {} -> {}", path, target);
        Ok(Step::Redirect(next))
    }

    /// Node for the group at `path`, shared with any other name of the same
    /// object that was loaded before.
    fn group_node_for(&mut self, parent: NodeId, name: &str, path: &str) -> NxResult<NodeId> {
        let token = self.backend.link_token(path)?;
        if let Some(id) = self.cache.get(&token) {
            debug!("identity cache hit {} for {}", token, path);
            self.tree.attach(parent, name, id)?;
            return Ok(id);
        }

        let id = self.tree.add_group(None);
        self.load_attributes(id, path)?;
        self.tree.attach(parent, name, id)?;
        self.cache.insert(token, id);
        Ok(id)
    }

    fn data_node_for(&mut self, parent: NodeId, name: &str, path: &str) -> NxResult<NodeId> {
        let token = self.backend.link_token(path)?;
        if let Some(id) = self.cache.get(&token) {
            debug!("identity cache hit {} for {}", token, path);
            self.tree.attach(parent, name, id)?;
            return Ok(id);
        }

        let descriptor = self.backend.read_dataset_descriptor(path)?;
        let id = self.tree.add(Node::data(descriptor, Some(path.to_string())));
        self.load_attributes(id, path)?;
        self.tree.attach(parent, name, id)?;
        self.cache.insert(token, id);
        Ok(id)
    }

    fn load_attributes(&mut self, id: NodeId, path: &str) -> NxResult<()> {
        let attributes = self.backend.attributes(path)?;
        let node = self.tree.node_mut(id)?;
        let mut class = None;
        for (name, value) in attributes {
            if name == DEFAULT_CLASS_ATTRIBUTE {
                class = value.as_text().map(|s| s.to_string());
            }
            node.attributes.insert_if_absent(name, value);
        }
        if let Some(class) = class {
            if node.as_group().map_or(false, |g| g.nx_class.is_none()) {
                self.tree.retag(id, &class);
            }
        }
        Ok(())
    }

    fn ensure_populated(&mut self, id: NodeId, path: &str) -> NxResult<()> {
        let node = self.tree.node(id)?;
        let needed = match node.as_group() {
            Some(group) => !group.populated && !node.is_foreign(),
            None => false,
        };
        if needed {
            self.populate(id, path)?;
        }
        Ok(())
    }

    fn populate(&mut self, id: NodeId, path: &str) -> NxResult<()> {
        let children = self.backend.list_children(path)?;
        debug!("populate {} with {} links", path, children.len());

        for (name, child_path) in children {
            if self.tree.child(id, &name).is_some() {
                continue;
            }
            let Some(info) = self.backend.link_info(&child_path)? else {
                continue;
            };

            if let LinkKind::External(target) = info.kind {
                let file = target.resolve_file(self.backend.file_path());
                if self.config.verify_external_links && self.factory.open(&file).is_err() {
                    warn!(
                        "skip external link {} -> {}, file not reachable",
                        child_path, target
                    );
                    continue;
                }
                let resolved = ExternalTarget::new(file.display().to_string(), target.path);
                let placeholder = self.tree.add_symbolic(LinkTarget::External(resolved));
                self.tree.attach(id, &name, placeholder)?;
                continue;
            }

            match self.backend.object_type(&child_path)? {
                ObjectType::Group => {
                    self.group_node_for(id, &name, &child_path)?;
                }
                ObjectType::Dataset => {
                    self.data_node_for(id, &name, &child_path)?;
                }
                ObjectType::None => debug!("skip dangling link {}", child_path),
            }
        }

        if let Some(group) = self.tree.node_mut(id)?.as_group_mut() {
            group.populated = true;
        }
        Ok(())
    }

    /// Load the children of the group at `path`. Calling it again is a no-op
    /// until the group is invalidated.
    pub fn populate_group(&mut self, path: &str) -> NxResult<NodeId> {
        let id = self.get_group(path, false)?;
        self.ensure_populated(id, &AugmentedPath::parse(path)?.plain())?;
        Ok(id)
    }

    /// Let the next walk through the group at `path` list it again. Children
    /// already in memory are kept.
    pub fn invalidate_group(&mut self, path: &str) -> NxResult<()> {
        let id = self.get_group(path, false)?;
        if let Some(group) = self.tree.node_mut(id)?.as_group_mut() {
            group.populated = false;
        }
        Ok(())
    }

    pub fn list_children(&mut self, path: &str) -> NxResult<Vec<String>> {
        let id = self.populate_group(path)?;
        Ok(self.tree.children(id).into_iter().map(|(name, _)| name).collect())
    }

    fn open_nested(&self, file: &Path, depth: usize) -> NxResult<NexusFile> {
        let backend = self.factory.open(file)?;
        debug!("open nested session {} at depth {}", file.display(), depth);
        Self::start(backend, self.factory.clone(), self.config.clone(), depth)
    }

    /// Resolve `target` in its own session and copy it, fully loaded, into this
    /// tree. The nested session is closed before returning.
    fn copy_from_nested(
        &mut self,
        mut nested: NexusFile,
        target: &ExternalTarget,
    ) -> NxResult<NodeId> {
        let loaded = nested
            .resolve(&target.path, false)
            .and_then(|id| nested.materialize(id, &target.path).map(|_| id));
        let id = match loaded {
            Ok(id) => id,
            Err(e) => {
                nested.close();
                return Err(e);
            }
        };
        let copy = self.tree.copy_subtree(nested.tree(), id, Some(target))?;
        nested.close();
        Ok(copy)
    }

    fn materialize(&mut self, id: NodeId, path: &str) -> NxResult<()> {
        let mut seen = HashSet::new();
        let mut pending = vec![(id, path.to_string())];
        while let Some((id, path)) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            self.ensure_populated(id, &path)?;
            for (name, child) in self.tree.children(id) {
                if self.tree.node(child)?.is_group() {
                    pending.push((child, join_path(&path, &name)));
                }
            }
        }
        Ok(())
    }

    /// Replace the external link at `parent/name` with a copy of its target.
    /// The copy is never entered into the identity cache.
    fn mount_external(
        &mut self,
        parent: NodeId,
        name: &str,
        target: &ExternalTarget,
        path: &str,
        depth: &mut usize,
    ) -> NxResult<NodeId> {
        *depth += 1;
        if *depth > self.config.max_link_depth {
            return Err(NxError::LinkCycle(path.to_string()));
        }

        let file = target.resolve_file(self.backend.file_path());
        let resolved = ExternalTarget::new(file.display().to_string(), target.path.clone());
        let copy = self
            .open_nested(&file, *depth)
            .and_then(|nested| self.copy_from_nested(nested, &resolved))
            .map_err(|e| match e {
                NxError::NotFound(_) | NxError::BackendFailure { .. } | NxError::IoError(_) => {
                    warn!("external link {} -> {} unreachable: {}", path, resolved, e);
                    NxError::MountUnreachable(path.to_string())
                }
                other => other,
            })?;

        self.tree.attach(parent, name, copy)?;
        debug!("external link {} -> {} loaded as {}", path, resolved, copy);
        Ok(copy)
    }

    /// Swap the group at `parent/name` for a copy of what its mount
    /// descriptor points to. A relative target file is looked up next to
    /// `anchor`, the file the group was read from. `None` when the target
    /// cannot be reached, in which case the local group stays in place.
    fn mount_napi(
        &mut self,
        parent: NodeId,
        name: &str,
        descriptor: &str,
        anchor: &Path,
        path: &str,
        depth: &mut usize,
    ) -> NxResult<Option<NodeId>> {
        let target = ExternalTarget::parse(descriptor)
            .map_err(|_| NxError::InvalidData(format!("bad mount at {}: {}", path, descriptor)))?;
        *depth += 1;
        if *depth > self.config.max_link_depth {
            return Err(NxError::LinkCycle(path.to_string()));
        }

        let file = target.resolve_file(anchor);
        let resolved = ExternalTarget::new(file.display().to_string(), target.path);
        let copy = match self
            .open_nested(&file, *depth)
            .and_then(|nested| self.copy_from_nested(nested, &resolved))
        {
            Ok(copy) => copy,
            Err(e @ NxError::LinkCycle(_)) => return Err(e),
            Err(e) => {
                warn!("mount {} -> {} unreachable: {}", path, resolved, e);
                return Ok(None);
            }
        };

        if let Some(local) = self.tree.detach(parent, name) {
            self.cache.evict_node(local);
        }
        self.tree.attach(parent, name, copy)?;
        self.mounted.insert(copy);
        info!("mount {} -> {}", path, resolved);
        Ok(Some(copy))
    }

    /// Parent group for a new link at `path`, created when missing. Fails
    /// when the name is taken or the parent was copied from another file.
    fn parent_for_new(&mut self, path: &str) -> NxResult<(NodeId, String, String)> {
        let parsed = AugmentedPath::parse(path)?;
        let plain = parsed.plain();
        let Some(last) = parsed.last() else {
            return Err(NxError::InvalidParam(format!("root cannot be created: {}", path)));
        };
        let name = last.name.clone();
        let parent_segments = parsed.segments[..parsed.segments.len() - 1].to_vec();
        let parent_plain = plain_path(&parent_segments);
        let parent = self.resolve_segments(parent_segments, true)?;
        let node = self.tree.node(parent)?;
        if !node.is_group() {
            return Err(NxError::TypeMismatch(parent_plain));
        }
        if node.is_foreign() {
            return Err(NxError::Unsupported(format!(
                "create below foreign node: {}",
                plain
            )));
        }
        if self.tree.child(parent, &name).is_some() || self.backend.link_info(&plain)?.is_some() {
            return Err(NxError::AlreadyExists(plain));
        }
        Ok((parent, name, plain))
    }

    /// Create an empty dataset, guessing a chunk shape when an extensible
    /// descriptor comes without a usable one. Missing parents are created.
    pub fn create_data(&mut self, path: &str, descriptor: &DatasetDescriptor) -> NxResult<NodeId> {
        let (parent, name, plain) = self.parent_for_new(path)?;
        let mut descriptor = descriptor.clone();
        if descriptor.is_extensible() && !chunk_is_plausible(&descriptor.chunk_shape, &descriptor.shape)
        {
            descriptor.chunk_shape = estimate_chunking_with(
                &descriptor.shape,
                &descriptor.max_shape,
                descriptor.element_type.size(),
                self.config.unbounded_chunk_estimate,
            );
            debug!("chunk shape {:?} guessed for {}", descriptor.chunk_shape, plain);
        }

        self.backend.create_dataset(&plain, &descriptor)?;
        self.data_node_for(parent, &name, &plain)
    }

    /// Hard link `destination` to the object at `source`. Both names then
    /// resolve to the same node.
    pub fn link(&mut self, source: &str, destination: &str) -> NxResult<NodeId> {
        let id = self.get_node(source)?;
        let src = AugmentedPath::parse(source)?.plain();
        if self.tree.node(id)?.is_foreign() {
            return Err(NxError::Unsupported(format!(
                "hard link to foreign node: {}",
                src
            )));
        }
        let (parent, name, dst) = self.parent_for_new(destination)?;
        self.backend.create_hard_link(&src, &dst)?;
        self.tree.attach(parent, &name, id)?;
        debug!("hard link {} -> {}", dst, src);
        Ok(id)
    }

    /// Soft link `destination` to `target`. The link is followed on the next
    /// walk through it.
    pub fn link_soft(&mut self, target: &str, destination: &str) -> NxResult<()> {
        let (_, _, dst) = self.parent_for_new(destination)?;
        self.backend.create_soft_link(target, &dst)?;
        debug!("soft link {} -> {}", dst, target);
        Ok(())
    }

    /// Link `destination` to a location in another file, given as
    /// `nxfile://<file>#<path>`.
    pub fn link_external(&mut self, uri: &str, destination: &str) -> NxResult<NodeId> {
        let target = ExternalTarget::parse(uri)?;
        let (parent, name, dst) = self.parent_for_new(destination)?;
        self.backend
            .create_external_link(&target.file, &target.path, &dst)?;
        let file = target.resolve_file(self.backend.file_path());
        let resolved = ExternalTarget::new(file.display().to_string(), target.path);
        let placeholder = self.tree.add_symbolic(LinkTarget::External(resolved));
        self.tree.attach(parent, &name, placeholder)?;
        debug!("external link {} -> {}", dst, target.file);
        Ok(placeholder)
    }

    /// Unlink `path` and drop the name from memory. Removing a hard link also
    /// evicts the object from the identity cache; other hard links to it stay
    /// in the file and load a fresh node on the next walk. Removing a soft or
    /// external link leaves its target alone.
    pub fn remove_node(&mut self, path: &str) -> NxResult<()> {
        let plain = AugmentedPath::parse(path)?.plain();
        let (parent_path, name) = split_parent_name(&plain)
            .ok_or_else(|| NxError::InvalidParam("root cannot be removed".to_string()))?;
        let parent = self.get_group(&parent_path, false)?;
        if self.tree.node(parent)?.is_foreign() {
            return Err(NxError::Unsupported(format!(
                "remove below foreign node: {}",
                plain
            )));
        }

        let hard = matches!(
            self.backend.link_info(&plain)?.map(|info| info.kind),
            Some(LinkKind::Hard)
        );
        self.backend.remove_link(&plain)?;
        match self.tree.detach(parent, &name) {
            Some(id) if hard => {
                let evicted = self.cache.evict_node(id);
                debug!("removed {}, {} cache entries evicted", plain, evicted);
            }
            Some(_) => debug!("removed link {}, target kept", plain),
            None => {}
        }
        Ok(())
    }

    /// Write an attribute to the file and to the node. Setting the class
    /// attribute of a group retags it.
    pub fn set_attribute(&mut self, path: &str, name: &str, value: AttrValue) -> NxResult<()> {
        let id = self.get_node(path)?;
        let plain = AugmentedPath::parse(path)?.plain();
        if self.tree.node(id)?.is_foreign() {
            return Err(NxError::Unsupported(format!(
                "write attribute on foreign node: {}",
                plain
            )));
        }

        self.backend.set_attribute(&plain, name, &value)?;
        let class = if name == DEFAULT_CLASS_ATTRIBUTE {
            value.as_text().map(|s| s.to_string())
        } else {
            None
        };
        self.tree.node_mut(id)?.attributes.set(name, value);
        if let Some(class) = class {
            self.tree.retag(id, &class);
        }
        Ok(())
    }

    pub fn read_data(&mut self, path: &str) -> NxResult<Vec<u8>> {
        let id = self.get_data(path)?;
        let node = self.tree.node(id)?;
        let Some(data) = node.as_data() else {
            return Err(NxError::TypeMismatch(path.to_string()));
        };
        if let DataValue::Loaded(bytes) | DataValue::Pending(bytes) = &data.value {
            return Ok(bytes.clone());
        }

        let source = match &data.source_path {
            Some(source) => source.clone(),
            None => AugmentedPath::parse(path)?.plain(),
        };
        let bytes = match &node.origin {
            Some(origin) => {
                let foreign = self.factory.open(Path::new(&origin.file))?;
                foreign.read_data(&source)?
            }
            None => self.backend.read_data(&source)?,
        };

        if let Some(data) = self.tree.node_mut(id)?.as_data_mut() {
            data.value = DataValue::Loaded(bytes.clone());
        }
        Ok(bytes)
    }

    pub fn write_data(&mut self, path: &str, bytes: &[u8]) -> NxResult<()> {
        let id = self.get_data(path)?;
        let node = self.tree.node(id)?;
        let plain = AugmentedPath::parse(path)?.plain();
        if node.is_foreign() {
            return Err(NxError::Unsupported(format!(
                "write data on foreign node: {}",
                plain
            )));
        }
        let target = node
            .as_data()
            .and_then(|d| d.source_path.clone())
            .unwrap_or(plain);

        self.backend.write_data(&target, bytes)?;
        if let Some(data) = self.tree.node_mut(id)?.as_data_mut() {
            data.value = DataValue::Loaded(bytes.to_vec());
        }
        Ok(())
    }

    /// Write `source_id` of a caller built tree at `path`. A node reached
    /// twice is written once and hard linked afterwards; internal symbolic
    /// nodes become hard links once everything else exists. Existing objects
    /// are kept and only gain the attributes they lack.
    pub fn add_node(&mut self, path: &str, source: &NodeTree, source_id: NodeId) -> NxResult<NodeId> {
        let dest = AugmentedPath::parse(path)?.plain();
        let mut inserted = InsertionMap::new();
        let mut deferred = Vec::new();
        self.insert_node(&dest, source, source_id, &mut inserted, &mut deferred)?;

        for (target, link_path) in deferred {
            if self.exists(&link_path)? {
                debug!("deferred link {} already present", link_path);
                continue;
            }
            self.link(&target, &link_path)?;
        }
        info!("inserted {} nodes at {}", inserted.len(), dest);
        self.get_node(&dest)
    }

    fn insert_node(
        &mut self,
        dest: &str,
        source: &NodeTree,
        source_id: NodeId,
        inserted: &mut InsertionMap,
        deferred: &mut Vec<(String, String)>,
    ) -> NxResult<()> {
        if let Some(first) = inserted.first_path(source_id) {
            let first = first.to_string();
            if first != dest && !self.exists(dest)? {
                self.link(&first, dest)?;
            }
            return Ok(());
        }

        let node = source.node(source_id)?;
        match &node.kind {
            NodeKind::Symbolic(sym) => match &sym.target {
                LinkTarget::Internal(target) => {
                    deferred.push((target.clone(), dest.to_string()));
                }
                LinkTarget::External(target) => {
                    if !self.exists(dest)? {
                        self.link_external(&target.to_uri(), dest)?;
                    }
                }
            },
            NodeKind::Group(group) => {
                let id = match self.find(dest)? {
                    Some(id) => {
                        if !self.tree.node(id)?.is_group() {
                            return Err(NxError::TypeMismatch(dest.to_string()));
                        }
                        id
                    }
                    None => {
                        let hinted = match &group.nx_class {
                            Some(class) => format!("{}:{}", dest, class),
                            None => dest.to_string(),
                        };
                        self.get_group(&hinted, true)?
                    }
                };
                self.copy_missing_attributes(id, dest, node)?;
                inserted.record(source_id, dest);
                for (name, child) in source.children(source_id) {
                    self.insert_node(&join_path(dest, &name), source, child, inserted, deferred)?;
                }
            }
            NodeKind::Data(data) => {
                let id = match self.find(dest)? {
                    Some(id) => {
                        if !self.tree.node(id)?.is_data() {
                            return Err(NxError::TypeMismatch(dest.to_string()));
                        }
                        id
                    }
                    None => {
                        let id = self.create_data(dest, &data.descriptor)?;
                        if let DataValue::Pending(bytes) | DataValue::Loaded(bytes) = &data.value {
                            self.write_data(dest, bytes)?;
                        }
                        id
                    }
                };
                self.copy_missing_attributes(id, dest, node)?;
                inserted.record(source_id, dest);
            }
        }
        Ok(())
    }

    fn copy_missing_attributes(&mut self, id: NodeId, path: &str, from: &Node) -> NxResult<()> {
        for (name, value) in from.attributes.iter() {
            if self.tree.node(id)?.attributes.contains(name) {
                continue;
            }
            self.set_attribute(path, name, value.clone())?;
        }
        Ok(())
    }

    fn find(&mut self, path: &str) -> NxResult<Option<NodeId>> {
        match self.resolve(path, false) {
            Ok(id) => Ok(Some(id)),
            Err(NxError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn exists(&mut self, path: &str) -> NxResult<bool> {
        if self.find(path)?.is_some() {
            return Ok(true);
        }
        Ok(self.backend.link_info(path)?.is_some())
    }
}
