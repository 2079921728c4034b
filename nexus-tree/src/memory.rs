use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    normalize_link_target, plain_path, split_parent_name, AttrValue, Attributes, BackendFactory,
    DatasetDescriptor, ExternalTarget, LinkInfo, LinkKind, LinkToken, NxError, NxResult,
    ObjectType, PathSegment, StorageBackend, DEFAULT_CLASS_ATTRIBUTE,
};

const MAX_SOFT_LINK_HOPS: usize = 32;
const ROOT_ADDR: u64 = 0;

/// Mutating call seen by a `MemoryBackend`, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateGroup(String),
    CreateDataset(String),
    CreateHardLink { src: String, dst: String },
    CreateSoftLink { target: String, dst: String },
    CreateExternalLink { uri: String, dst: String },
    RemoveLink(String),
    SetAttribute { path: String, name: String },
    WriteData(String),
}

#[derive(Debug, Clone)]
enum MemLink {
    Hard(u64),
    Soft(String),
    External(ExternalTarget),
}

#[derive(Debug)]
enum MemObject {
    Group {
        links: BTreeMap<String, MemLink>,
    },
    Dataset {
        descriptor: DatasetDescriptor,
        data: Vec<u8>,
    },
}

#[derive(Debug)]
struct MemEntry {
    object: MemObject,
    attributes: Attributes,
}

#[derive(Debug)]
pub struct MemoryStore {
    objects: HashMap<u64, MemEntry>,
    next_addr: u64,
    calls: Vec<BackendCall>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let mut objects = HashMap::new();
        objects.insert(
            ROOT_ADDR,
            MemEntry {
                object: MemObject::Group {
                    links: BTreeMap::new(),
                },
                attributes: Attributes::new(),
            },
        );
        Self {
            objects,
            next_addr: ROOT_ADDR + 1,
            calls: Vec::new(),
        }
    }
}

enum Resolved {
    Missing,
    Object(u64),
    External,
}

impl MemoryStore {
    fn components(path: &str) -> Vec<&str> {
        path.split('/').filter(|s| !s.is_empty()).collect()
    }

    fn links_of(&self, addr: u64) -> Option<&BTreeMap<String, MemLink>> {
        match &self.objects.get(&addr)?.object {
            MemObject::Group { links } => Some(links),
            _ => None,
        }
    }

    fn resolve(&self, path: &str, hops: usize) -> NxResult<Resolved> {
        if hops > MAX_SOFT_LINK_HOPS {
            debug!("memory backend: soft link loop at {}, treated as dangling", path);
            return Ok(Resolved::Missing);
        }
        let components = Self::components(path);
        let mut current = ROOT_ADDR;
        for (i, name) in components.iter().enumerate() {
            let Some(links) = self.links_of(current) else {
                return Ok(Resolved::Missing);
            };
            match links.get(*name) {
                None => return Ok(Resolved::Missing),
                Some(MemLink::Hard(addr)) => current = *addr,
                Some(MemLink::Soft(target)) => {
                    let prefix: Vec<PathSegment> =
                        components[..i].iter().map(|n| PathSegment::new(*n)).collect();
                    let tail: Vec<PathSegment> =
                        components[i + 1..].iter().map(|n| PathSegment::new(*n)).collect();
                    let redirected = normalize_link_target(&prefix, target, &tail)?;
                    return self.resolve(&plain_path(&redirected), hops + 1);
                }
                Some(MemLink::External(_)) => {
                    if i + 1 == components.len() {
                        return Ok(Resolved::External);
                    }
                    return Ok(Resolved::Missing);
                }
            }
        }
        Ok(Resolved::Object(current))
    }

    fn object_addr(&self, path: &str) -> NxResult<u64> {
        match self.resolve(path, 0)? {
            Resolved::Object(addr) => Ok(addr),
            _ => Err(NxError::NotFound(path.to_string())),
        }
    }

    fn entry_mut(&mut self, path: &str) -> NxResult<&mut MemEntry> {
        let addr = self.object_addr(path)?;
        self.objects
            .get_mut(&addr)
            .ok_or_else(|| NxError::NotFound(path.to_string()))
    }

    /// Parent group address and final name for a link to be created.
    fn parent_for_new_link(&self, path: &str) -> NxResult<(u64, String)> {
        let (parent, name) = split_parent_name(path)
            .ok_or_else(|| NxError::InvalidParam(format!("cannot link at {}", path)))?;
        let parent_addr = self.object_addr(&parent)?;
        let links = self
            .links_of(parent_addr)
            .ok_or_else(|| NxError::TypeMismatch(parent.clone()))?;
        if links.contains_key(&name) {
            return Err(NxError::AlreadyExists(path.to_string()));
        }
        Ok((parent_addr, name))
    }

    fn insert_link(&mut self, parent: u64, name: String, link: MemLink) {
        if let Some(MemEntry {
            object: MemObject::Group { links },
            ..
        }) = self.objects.get_mut(&parent)
        {
            links.insert(name, link);
        }
    }

    fn add_object(&mut self, object: MemObject) -> u64 {
        let addr = self.next_addr;
        self.next_addr += 1;
        self.objects.insert(
            addr,
            MemEntry {
                object,
                attributes: Attributes::new(),
            },
        );
        addr
    }
}

/// In-memory container file. Clones share the same store.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    file: PathBuf,
    store: Arc<Mutex<MemoryStore>>,
}

impl MemoryBackend {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            store: Arc::new(Mutex::new(MemoryStore::default())),
        }
    }

    fn lock(&self) -> NxResult<MutexGuard<'_, MemoryStore>> {
        self.store
            .lock()
            .map_err(|e| NxError::backend(self.file.display().to_string(), e))
    }

    /// Every mutating call so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut store) = self.lock() {
            store.calls.clear();
        }
    }

    fn record(store: &mut MemoryStore, call: BackendCall) {
        debug!("memory backend: {:?}", call);
        store.calls.push(call);
    }
}

impl StorageBackend for MemoryBackend {
    fn file_path(&self) -> &Path {
        &self.file
    }

    fn object_type(&self, path: &str) -> NxResult<ObjectType> {
        let store = self.lock()?;
        let addr = match store.resolve(path, 0)? {
            Resolved::Object(addr) => addr,
            _ => return Ok(ObjectType::None),
        };
        Ok(match store.objects.get(&addr).map(|e| &e.object) {
            Some(MemObject::Group { .. }) => ObjectType::Group,
            Some(MemObject::Dataset { .. }) => ObjectType::Dataset,
            None => ObjectType::None,
        })
    }

    fn link_info(&self, path: &str) -> NxResult<Option<LinkInfo>> {
        let store = self.lock()?;
        let Some((parent, name)) = split_parent_name(path) else {
            return Ok(Some(LinkInfo::hard()));
        };
        let parent_addr = match store.resolve(&parent, 0)? {
            Resolved::Object(addr) => addr,
            _ => return Ok(None),
        };
        let link = store.links_of(parent_addr).and_then(|l| l.get(&name));
        Ok(link.map(|link| LinkInfo {
            kind: match link {
                MemLink::Hard(_) => LinkKind::Hard,
                MemLink::Soft(target) => LinkKind::Soft(target.clone()),
                MemLink::External(target) => LinkKind::External(target.clone()),
            },
        }))
    }

    fn link_token(&self, path: &str) -> NxResult<LinkToken> {
        let store = self.lock()?;
        Ok(match store.resolve(path, 0)? {
            Resolved::Missing => LinkToken::NoLink,
            Resolved::External => LinkToken::External,
            Resolved::Object(ROOT_ADDR) => LinkToken::Root,
            Resolved::Object(addr) => LinkToken::Object(addr),
        })
    }

    fn list_children(&self, group_path: &str) -> NxResult<Vec<(String, String)>> {
        let store = self.lock()?;
        let addr = store.object_addr(group_path)?;
        let links = store
            .links_of(addr)
            .ok_or_else(|| NxError::TypeMismatch(group_path.to_string()))?;
        Ok(links
            .keys()
            .map(|name| (name.clone(), crate::join_path(group_path, name)))
            .collect())
    }

    fn attributes(&self, path: &str) -> NxResult<Vec<(String, AttrValue)>> {
        let store = self.lock()?;
        let addr = store.object_addr(path)?;
        Ok(store
            .objects
            .get(&addr)
            .map(|e| {
                e.attributes
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn set_attribute(&self, path: &str, name: &str, value: &AttrValue) -> NxResult<()> {
        let mut store = self.lock()?;
        store.entry_mut(path)?.attributes.set(name, value.clone());
        Self::record(
            &mut store,
            BackendCall::SetAttribute {
                path: path.to_string(),
                name: name.to_string(),
            },
        );
        Ok(())
    }

    fn create_group(&self, path: &str, class_hint: Option<&str>) -> NxResult<()> {
        let mut store = self.lock()?;
        let (parent, name) = store.parent_for_new_link(path)?;
        let addr = store.add_object(MemObject::Group {
            links: BTreeMap::new(),
        });
        if let Some(class) = class_hint {
            if let Some(entry) = store.objects.get_mut(&addr) {
                entry
                    .attributes
                    .set(DEFAULT_CLASS_ATTRIBUTE, AttrValue::text(class));
            }
        }
        store.insert_link(parent, name, MemLink::Hard(addr));
        Self::record(&mut store, BackendCall::CreateGroup(path.to_string()));
        Ok(())
    }

    fn create_dataset(&self, path: &str, descriptor: &DatasetDescriptor) -> NxResult<()> {
        let mut store = self.lock()?;
        let (parent, name) = store.parent_for_new_link(path)?;
        let addr = store.add_object(MemObject::Dataset {
            descriptor: descriptor.clone(),
            data: Vec::new(),
        });
        store.insert_link(parent, name, MemLink::Hard(addr));
        Self::record(&mut store, BackendCall::CreateDataset(path.to_string()));
        Ok(())
    }

    fn create_hard_link(&self, src_path: &str, dst_path: &str) -> NxResult<()> {
        let mut store = self.lock()?;
        let addr = store.object_addr(src_path)?;
        let (parent, name) = store.parent_for_new_link(dst_path)?;
        store.insert_link(parent, name, MemLink::Hard(addr));
        Self::record(
            &mut store,
            BackendCall::CreateHardLink {
                src: src_path.to_string(),
                dst: dst_path.to_string(),
            },
        );
        Ok(())
    }

    fn create_soft_link(&self, target: &str, dst_path: &str) -> NxResult<()> {
        let mut store = self.lock()?;
        let (parent, name) = store.parent_for_new_link(dst_path)?;
        store.insert_link(parent, name, MemLink::Soft(target.to_string()));
        Self::record(
            &mut store,
            BackendCall::CreateSoftLink {
                target: target.to_string(),
                dst: dst_path.to_string(),
            },
        );
        Ok(())
    }

    fn create_external_link(
        &self,
        target_file: &str,
        target_path: &str,
        dst_path: &str,
    ) -> NxResult<()> {
        let mut store = self.lock()?;
        let (parent, name) = store.parent_for_new_link(dst_path)?;
        let target = ExternalTarget::new(target_file, target_path);
        let uri = target.to_uri();
        store.insert_link(parent, name, MemLink::External(target));
        Self::record(
            &mut store,
            BackendCall::CreateExternalLink {
                uri,
                dst: dst_path.to_string(),
            },
        );
        Ok(())
    }

    fn remove_link(&self, path: &str) -> NxResult<()> {
        let mut store = self.lock()?;
        let (parent, name) = split_parent_name(path)
            .ok_or_else(|| NxError::InvalidParam(format!("cannot remove {}", path)))?;
        let parent_addr = store.object_addr(&parent)?;
        let removed = match store.objects.get_mut(&parent_addr).map(|e| &mut e.object) {
            Some(MemObject::Group { links }) => links.remove(&name).is_some(),
            _ => false,
        };
        if !removed {
            return Err(NxError::NotFound(path.to_string()));
        }
        Self::record(&mut store, BackendCall::RemoveLink(path.to_string()));
        Ok(())
    }

    fn read_dataset_descriptor(&self, path: &str) -> NxResult<DatasetDescriptor> {
        let store = self.lock()?;
        let addr = store.object_addr(path)?;
        match store.objects.get(&addr).map(|e| &e.object) {
            Some(MemObject::Dataset { descriptor, .. }) => Ok(descriptor.clone()),
            _ => Err(NxError::TypeMismatch(path.to_string())),
        }
    }

    fn read_data(&self, path: &str) -> NxResult<Vec<u8>> {
        let store = self.lock()?;
        let addr = store.object_addr(path)?;
        match store.objects.get(&addr).map(|e| &e.object) {
            Some(MemObject::Dataset { data, .. }) => Ok(data.clone()),
            _ => Err(NxError::TypeMismatch(path.to_string())),
        }
    }

    fn write_data(&self, path: &str, bytes: &[u8]) -> NxResult<()> {
        let mut store = self.lock()?;
        match &mut store.entry_mut(path)?.object {
            MemObject::Dataset { data, .. } => *data = bytes.to_vec(),
            _ => return Err(NxError::TypeMismatch(path.to_string())),
        }
        Self::record(&mut store, BackendCall::WriteData(path.to_string()));
        Ok(())
    }
}

/// Registry of in-memory files by name, so links between them resolve.
#[derive(Debug, Default)]
pub struct MemoryFactory {
    files: Mutex<HashMap<PathBuf, MemoryBackend>>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) an empty file and return a handle sharing its store.
    pub fn create(&self, file: impl Into<PathBuf>) -> MemoryBackend {
        let backend = MemoryBackend::new(file);
        if let Ok(mut files) = self.files.lock() {
            files.insert(backend.file.clone(), backend.clone());
        }
        backend
    }

    pub fn get(&self, file: &Path) -> Option<MemoryBackend> {
        self.files.lock().ok()?.get(file).cloned()
    }
}

impl BackendFactory for MemoryFactory {
    fn open(&self, file: &Path) -> NxResult<Box<dyn StorageBackend>> {
        match self.get(file) {
            Some(backend) => Ok(Box::new(backend)),
            None => Err(NxError::NotFound(file.display().to_string())),
        }
    }
}
