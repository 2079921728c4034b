use log::{debug, warn};
use nexus_tree::{
    join_path, normalize_link_target, plain_path, split_parent_name, AttrValue, BackendFactory,
    DatasetDescriptor, ExternalTarget, LinkInfo, LinkKind, LinkToken, NxError, NxResult,
    ObjectType, PathSegment, StorageBackend, DEFAULT_CLASS_ATTRIBUTE,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const ROOT_ADDR: i64 = 1;
const KIND_GROUP: i64 = 0;
const KIND_DATASET: i64 = 1;
const LINK_HARD: i64 = 0;
const LINK_SOFT: i64 = 1;
const LINK_EXTERNAL: i64 = 2;
const MAX_SOFT_LINK_HOPS: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteStoreConfig {
    /// Create the database when the file does not exist yet.
    pub create_missing: bool,
    pub busy_timeout_ms: u64,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            create_missing: false,
            busy_timeout_ms: 5000,
        }
    }
}

fn db_error(path: &str, action: &str, e: rusqlite::Error) -> NxError {
    warn!("SqliteBackend: {} {} failed! {}", action, path, e);
    NxError::backend(path, e)
}

struct LinkRow {
    link_type: i64,
    target_addr: Option<i64>,
    target_path: Option<String>,
    target_file: Option<String>,
}

enum Resolved {
    Missing,
    Object(i64),
    External,
}

/// A container file kept as one SQLite database.
pub struct SqliteBackend {
    file: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(file: impl Into<PathBuf>) -> NxResult<Self> {
        Self::open_with_config(file, &SqliteStoreConfig::default())
    }

    pub fn open_with_config(file: impl Into<PathBuf>, config: &SqliteStoreConfig) -> NxResult<Self> {
        let file = file.into();
        let name = file.display().to_string();
        debug!("SqliteBackend: open db {}", name);
        let conn = Connection::open(&file).map_err(|e| db_error(&name, "open db", e))?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| db_error(&name, "set busy timeout", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS objects (
                addr INTEGER PRIMARY KEY AUTOINCREMENT,
                kind INTEGER NOT NULL,
                descriptor TEXT,
                data BLOB
            )",
            [],
        )
        .map_err(|e| db_error(&name, "create objects table", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS links (
                parent INTEGER NOT NULL,
                name TEXT NOT NULL,
                link_type INTEGER NOT NULL,
                target_addr INTEGER,
                target_path TEXT,
                target_file TEXT,
                PRIMARY KEY (parent, name)
            )",
            [],
        )
        .map_err(|e| db_error(&name, "create links table", e))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_links_target ON links (target_addr)",
            [],
        )
        .map_err(|e| db_error(&name, "create links index", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS attributes (
                addr INTEGER NOT NULL,
                name TEXT NOT NULL,
                seq INTEGER NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (addr, name)
            )",
            [],
        )
        .map_err(|e| db_error(&name, "create attributes table", e))?;

        conn.execute(
            "INSERT OR IGNORE INTO objects (addr, kind) VALUES (?1, ?2)",
            params![ROOT_ADDR, KIND_GROUP],
        )
        .map_err(|e| db_error(&name, "insert root group", e))?;

        Ok(Self {
            file,
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> NxResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| NxError::backend(self.file.display().to_string(), e))
    }

    fn read_link(conn: &Connection, parent: i64, name: &str, path: &str) -> NxResult<Option<LinkRow>> {
        conn.query_row(
            "SELECT link_type, target_addr, target_path, target_file
             FROM links WHERE parent = ?1 AND name = ?2",
            params![parent, name],
            |row| {
                Ok(LinkRow {
                    link_type: row.get(0)?,
                    target_addr: row.get(1)?,
                    target_path: row.get(2)?,
                    target_file: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| db_error(path, "query link", e))
    }

    fn resolve(conn: &Connection, path: &str, hops: usize) -> NxResult<Resolved> {
        if hops > MAX_SOFT_LINK_HOPS {
            debug!("SqliteBackend: soft link loop at {}, treated as dangling", path);
            return Ok(Resolved::Missing);
        }

        let names: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = ROOT_ADDR;
        for (i, name) in names.iter().enumerate() {
            let Some(link) = Self::read_link(conn, current, name, path)? else {
                return Ok(Resolved::Missing);
            };
            match link.link_type {
                LINK_HARD => {
                    current = link.target_addr.ok_or_else(|| {
                        NxError::InvalidData(format!("hard link without target: {}", path))
                    })?;
                }
                LINK_SOFT => {
                    let target = link.target_path.unwrap_or_default();
                    let prefix: Vec<PathSegment> =
                        names[..i].iter().map(|n| PathSegment::new(*n)).collect();
                    let tail: Vec<PathSegment> =
                        names[i + 1..].iter().map(|n| PathSegment::new(*n)).collect();
                    let redirected = normalize_link_target(&prefix, &target, &tail)?;
                    return Self::resolve(conn, &plain_path(&redirected), hops + 1);
                }
                LINK_EXTERNAL => {
                    if i + 1 == names.len() {
                        return Ok(Resolved::External);
                    }
                    return Ok(Resolved::Missing);
                }
                other => {
                    return Err(NxError::InvalidData(format!(
                        "unknown link type {} at {}",
                        other, path
                    )))
                }
            }
        }
        Ok(Resolved::Object(current))
    }

    fn object_addr(conn: &Connection, path: &str) -> NxResult<i64> {
        match Self::resolve(conn, path, 0)? {
            Resolved::Object(addr) => Ok(addr),
            _ => Err(NxError::NotFound(path.to_string())),
        }
    }

    fn object_kind(conn: &Connection, addr: i64, path: &str) -> NxResult<Option<i64>> {
        conn.query_row(
            "SELECT kind FROM objects WHERE addr = ?1",
            params![addr],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| db_error(path, "query object", e))
    }

    /// Parent group and final name for a link about to be created at `path`.
    fn parent_for_new_link(conn: &Connection, path: &str) -> NxResult<(i64, String)> {
        let (parent, name) = split_parent_name(path)
            .ok_or_else(|| NxError::InvalidParam(format!("cannot link at {}", path)))?;
        let parent_addr = Self::object_addr(conn, &parent)?;
        if Self::object_kind(conn, parent_addr, path)? != Some(KIND_GROUP) {
            return Err(NxError::TypeMismatch(parent));
        }
        if Self::read_link(conn, parent_addr, &name, path)?.is_some() {
            return Err(NxError::AlreadyExists(path.to_string()));
        }
        Ok((parent_addr, name))
    }

    fn insert_link(
        conn: &Connection,
        path: &str,
        parent: i64,
        name: &str,
        link_type: i64,
        target_addr: Option<i64>,
        target_path: Option<&str>,
        target_file: Option<&str>,
    ) -> NxResult<()> {
        conn.execute(
            "INSERT INTO links (parent, name, link_type, target_addr, target_path, target_file)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![parent, name, link_type, target_addr, target_path, target_file],
        )
        .map_err(|e| db_error(path, "insert link", e))?;
        Ok(())
    }

    fn write_attribute(conn: &Connection, addr: i64, path: &str, name: &str, value: &AttrValue) -> NxResult<()> {
        let value = serde_json::to_string(value)
            .map_err(|e| NxError::InvalidData(format!("encode attribute {}: {}", name, e)))?;
        conn.execute(
            "INSERT INTO attributes (addr, name, seq, value)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM attributes WHERE addr = ?1), ?3)
             ON CONFLICT (addr, name) DO UPDATE SET value = excluded.value",
            params![addr, name, value],
        )
        .map_err(|e| db_error(path, "write attribute", e))?;
        Ok(())
    }

    /// Drop objects no hard link reaches any more, with their links and
    /// attributes.
    fn collect_garbage(conn: &Connection, path: &str) -> NxResult<usize> {
        let mut total = 0;
        loop {
            let removed = conn
                .execute(
                    "DELETE FROM objects WHERE addr != ?1 AND addr NOT IN
                     (SELECT target_addr FROM links WHERE link_type = ?2 AND target_addr IS NOT NULL)",
                    params![ROOT_ADDR, LINK_HARD],
                )
                .map_err(|e| db_error(path, "collect objects", e))?;
            if removed == 0 {
                break;
            }
            total += removed;
            conn.execute(
                "DELETE FROM links WHERE parent NOT IN (SELECT addr FROM objects)",
                [],
            )
            .map_err(|e| db_error(path, "collect links", e))?;
        }
        conn.execute(
            "DELETE FROM attributes WHERE addr NOT IN (SELECT addr FROM objects)",
            [],
        )
        .map_err(|e| db_error(path, "collect attributes", e))?;
        Ok(total)
    }
}

impl StorageBackend for SqliteBackend {
    fn file_path(&self) -> &Path {
        &self.file
    }

    fn object_type(&self, path: &str) -> NxResult<ObjectType> {
        let conn = self.lock()?;
        let addr = match Self::resolve(&conn, path, 0)? {
            Resolved::Object(addr) => addr,
            _ => return Ok(ObjectType::None),
        };
        Ok(match Self::object_kind(&conn, addr, path)? {
            Some(KIND_GROUP) => ObjectType::Group,
            Some(KIND_DATASET) => ObjectType::Dataset,
            _ => ObjectType::None,
        })
    }

    fn link_info(&self, path: &str) -> NxResult<Option<LinkInfo>> {
        let conn = self.lock()?;
        let Some((parent, name)) = split_parent_name(path) else {
            return Ok(Some(LinkInfo::hard()));
        };
        let parent_addr = match Self::resolve(&conn, &parent, 0)? {
            Resolved::Object(addr) => addr,
            _ => return Ok(None),
        };
        let Some(link) = Self::read_link(&conn, parent_addr, &name, path)? else {
            return Ok(None);
        };

        let kind = match link.link_type {
            LINK_HARD => LinkKind::Hard,
            LINK_SOFT => LinkKind::Soft(link.target_path.unwrap_or_default()),
            LINK_EXTERNAL => LinkKind::External(ExternalTarget::new(
                link.target_file.unwrap_or_default(),
                link.target_path.unwrap_or_else(|| "/".to_string()),
            )),
            other => {
                return Err(NxError::InvalidData(format!(
                    "unknown link type {} at {}",
                    other, path
                )))
            }
        };
        Ok(Some(LinkInfo { kind }))
    }

    fn link_token(&self, path: &str) -> NxResult<LinkToken> {
        let conn = self.lock()?;
        Ok(match Self::resolve(&conn, path, 0)? {
            Resolved::Missing => LinkToken::NoLink,
            Resolved::External => LinkToken::External,
            Resolved::Object(ROOT_ADDR) => LinkToken::Root,
            Resolved::Object(addr) => LinkToken::Object(addr as u64),
        })
    }

    fn list_children(&self, group_path: &str) -> NxResult<Vec<(String, String)>> {
        let conn = self.lock()?;
        let addr = Self::object_addr(&conn, group_path)?;
        if Self::object_kind(&conn, addr, group_path)? != Some(KIND_GROUP) {
            return Err(NxError::TypeMismatch(group_path.to_string()));
        }

        let mut stmt = conn
            .prepare("SELECT name FROM links WHERE parent = ?1 ORDER BY name")
            .map_err(|e| db_error(group_path, "list children", e))?;
        let names = stmt
            .query_map(params![addr], |row| row.get::<_, String>(0))
            .map_err(|e| db_error(group_path, "list children", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| db_error(group_path, "list children", e))?;

        Ok(names
            .into_iter()
            .map(|name| {
                let path = join_path(group_path, &name);
                (name, path)
            })
            .collect())
    }

    fn attributes(&self, path: &str) -> NxResult<Vec<(String, AttrValue)>> {
        let conn = self.lock()?;
        let addr = Self::object_addr(&conn, path)?;
        let mut stmt = conn
            .prepare("SELECT name, value FROM attributes WHERE addr = ?1 ORDER BY seq")
            .map_err(|e| db_error(path, "query attributes", e))?;
        let rows = stmt
            .query_map(params![addr], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| db_error(path, "query attributes", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| db_error(path, "query attributes", e))?;

        let mut attributes = Vec::with_capacity(rows.len());
        for (name, value) in rows {
            let value: AttrValue = serde_json::from_str(&value).map_err(|e| {
                NxError::InvalidData(format!("attribute {} of {}: {}", name, path, e))
            })?;
            attributes.push((name, value));
        }
        Ok(attributes)
    }

    fn set_attribute(&self, path: &str, name: &str, value: &AttrValue) -> NxResult<()> {
        let conn = self.lock()?;
        let addr = Self::object_addr(&conn, path)?;
        Self::write_attribute(&conn, addr, path, name, value)
    }

    fn create_group(&self, path: &str, class_hint: Option<&str>) -> NxResult<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| db_error(path, "begin transaction", e))?;

        let (parent, name) = Self::parent_for_new_link(&tx, path)?;
        tx.execute("INSERT INTO objects (kind) VALUES (?1)", params![KIND_GROUP])
            .map_err(|e| db_error(path, "insert group", e))?;
        let addr = tx.last_insert_rowid();
        Self::insert_link(&tx, path, parent, &name, LINK_HARD, Some(addr), None, None)?;
        if let Some(class) = class_hint {
            Self::write_attribute(&tx, addr, path, DEFAULT_CLASS_ATTRIBUTE, &AttrValue::text(class))?;
        }

        tx.commit().map_err(|e| db_error(path, "commit", e))?;
        Ok(())
    }

    fn create_dataset(&self, path: &str, descriptor: &DatasetDescriptor) -> NxResult<()> {
        let descriptor = serde_json::to_string(descriptor)
            .map_err(|e| NxError::InvalidData(format!("encode descriptor of {}: {}", path, e)))?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| db_error(path, "begin transaction", e))?;

        let (parent, name) = Self::parent_for_new_link(&tx, path)?;
        tx.execute(
            "INSERT INTO objects (kind, descriptor, data) VALUES (?1, ?2, ?3)",
            params![KIND_DATASET, descriptor, Vec::<u8>::new()],
        )
        .map_err(|e| db_error(path, "insert dataset", e))?;
        let addr = tx.last_insert_rowid();
        Self::insert_link(&tx, path, parent, &name, LINK_HARD, Some(addr), None, None)?;

        tx.commit().map_err(|e| db_error(path, "commit", e))?;
        Ok(())
    }

    fn create_hard_link(&self, src_path: &str, dst_path: &str) -> NxResult<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| db_error(dst_path, "begin transaction", e))?;

        let addr = Self::object_addr(&tx, src_path)?;
        let (parent, name) = Self::parent_for_new_link(&tx, dst_path)?;
        Self::insert_link(&tx, dst_path, parent, &name, LINK_HARD, Some(addr), None, None)?;

        tx.commit().map_err(|e| db_error(dst_path, "commit", e))?;
        Ok(())
    }

    fn create_soft_link(&self, target: &str, dst_path: &str) -> NxResult<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| db_error(dst_path, "begin transaction", e))?;

        let (parent, name) = Self::parent_for_new_link(&tx, dst_path)?;
        Self::insert_link(&tx, dst_path, parent, &name, LINK_SOFT, None, Some(target), None)?;

        tx.commit().map_err(|e| db_error(dst_path, "commit", e))?;
        Ok(())
    }

    fn create_external_link(
        &self,
        target_file: &str,
        target_path: &str,
        dst_path: &str,
    ) -> NxResult<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| db_error(dst_path, "begin transaction", e))?;

        let (parent, name) = Self::parent_for_new_link(&tx, dst_path)?;
        Self::insert_link(
            &tx,
            dst_path,
            parent,
            &name,
            LINK_EXTERNAL,
            None,
            Some(target_path),
            Some(target_file),
        )?;

        tx.commit().map_err(|e| db_error(dst_path, "commit", e))?;
        Ok(())
    }

    fn remove_link(&self, path: &str) -> NxResult<()> {
        let (parent, name) = split_parent_name(path)
            .ok_or_else(|| NxError::InvalidParam(format!("cannot remove {}", path)))?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| db_error(path, "begin transaction", e))?;

        let parent_addr = Self::object_addr(&tx, &parent)?;
        let removed = tx
            .execute(
                "DELETE FROM links WHERE parent = ?1 AND name = ?2",
                params![parent_addr, name],
            )
            .map_err(|e| db_error(path, "delete link", e))?;
        if removed == 0 {
            return Err(NxError::NotFound(path.to_string()));
        }
        let collected = Self::collect_garbage(&tx, path)?;

        tx.commit().map_err(|e| db_error(path, "commit", e))?;
        debug!("SqliteBackend: removed {}, {} objects collected", path, collected);
        Ok(())
    }

    fn read_dataset_descriptor(&self, path: &str) -> NxResult<DatasetDescriptor> {
        let conn = self.lock()?;
        let addr = Self::object_addr(&conn, path)?;
        let row: Option<(i64, Option<String>)> = conn
            .query_row(
                "SELECT kind, descriptor FROM objects WHERE addr = ?1",
                params![addr],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| db_error(path, "query descriptor", e))?;

        match row {
            Some((KIND_DATASET, Some(descriptor))) => serde_json::from_str(&descriptor)
                .map_err(|e| NxError::InvalidData(format!("descriptor of {}: {}", path, e))),
            Some(_) => Err(NxError::TypeMismatch(path.to_string())),
            None => Err(NxError::NotFound(path.to_string())),
        }
    }

    fn read_data(&self, path: &str) -> NxResult<Vec<u8>> {
        let conn = self.lock()?;
        let addr = Self::object_addr(&conn, path)?;
        let row: Option<(i64, Option<Vec<u8>>)> = conn
            .query_row(
                "SELECT kind, data FROM objects WHERE addr = ?1",
                params![addr],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| db_error(path, "query data", e))?;

        match row {
            Some((KIND_DATASET, data)) => Ok(data.unwrap_or_default()),
            Some(_) => Err(NxError::TypeMismatch(path.to_string())),
            None => Err(NxError::NotFound(path.to_string())),
        }
    }

    fn write_data(&self, path: &str, data: &[u8]) -> NxResult<()> {
        let conn = self.lock()?;
        let addr = Self::object_addr(&conn, path)?;
        let updated = conn
            .execute(
                "UPDATE objects SET data = ?1 WHERE addr = ?2 AND kind = ?3",
                params![data, addr, KIND_DATASET],
            )
            .map_err(|e| db_error(path, "write data", e))?;
        if updated == 0 {
            return Err(NxError::TypeMismatch(path.to_string()));
        }
        Ok(())
    }
}

/// Opens SQLite container files for the engine's nested sessions.
#[derive(Debug, Clone, Default)]
pub struct SqliteFactory {
    config: SqliteStoreConfig,
}

impl SqliteFactory {
    pub fn new(config: SqliteStoreConfig) -> Self {
        Self { config }
    }
}

impl BackendFactory for SqliteFactory {
    fn open(&self, file: &Path) -> NxResult<Box<dyn StorageBackend>> {
        if !self.config.create_missing && !file.exists() {
            return Err(NxError::NotFound(file.display().to_string()));
        }
        Ok(Box::new(SqliteBackend::open_with_config(file, &self.config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_tree::ElementType;
    use tempfile::TempDir;

    fn create_backend() -> (SqliteBackend, TempDir) {
        let tmp_dir = TempDir::new().unwrap();
        let backend = SqliteBackend::open(tmp_dir.path().join("test.nxs")).unwrap();
        (backend, tmp_dir)
    }

    fn counts() -> DatasetDescriptor {
        DatasetDescriptor::fixed(vec![4], ElementType::Int32)
    }

    #[test]
    fn test_root_exists_on_open() {
        let (backend, _tmp) = create_backend();
        assert_eq!(backend.object_type("/").unwrap(), ObjectType::Group);
        assert_eq!(backend.link_token("/").unwrap(), LinkToken::Root);
        assert_eq!(backend.link_info("/").unwrap(), Some(LinkInfo::hard()));
        assert!(backend.list_children("/").unwrap().is_empty());
    }

    #[test]
    fn test_group_with_class_hint() {
        let (backend, _tmp) = create_backend();
        backend.create_group("/entry", Some("NXentry")).unwrap();
        assert_eq!(backend.object_type("/entry").unwrap(), ObjectType::Group);
        assert_eq!(
            backend.attributes("/entry").unwrap(),
            vec![(DEFAULT_CLASS_ATTRIBUTE.to_string(), AttrValue::text("NXentry"))]
        );
        assert!(matches!(
            backend.create_group("/entry", None),
            Err(NxError::AlreadyExists(_))
        ));
        assert!(matches!(
            backend.create_group("/missing/child", None),
            Err(NxError::NotFound(_))
        ));
    }

    #[test]
    fn test_hard_link_shares_token() {
        let (backend, _tmp) = create_backend();
        backend.create_group("/entry", None).unwrap();
        backend.create_dataset("/entry/counts", &counts()).unwrap();
        backend.create_hard_link("/entry/counts", "/alias").unwrap();

        let token = backend.link_token("/entry/counts").unwrap();
        assert!(matches!(token, LinkToken::Object(_)));
        assert_eq!(backend.link_token("/alias").unwrap(), token);
        assert_eq!(backend.read_dataset_descriptor("/alias").unwrap(), counts());
    }

    #[test]
    fn test_relative_soft_link() {
        let (backend, _tmp) = create_backend();
        backend.create_group("/entry", None).unwrap();
        backend.create_dataset("/entry/counts", &counts()).unwrap();
        backend.create_soft_link("counts", "/entry/soft").unwrap();
        backend.create_soft_link("../entry", "/entry/up").unwrap();

        assert_eq!(
            backend.link_token("/entry/soft").unwrap(),
            backend.link_token("/entry/counts").unwrap()
        );
        assert_eq!(backend.object_type("/entry/up/counts").unwrap(), ObjectType::Dataset);
        assert_eq!(
            backend.link_info("/entry/soft").unwrap().map(|l| l.kind),
            Some(LinkKind::Soft("counts".to_string()))
        );
    }

    #[test]
    fn test_soft_link_loop_is_dangling() {
        let (backend, _tmp) = create_backend();
        backend.create_soft_link("/b", "/a").unwrap();
        backend.create_soft_link("/a", "/b").unwrap();
        assert_eq!(backend.object_type("/a").unwrap(), ObjectType::None);
        assert_eq!(backend.link_token("/a").unwrap(), LinkToken::NoLink);
    }

    #[test]
    fn test_attributes_keep_order_and_overwrite() {
        let (backend, _tmp) = create_backend();
        backend.create_group("/sample", None).unwrap();
        backend
            .set_attribute("/sample", "zeta", &AttrValue::Int(vec![1]))
            .unwrap();
        backend
            .set_attribute("/sample", "alpha", &AttrValue::Float(vec![0.5]))
            .unwrap();
        backend
            .set_attribute("/sample", "zeta", &AttrValue::Int(vec![2]))
            .unwrap();

        let attributes = backend.attributes("/sample").unwrap();
        assert_eq!(
            attributes,
            vec![
                ("zeta".to_string(), AttrValue::Int(vec![2])),
                ("alpha".to_string(), AttrValue::Float(vec![0.5])),
            ]
        );
    }

    #[test]
    fn test_remove_link_collects_unreachable_objects() {
        let (backend, _tmp) = create_backend();
        backend.create_group("/entry", None).unwrap();
        backend.create_dataset("/entry/counts", &counts()).unwrap();
        backend.create_hard_link("/entry/counts", "/keep").unwrap();

        backend.remove_link("/entry").unwrap();
        assert_eq!(backend.object_type("/entry").unwrap(), ObjectType::None);
        assert_eq!(backend.object_type("/keep").unwrap(), ObjectType::Dataset);

        backend.remove_link("/keep").unwrap();
        let conn = backend.lock().unwrap();
        let objects: i64 = conn
            .query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))
            .unwrap();
        assert_eq!(objects, 1);
        drop(conn);

        assert!(matches!(
            backend.remove_link("/keep"),
            Err(NxError::NotFound(_))
        ));
    }

    #[test]
    fn test_data_round_trip() {
        let (backend, _tmp) = create_backend();
        backend.create_dataset("/counts", &counts()).unwrap();
        assert!(backend.read_data("/counts").unwrap().is_empty());
        backend.write_data("/counts", &[1, 2, 3]).unwrap();
        assert_eq!(backend.read_data("/counts").unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            backend.write_data("/", &[1]),
            Err(NxError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_factory_refuses_missing_files() {
        let tmp_dir = TempDir::new().unwrap();
        let file = tmp_dir.path().join("none.nxs");
        assert!(matches!(
            SqliteFactory::default().open(&file),
            Err(NxError::NotFound(_))
        ));

        let creating = SqliteFactory::new(SqliteStoreConfig {
            create_missing: true,
            ..Default::default()
        });
        assert!(creating.open(&file).is_ok());
        assert!(SqliteFactory::default().open(&file).is_ok());
    }
}
