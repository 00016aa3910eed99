//! Directory-backed document store.
//!
//! Layout under the root directory:
//!
//! ```text
//! MANIFEST                      magic + format version
//! <store>/<collection>.jsonl    one JSON document per line, insertion order
//! <store>/<collection>.lock     fs2 lock file guarding the collection
//! ```
//!
//! Writers hold an exclusive lock on the collection's lock file, readers a
//! shared one. Inserts append; updates and deletes rewrite the data file
//! through a temp file and rename.

use crate::error::{DriverError, Result};
use crate::types::{CollectionKey, DeleteOutcome, Document, Filter, InsertOutcome, UpdateOutcome};
use fs2::FileExt;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::{apply_delete, apply_insert, apply_update, Connector, DocumentStore};

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"LDS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const MANIFEST_FILE: &str = "MANIFEST";
const DATA_EXT: &str = "jsonl";
const LOCK_EXT: &str = "lock";
const TEMP_EXT: &str = "jsonl.tmp";

/// Opens [`FileStore`] handles.
#[derive(Clone, Debug)]
pub struct FileConnector {
    create_if_missing: bool,
}

impl FileConnector {
    pub fn new(create_if_missing: bool) -> Self {
        Self { create_if_missing }
    }
}

impl Default for FileConnector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connector for FileConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn DocumentStore>> {
        let root = parse_address(address);
        let store = FileStore::open(root, self.create_if_missing)
            .map_err(|e| DriverError::connection(address, e))?;
        Ok(Arc::new(store))
    }
}

/// Strip an optional `file://` scheme.
fn parse_address(address: &str) -> PathBuf {
    PathBuf::from(address.strip_prefix("file://").unwrap_or(address))
}

/// A document store rooted at a directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

struct CollectionPaths {
    dir: PathBuf,
    data: PathBuf,
    lock: PathBuf,
    temp: PathBuf,
}

impl FileStore {
    /// Open the store at `root`, creating it first if allowed.
    pub fn open(root: impl AsRef<Path>, create_if_missing: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            if !create_if_missing {
                return Err(DriverError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("store root {} does not exist", root.display()),
                )));
            }
            fs::create_dir_all(&root)?;
        }

        if !root.is_dir() {
            return Err(DriverError::Io(std::io::Error::new(
                ErrorKind::Other,
                format!("store root {} is not a directory", root.display()),
            )));
        }

        let manifest = root.join(MANIFEST_FILE);
        if manifest.exists() {
            Self::verify_manifest(&manifest)?;
        } else {
            Self::write_manifest(&manifest)?;
        }

        debug!(root = %root.display(), "opened file store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path)?;
        let mut header = [0u8; 5];
        file.read_exact(&mut header)
            .map_err(|_| DriverError::InvalidConfig("truncated store manifest".to_string()))?;

        if &header[0..4] != STORE_MAGIC {
            return Err(DriverError::InvalidConfig("invalid store magic".to_string()));
        }
        if header[4] != STORE_VERSION {
            return Err(DriverError::InvalidConfig(format!(
                "unsupported store version {}",
                header[4]
            )));
        }
        Ok(())
    }

    fn paths(&self, key: &CollectionKey) -> Result<CollectionPaths> {
        validate_name(&key.store)?;
        validate_name(&key.collection)?;
        let dir = self.root.join(&key.store);
        Ok(CollectionPaths {
            data: dir.join(format!("{}.{}", key.collection, DATA_EXT)),
            lock: dir.join(format!("{}.{}", key.collection, LOCK_EXT)),
            temp: dir.join(format!("{}.{}", key.collection, TEMP_EXT)),
            dir,
        })
    }

    /// I/O failures while the root is gone mean the handle is dead.
    fn classify(&self, e: std::io::Error) -> DriverError {
        if self.root.join(MANIFEST_FILE).is_file() {
            DriverError::Io(e)
        } else {
            DriverError::connection(self.root.display().to_string(), e)
        }
    }

    /// Failures on a live handle are rejected operations.
    fn operation_error(&self, key: &CollectionKey, e: DriverError) -> DriverError {
        match e {
            DriverError::Io(e) => match self.classify(e) {
                DriverError::Io(e) => DriverError::StoreOperation(format!("{}: {}", key, e)),
                other => other,
            },
            DriverError::Serialization(msg) => {
                DriverError::StoreOperation(format!("{}: {}", key, msg))
            }
            other => other,
        }
    }

    fn lock_file(&self, paths: &CollectionPaths, exclusive: bool) -> Result<File> {
        // create_dir_all would otherwise resurrect a removed root
        self.ping()?;
        fs::create_dir_all(&paths.dir).map_err(|e| self.classify(e))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&paths.lock)
            .map_err(|e| self.classify(e))?;
        if exclusive {
            file.lock_exclusive()?;
        } else {
            file.lock_shared()?;
        }
        Ok(file)
    }

    fn read_documents(&self, path: &Path) -> Result<Vec<Document>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.classify(e)),
        };

        let mut docs = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let doc: Document = serde_json::from_str(&line).map_err(|e| {
                DriverError::Serialization(format!(
                    "{}:{}: {}",
                    path.display(),
                    line_no + 1,
                    e
                ))
            })?;
            docs.push(doc);
        }
        Ok(docs)
    }

    fn append_documents(&self, path: &Path, docs: &[Document]) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| self.classify(e))?;
        let mut writer = BufWriter::new(file);
        for doc in docs {
            serde_json::to_writer(&mut writer, doc)?;
            writer.write_all(b"\n")?;
        }
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_data()?;
        Ok(())
    }

    fn rewrite_documents(&self, paths: &CollectionPaths, docs: &[Document]) -> Result<()> {
        {
            let file = File::create(&paths.temp).map_err(|e| self.classify(e))?;
            let mut writer = BufWriter::new(file);
            for doc in docs {
                serde_json::to_writer(&mut writer, doc)?;
                writer.write_all(b"\n")?;
            }
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&paths.temp, &paths.data).map_err(|e| self.classify(e))?;
        Ok(())
    }

    /// Run a read-modify-rewrite cycle under the exclusive lock.
    fn modify<T>(
        &self,
        key: &CollectionKey,
        f: impl FnOnce(&mut Vec<Document>) -> (T, bool),
    ) -> Result<T> {
        let paths = self.paths(key)?;
        let _lock = self.lock_file(&paths, true)?;
        let mut docs = self.read_documents(&paths.data)?;
        let (outcome, changed) = f(&mut docs);
        if changed {
            self.rewrite_documents(&paths, &docs)?;
        }
        Ok(outcome)
    }
}

impl DocumentStore for FileStore {
    fn find(&self, key: &CollectionKey) -> Result<Vec<Document>> {
        let paths = self.paths(key)?;
        if !paths.data.exists() {
            self.ping()?;
            return Ok(Vec::new());
        }
        let _lock = self
            .lock_file(&paths, false)
            .map_err(|e| self.operation_error(key, e))?;
        self.read_documents(&paths.data)
            .map_err(|e| self.operation_error(key, e))
    }

    fn insert_many(&self, key: &CollectionKey, docs: Vec<Document>) -> Result<InsertOutcome> {
        let paths = self.paths(key)?;
        let result = self.lock_file(&paths, true).and_then(|_lock| {
            let mut existing = self.read_documents(&paths.data)?;
            let before = existing.len();
            let outcome = apply_insert(&mut existing, docs)?;
            self.append_documents(&paths.data, &existing[before..])?;
            Ok(outcome)
        });
        result.map_err(|e| self.operation_error(key, e))
    }

    fn update_one(
        &self,
        key: &CollectionKey,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<UpdateOutcome> {
        self.modify(key, |docs| {
            let outcome = apply_update(docs, filter, patch);
            let changed = outcome.modified_count > 0;
            (outcome, changed)
        })
        .map_err(|e| self.operation_error(key, e))
    }

    fn delete_one(&self, key: &CollectionKey, filter: &Filter) -> Result<DeleteOutcome> {
        self.modify(key, |docs| {
            let outcome = apply_delete(docs, filter, true);
            let changed = outcome.deleted_count > 0;
            (outcome, changed)
        })
        .map_err(|e| self.operation_error(key, e))
    }

    fn delete_many(&self, key: &CollectionKey, filter: &Filter) -> Result<DeleteOutcome> {
        self.modify(key, |docs| {
            let outcome = apply_delete(docs, filter, false);
            let changed = outcome.deleted_count > 0;
            (outcome, changed)
        })
        .map_err(|e| self.operation_error(key, e))
    }

    fn ping(&self) -> Result<()> {
        if self.root.join(MANIFEST_FILE).is_file() {
            Ok(())
        } else {
            Err(DriverError::connection(
                self.root.display().to_string(),
                "store root is no longer available",
            ))
        }
    }
}

/// Store and collection names become path components.
fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(DriverError::StoreOperation(format!(
            "invalid store or collection name {:?}",
            name
        )));
    }
    Ok(())
}
