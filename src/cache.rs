//! Persistent cache for decoded metadata and contexts.
//!
//! Decoding the metadata and scanning the memory image of a large game takes a noticeable amount
//! of time, and neither changes between launches. Results are stored as JSON records under fixed
//! keys. Every record carries the SHA-1 digest of the metadata blob and the sorted assembly
//! allow-list it was built for; a record built for anything else is ignored.

use std::{
    collections::HashMap,
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::Result;

/// Key of the metadata record.
pub const METADATA_KEY: &str = "metadata";
/// Key of the context record.
pub const CONTEXT_KEY: &str = "context";
/// Name of the store directory inside the cache directory.
pub const STORE_NAME: &str = "webmodkit";

/// A string key-value store.
pub trait CacheStore: Send {
    /// The value stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    fn put(&mut self, key: &str, value: &str) -> Result<()>;

    /// Remove every value.
    ///
    /// # Errors
    /// Returns an error if the store cannot be cleared.
    fn clear(&mut self) -> Result<()>;
}

/// A store keeping one JSON file per key in `<dir>/webmodkit/`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create, if needed) the store below `dir`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<FileStore> {
        let root = dir.as_ref().join(STORE_NAME);
        fs::create_dir_all(&root)?;
        Ok(FileStore { root })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl CacheStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        fs::write(self.path(key), value)?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|extension| extension == "json") {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// A store living in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.values.clear();
        Ok(())
    }
}

/// Lower-case hex SHA-1 digest of `data`.
#[must_use]
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// What a record was built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    /// [`content_hash`] of the metadata blob
    pub integrity_hash: String,
    /// Sorted assembly allow-list
    pub referenced_assemblies: Vec<String>,
}

impl CacheKey {
    /// Key for a metadata blob and an allow-list in any order.
    pub fn new<S: AsRef<str>>(metadata: &[u8], allow_list: &[S]) -> Self {
        let mut referenced_assemblies: Vec<String> =
            allow_list.iter().map(|name| name.as_ref().to_string()).collect();
        referenced_assemblies.sort();
        CacheKey {
            integrity_hash: content_hash(metadata),
            referenced_assemblies,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Record<T> {
    #[serde(flatten)]
    key: CacheKey,
    value: T,
}

/// Load the record under `name` if it was built for `key`.
///
/// A missing or mismatching record yields `Ok(None)`.
///
/// # Errors
/// Returns an error if the store cannot be read or the record cannot be decoded.
pub fn load<T: DeserializeOwned>(store: &dyn CacheStore, name: &str, key: &CacheKey) -> Result<Option<T>> {
    let Some(json) = store.get(name)? else {
        debug!("No cached {name} record");
        return Ok(None);
    };

    let record: Record<T> = serde_json::from_str(&json)?;
    if record.key != *key {
        warn!("Cached {name} record is stale, rebuilding");
        return Ok(None);
    }
    Ok(Some(record.value))
}

/// Store `value` under `name` for `key`.
///
/// # Errors
/// Returns an error if the value cannot be encoded or the store cannot be written.
pub fn save<T: Serialize>(store: &mut dyn CacheStore, name: &str, key: &CacheKey, value: &T) -> Result<()> {
    #[derive(Serialize)]
    struct RecordRef<'a, T> {
        #[serde(flatten)]
        key: &'a CacheKey,
        value: &'a T,
    }

    let json = serde_json::to_string(&RecordRef { key, value })?;
    store.put(name, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn hash() {
        assert_eq!(content_hash(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn key_sorts_allow_list() {
        let a = CacheKey::new(b"blob", &["b.dll", "a.dll"]);
        let b = CacheKey::new(b"blob", &["a.dll", "b.dll"]);
        assert_eq!(a, b);
        assert_ne!(a, CacheKey::new(b"other", &["a.dll", "b.dll"]));
    }

    #[test]
    fn memory_store_records() {
        let mut store = MemoryStore::new();
        let key = CacheKey::new(b"blob", &["a.dll"]);
        save(&mut store, METADATA_KEY, &key, &vec![1u32, 2, 3]).unwrap();

        let loaded: Option<Vec<u32>> = load(&store, METADATA_KEY, &key).unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));

        let stale = CacheKey::new(b"blob", &["a.dll", "b.dll"]);
        let loaded: Option<Vec<u32>> = load(&store, METADATA_KEY, &stale).unwrap();
        assert_eq!(loaded, None);

        let missing: Option<Vec<u32>> = load(&store, CONTEXT_KEY, &key).unwrap();
        assert_eq!(missing, None);

        store.clear().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn unreadable_record() {
        let mut store = MemoryStore::new();
        store.put(METADATA_KEY, "{ not json").unwrap();
        let key = CacheKey::new(b"blob", &["a.dll"]);
        let result: Result<Option<u32>> = load(&store, METADATA_KEY, &key);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn file_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get(CONTEXT_KEY).unwrap(), None);

        store.put(CONTEXT_KEY, "{}").unwrap();
        assert_eq!(store.get(CONTEXT_KEY).unwrap().as_deref(), Some("{}"));
        assert!(dir.path().join(STORE_NAME).join("context.json").exists());

        // A reopened store sees the same values.
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(CONTEXT_KEY).unwrap().as_deref(), Some("{}"));

        store.clear().unwrap();
        assert_eq!(store.get(CONTEXT_KEY).unwrap(), None);
    }
}
