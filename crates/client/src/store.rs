//! Local key-value persistence for client-held state.
//!
//! The cart, recently viewed list, liked books and queued favorite syncs are
//! kept under fixed keys as JSON values. [`MemoryStore`] keeps them for the
//! life of the process; [`FileStore`] writes every change through to a JSON
//! object file so state survives restarts.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Cart contents (book snapshots).
pub const CART_KEY: &str = "cart";
/// Recently viewed book ids, most recent last.
pub const RECENTLY_VIEWED_KEY: &str = "recentlyViewed";
/// Liked book ids.
pub const LIKED_BOOKS_KEY: &str = "likedBooks";
/// Favorite changes that could not be sent to the server yet.
pub const PENDING_FAVORITES_KEY: &str = "pendingFavorites";

/// Errors reading or writing local state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A string-keyed store of JSON values.
pub trait LocalStore: Send + Sync {
    /// Read the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the change cannot be persisted.
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Replace the value under `key` with what `change` returns for the
    /// current value, with no other write to the store in between. `None`
    /// removes the key. `change` is called exactly once; an error from it
    /// leaves the store untouched.
    ///
    /// # Errors
    ///
    /// Returns the error from `change`, or an error if the change cannot be
    /// persisted.
    fn update(
        &self,
        key: &str,
        change: &mut dyn FnMut(Option<Value>) -> Result<Option<Value>, StoreError>,
    ) -> Result<(), StoreError>;

    /// Drop the value under `key`. Missing keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the change cannot be persisted.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Drop every key.
    ///
    /// # Errors
    ///
    /// Returns an error if the change cannot be persisted.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Read and decode the value under `key`, falling back to the default.
///
/// A value that no longer decodes (an older layout, a hand-edited file) is
/// logged and treated as absent.
///
/// # Errors
///
/// Returns an error only if the store itself cannot be read.
pub fn load<T>(store: &dyn LocalStore, key: &str) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    Ok(decode_or_default(key, store.get(key)?))
}

fn decode_or_default<T>(key: &str, value: Option<Value>) -> T
where
    T: DeserializeOwned + Default,
{
    let Some(value) = value else {
        return T::default();
    };

    serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::warn!(key, error = %e, "Discarding unreadable local state");
        T::default()
    })
}

/// Decode the value under `key`, let `change` edit it, and store the result,
/// all under one [`LocalStore::update`]. Returns what `change` returns.
///
/// Concurrent `modify` calls on the same store never lose each other's
/// edits.
///
/// # Errors
///
/// Returns an error if encoding or persisting fails.
pub fn modify<T, R>(
    store: &dyn LocalStore,
    key: &str,
    change: impl FnOnce(&mut T) -> R,
) -> Result<R, StoreError>
where
    T: Serialize + DeserializeOwned + Default,
    R: Default,
{
    let mut change = Some(change);
    let mut outcome = R::default();

    store.update(key, &mut |current: Option<Value>| -> Result<Option<Value>, StoreError> {
        let mut value: T = decode_or_default(key, current);
        if let Some(change) = change.take() {
            outcome = change(&mut value);
        }
        Ok(Some(serde_json::to_value(&value)?))
    })?;

    Ok(outcome)
}

/// Encode `value` and store it under `key`.
///
/// # Errors
///
/// Returns an error if encoding or persisting fails.
pub fn save<T: Serialize + ?Sized>(
    store: &dyn LocalStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.set(key, serde_json::to_value(value)?)
}

type Entries = BTreeMap<String, Value>;

fn lock(entries: &Mutex<Entries>) -> MutexGuard<'_, Entries> {
    // A panic mid-update leaves a map that is still structurally valid.
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

fn replace(
    entries: &mut Entries,
    key: &str,
    change: &mut dyn FnMut(Option<Value>) -> Result<Option<Value>, StoreError>,
) -> Result<(), StoreError> {
    match change(entries.get(key).cloned())? {
        Some(value) => {
            entries.insert(key.to_owned(), value);
        }
        None => {
            entries.remove(key);
        }
    }
    Ok(())
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-process store; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        lock(&self.entries).insert(key.to_owned(), value);
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        change: &mut dyn FnMut(Option<Value>) -> Result<Option<Value>, StoreError>,
    ) -> Result<(), StoreError> {
        replace(&mut lock(&self.entries), key, change)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        lock(&self.entries).clear();
        Ok(())
    }
}

// =============================================================================
// FileStore
// =============================================================================

/// Store backed by a single JSON object file.
///
/// The whole file is read once on open and rewritten after every change via
/// a temporary file and rename, so a crash never leaves a half-written file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// A missing file opens as an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or is not a
    /// JSON object.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Entries::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Entries::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "Opened local store");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &Entries) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Edit the entries and write them out while holding the lock.
    fn apply(
        &self,
        change: impl FnOnce(&mut Entries) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        change(&mut entries)?;
        self.persist(&entries)
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.apply(|entries| {
            entries.insert(key.to_owned(), value);
            Ok(())
        })
    }

    fn update(
        &self,
        key: &str,
        change: &mut dyn FnMut(Option<Value>) -> Result<Option<Value>, StoreError>,
    ) -> Result<(), StoreError> {
        self.apply(|entries| replace(entries, key, change))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.apply(|entries| {
            entries.remove(key);
            Ok(())
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.apply(|entries| {
            entries.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("bazaar-store-{}", uuid::Uuid::new_v4().simple()))
            .join("state.json")
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get(CART_KEY).unwrap().is_none());

        store.set(CART_KEY, json!([1, 2])).unwrap();
        assert_eq!(store.get(CART_KEY).unwrap(), Some(json!([1, 2])));

        store.remove(CART_KEY).unwrap();
        store.remove(CART_KEY).unwrap();
        assert!(store.get(CART_KEY).unwrap().is_none());
    }

    #[test]
    fn test_load_defaults_when_missing_or_corrupt() {
        let store = MemoryStore::new();
        let ids: Vec<String> = load(&store, LIKED_BOOKS_KEY).unwrap();
        assert!(ids.is_empty());

        store.set(LIKED_BOOKS_KEY, json!({"not": "a list"})).unwrap();
        let ids: Vec<String> = load(&store, LIKED_BOOKS_KEY).unwrap();
        assert!(ids.is_empty());

        save(&store, LIKED_BOOKS_KEY, &["a", "b"]).unwrap();
        let ids: Vec<String> = load(&store, LIKED_BOOKS_KEY).unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    fn append_concurrently(store: &dyn LocalStore) {
        std::thread::scope(|scope| {
            for thread in 0..8u32 {
                scope.spawn(move || {
                    for n in 0..20u32 {
                        modify(store, CART_KEY, |items: &mut Vec<u32>| items.push(thread * 100 + n))
                            .unwrap();
                    }
                });
            }
        });
    }

    #[test]
    fn test_modify_keeps_concurrent_edits() {
        let store = MemoryStore::new();
        append_concurrently(&store);

        let mut items: Vec<u32> = load(&store, CART_KEY).unwrap();
        assert_eq!(items.len(), 160);
        items.sort_unstable();
        items.dedup();
        assert_eq!(items.len(), 160);
    }

    #[test]
    fn test_file_store_modify_keeps_concurrent_edits() {
        let path = temp_path();
        append_concurrently(&FileStore::open(&path).unwrap());

        let items: Vec<u32> = load(&FileStore::open(&path).unwrap(), CART_KEY).unwrap();
        assert_eq!(items.len(), 160);

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_modify_returns_outcome_and_recovers_corrupt_value() {
        let store = MemoryStore::new();
        store.set(LIKED_BOOKS_KEY, json!("garbage")).unwrap();

        let len = modify(&store, LIKED_BOOKS_KEY, |ids: &mut Vec<String>| {
            ids.push("a".to_owned());
            ids.len()
        })
        .unwrap();

        assert_eq!(len, 1);
        assert_eq!(store.get(LIKED_BOOKS_KEY).unwrap(), Some(json!(["a"])));
    }

    #[test]
    fn test_update_none_removes_key() {
        let store = MemoryStore::new();
        store.set(CART_KEY, json!([1])).unwrap();

        store
            .update(CART_KEY, &mut |current: Option<Value>| -> Result<Option<Value>, StoreError> {
                assert_eq!(current, Some(json!([1])));
                Ok(None)
            })
            .unwrap();

        assert!(store.get(CART_KEY).unwrap().is_none());
    }

    #[test]
    fn test_file_store_persists_across_opens() {
        let path = temp_path();

        let store = FileStore::open(&path).unwrap();
        store.set(RECENTLY_VIEWED_KEY, json!(["x"])).unwrap();
        store.set(CART_KEY, json!([])).unwrap();
        store.remove(CART_KEY).unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(RECENTLY_VIEWED_KEY).unwrap(), Some(json!(["x"])));
        assert!(reopened.get(CART_KEY).unwrap().is_none());

        reopened.clear().unwrap();
        let cleared = FileStore::open(&path).unwrap();
        assert!(cleared.get(RECENTLY_VIEWED_KEY).unwrap().is_none());

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_file_store_rejects_non_object_file() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(matches!(FileStore::open(&path), Err(StoreError::Json(_))));

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
