use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::debug;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

const CURSOR_KEY: &str = "scan/cursor";
const NEXT_INDEX_KEY: &str = "keys/next_index";
const DB_FILE: &str = "wallet.db";

/// Progress of the block scanner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCursor {
    /// First height not yet scanned.
    pub next_height: u64,
    /// Chain tip as last reported by the node.
    pub tip_height: u64,
}

pub trait WalletStore: Send + Sync + 'static {
    fn put<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()>;
    fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>>;
    fn del(&self, key: &str) -> anyhow::Result<()>;
    /// Values whose key starts with `prefix`, in key order.
    fn list<T: DeserializeOwned>(&self, prefix: &str) -> anyhow::Result<Vec<T>>;
    /// Remove every key. Irreversible.
    fn purge(&self) -> anyhow::Result<()>;

    fn put_cursor(&self, c: ScanCursor) -> anyhow::Result<()> {
        self.put(CURSOR_KEY, &c)
    }

    fn get_cursor(&self) -> anyhow::Result<ScanCursor> {
        Ok(self.get(CURSOR_KEY)?.unwrap_or_default())
    }

    fn next_key_index(&self) -> anyhow::Result<u32> {
        Ok(self.get(NEXT_INDEX_KEY)?.unwrap_or(0))
    }

    fn set_next_key_index(&self, index: u32) -> anyhow::Result<()> {
        self.put(NEXT_INDEX_KEY, &index)
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    kv: parking_lot::RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn list_prefix<T: DeserializeOwned>(
    map: &BTreeMap<String, Vec<u8>>,
    prefix: &str,
) -> anyhow::Result<Vec<T>> {
    map.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| bincode::deserialize(v).with_context(|| format!("decode {k}")))
        .collect()
}

impl WalletStore for InMemoryStore {
    fn put<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let bytes = bincode::serialize(value)?;
        self.kv.write().insert(key.to_string(), bytes);
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        self.kv
            .read()
            .get(key)
            .map(|v| bincode::deserialize(v))
            .transpose()
            .map_err(Into::into)
    }

    fn del(&self, key: &str) -> anyhow::Result<()> {
        self.kv.write().remove(key);
        Ok(())
    }

    fn list<T: DeserializeOwned>(&self, prefix: &str) -> anyhow::Result<Vec<T>> {
        list_prefix(&self.kv.read(), prefix)
    }

    fn purge(&self) -> anyhow::Result<()> {
        self.kv.write().clear();
        Ok(())
    }
}

/// Key-value store snapshotted to `<dir>/wallet.db` after every write.
/// Snapshots go to a temp file first and are renamed into place, so a
/// crash leaves either the old or the new state on disk.
pub struct FileStore {
    path: PathBuf,
    kv: parking_lot::RwLock<BTreeMap<String, Vec<u8>>>,
}

impl FileStore {
    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(DB_FILE);
        let kv = if path.exists() {
            let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
            bincode::deserialize(&bytes).with_context(|| format!("decode {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        debug!("opened wallet store {}", path.display());
        Ok(Self {
            path,
            kv: parking_lot::RwLock::new(kv),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, map: &BTreeMap<String, Vec<u8>>) -> anyhow::Result<()> {
        let bytes = bincode::serialize(map)?;
        let tmp = self.path.with_extension("db.tmp");
        {
            let mut file =
                fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename into {}", self.path.display()))?;
        Ok(())
    }
}

impl WalletStore for FileStore {
    fn put<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let bytes = bincode::serialize(value)?;
        let mut map = self.kv.write();
        let previous = map.insert(key.to_string(), bytes);
        if let Err(err) = self.flush(&map) {
            match previous {
                Some(old) => map.insert(key.to_string(), old),
                None => map.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        self.kv
            .read()
            .get(key)
            .map(|v| bincode::deserialize(v))
            .transpose()
            .map_err(Into::into)
    }

    fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut map = self.kv.write();
        if let Some(old) = map.remove(key) {
            if let Err(err) = self.flush(&map) {
                map.insert(key.to_string(), old);
                return Err(err);
            }
        }
        Ok(())
    }

    fn list<T: DeserializeOwned>(&self, prefix: &str) -> anyhow::Result<Vec<T>> {
        list_prefix(&self.kv.read(), prefix)
    }

    fn purge(&self) -> anyhow::Result<()> {
        let mut map = self.kv.write();
        map.clear();
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("remove {}", self.path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_returns_prefix_in_key_order() {
        let store = InMemoryStore::new();
        store.put("out/b", &2u64).unwrap();
        store.put("out/a", &1u64).unwrap();
        store.put("outx", &9u64).unwrap();
        store.put("slate/a", &3u64).unwrap();
        let values: Vec<u64> = store.list("out/").unwrap();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn cursor_and_key_index_default_to_zero() {
        let store = InMemoryStore::new();
        assert_eq!(store.get_cursor().unwrap(), ScanCursor::default());
        assert_eq!(store.next_key_index().unwrap(), 0);
        store.set_next_key_index(4).unwrap();
        assert_eq!(store.next_key_index().unwrap(), 4);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.put("k", &"v".to_string()).unwrap();
            store
                .put_cursor(ScanCursor {
                    next_height: 11,
                    tip_height: 20,
                })
                .unwrap();
            store.put("gone", &1u8).unwrap();
            store.del("gone").unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get::<String>("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.get_cursor().unwrap().next_height, 11);
        assert!(store.get::<u8>("gone").unwrap().is_none());
    }

    #[test]
    fn purge_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.put("k", &1u32).unwrap();
        assert!(store.path().exists());
        store.purge().unwrap();
        assert!(!store.path().exists());
        assert!(store.get::<u32>("k").unwrap().is_none());
    }
}
