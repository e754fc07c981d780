//! Blob store and identity collaborator implementations

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;
use wtm_common::{BlobStore, DeviceIdentity, Error, IdentityProvider, Result};

/// Sled-backed namespaced blob store
///
/// Keys are stored as `{namespace}/{key}`; values are opaque bytes.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| Error::Storage(format!("failed to open blob store: {e}")))?;
        info!("Blob store opened at {}", path.display());
        Ok(SledStore { db })
    }

    fn full_key(namespace: &str, key: &str) -> String {
        format!("{namespace}/{key}")
    }
}

#[async_trait]
impl BlobStore for SledStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.db
            .get(Self::full_key(namespace, key))
            .map(|v| v.map(|ivec| ivec.to_vec()))
            .map_err(|e| Error::Storage(format!("get failed: {e}")))
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<()> {
        self.db
            .insert(Self::full_key(namespace, key), value)
            .map(|_| ())
            .map_err(|e| Error::Storage(format!("put failed: {e}")))
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        self.db
            .remove(Self::full_key(namespace, key))
            .map(|_| ())
            .map_err(|e| Error::Storage(format!("delete failed: {e}")))
    }

    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<String>> {
        let scan = Self::full_key(namespace, prefix);
        let strip = format!("{namespace}/");
        let mut keys = Vec::new();
        for entry in self.db.scan_prefix(scan) {
            let (key, _) = entry.map_err(|e| Error::Storage(format!("list failed: {e}")))?;
            if let Ok(key) = std::str::from_utf8(&key) {
                if let Some(bare) = key.strip_prefix(&strip) {
                    keys.push(bare.to_string());
                }
            }
        }
        Ok(keys)
    }
}

/// In-memory blob store for tests and storeless deployments
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(&format!("{namespace}/{key}")).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<()> {
        self.blobs
            .write()
            .await
            .insert(format!("{namespace}/{key}"), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        self.blobs.write().await.remove(&format!("{namespace}/{key}"));
        Ok(())
    }

    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<String>> {
        let scan = format!("{namespace}/{prefix}");
        let strip = format!("{namespace}/");
        Ok(self
            .blobs
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(&scan))
            .filter_map(|k| k.strip_prefix(&strip).map(|s| s.to_string()))
            .collect())
    }
}

/// Identity provider backed by a static table
///
/// Stands in when no identity collaborator is wired up; lookups miss
/// softly and callers fall back to the MAC.
#[derive(Default)]
pub struct StaticIdentityProvider {
    identities: RwLock<HashMap<String, DeviceIdentity>>,
}

impl StaticIdentityProvider {
    pub async fn insert(&self, identity: DeviceIdentity) {
        self.identities
            .write()
            .await
            .insert(identity.mac.clone(), identity);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn device_identity(&self, mac: &str) -> Result<Option<DeviceIdentity>> {
        Ok(self.identities.read().await.get(mac).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryStore::default();
        store.put("sessions", "s-1", b"one".to_vec()).await.unwrap();
        store.put("sessions", "s-2", b"two".to_vec()).await.unwrap();
        store.put("alerts", "a-1", b"three".to_vec()).await.unwrap();

        assert_eq!(store.get("sessions", "s-1").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get("sessions", "missing").await.unwrap(), None);

        let mut keys = store.list("sessions", "s-").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["s-1".to_string(), "s-2".to_string()]);

        store.delete("sessions", "s-1").await.unwrap();
        assert_eq!(store.get("sessions", "s-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sled_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store.put("anomalies", "c-1", b"case".to_vec()).await.unwrap();
        assert_eq!(store.get("anomalies", "c-1").await.unwrap(), Some(b"case".to_vec()));

        let keys = store.list("anomalies", "c").await.unwrap();
        assert_eq!(keys, vec!["c-1".to_string()]);

        store.delete("anomalies", "c-1").await.unwrap();
        assert_eq!(store.get("anomalies", "c-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn static_identity_lookup() {
        let provider = StaticIdentityProvider::default();
        provider
            .insert(DeviceIdentity {
                mac: "aa:bb:cc:dd:ee:01".to_string(),
                friendly_name: "Kitchen Tablet".to_string(),
                ..DeviceIdentity::default()
            })
            .await;

        let hit = provider.device_identity("aa:bb:cc:dd:ee:01").await.unwrap();
        assert_eq!(hit.unwrap().friendly_name, "Kitchen Tablet");
        assert!(provider.device_identity("ff:ff:ff:ff:ff:ff").await.unwrap().is_none());
    }
}
