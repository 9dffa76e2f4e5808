//! In-memory storage used by tests and embedded deployments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{KvResult, KvStorage};

/// In-memory [`KvStorage`] over an ordered map, so prefix listing comes out
/// sorted for free.
#[derive(Debug, Default)]
pub struct MemKv {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KvStorage for MemKv {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<()> {
        self.entries.write().await.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> KvResult<Vec<String>> {
        let entries = self.entries.read().await;
        let suffixes = entries
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k[prefix.len()..].to_owned())
            .collect();
        Ok(suffixes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let kv = MemKv::new();
        kv.put("a/b", b"v1".to_vec()).await.unwrap();
        assert_eq!(kv.get("a/b").await.unwrap(), Some(b"v1".to_vec()));

        kv.put("a/b", b"v2".to_vec()).await.unwrap();
        assert_eq!(kv.get("a/b").await.unwrap(), Some(b"v2".to_vec()));

        kv.delete("a/b").await.unwrap();
        assert_eq!(kv.get("a/b").await.unwrap(), None);

        // deleting again is fine
        kv.delete("a/b").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_returns_sorted_suffixes() {
        let kv = MemKv::new();
        kv.put("task/queued/b", vec![]).await.unwrap();
        kv.put("task/queued/a", vec![]).await.unwrap();
        kv.put("task/running/c", vec![]).await.unwrap();
        kv.put("other", vec![]).await.unwrap();

        let listed = kv.list("task/queued/").await.unwrap();
        assert_eq!(listed, vec!["a".to_owned(), "b".to_owned()]);

        let listed = kv.list("task/").await.unwrap();
        assert_eq!(
            listed,
            vec!["queued/a".to_owned(), "queued/b".to_owned(), "running/c".to_owned()]
        );

        assert!(kv.list("missing/").await.unwrap().is_empty());
    }
}
