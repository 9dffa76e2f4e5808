//! The consumed storage interface.

use async_trait::async_trait;

use crate::KvResult;

/// Flat KV namespace provided by the host.
///
/// Keys are `/`-separated paths. Every write the plugin performs may race
/// with other holders of the same namespace, so callers must not assume
/// read-modify-write cycles are atomic.
#[async_trait]
pub trait KvStorage: Send + Sync + 'static {
    /// Reads the value stored under `key`, if any.
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<()>;

    /// Removes the value stored under `key`.  Removing a missing key is not
    /// an error.
    async fn delete(&self, key: &str) -> KvResult<()>;

    /// Lists the key suffixes stored under `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> KvResult<Vec<String>>;
}
