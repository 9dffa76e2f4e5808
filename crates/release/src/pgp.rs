//! Trusted PGP public key storage.
//!
//! Keys the operator trusts for tag-signature verification are persisted
//! under their own prefix; the release endpoint loads the full set on every
//! submission.

use std::sync::Arc;

use relforge_kv::KvStorage;

use crate::ReleaseResult;

/// Storage prefix for trusted PGP public keys, one entry per key id.
pub const STORAGE_KEY_PREFIX_TRUSTED_PGP_PUBLIC_KEY: &str = "trusted_pgp_public_key/";

/// Loads every trusted PGP public key body, in key-id order.
pub async fn list_trusted_pgp_public_keys(
    storage: &Arc<dyn KvStorage>,
) -> ReleaseResult<Vec<String>> {
    let ids = storage
        .list(STORAGE_KEY_PREFIX_TRUSTED_PGP_PUBLIC_KEY)
        .await?;

    let mut keys = Vec::with_capacity(ids.len());
    for id in ids {
        let key = format!("{STORAGE_KEY_PREFIX_TRUSTED_PGP_PUBLIC_KEY}{id}");
        if let Some(data) = storage.get(&key).await? {
            keys.push(String::from_utf8_lossy(&data).into_owned());
        }
    }

    Ok(keys)
}

/// Stores (or replaces) a trusted PGP public key under `id`.
pub async fn put_trusted_pgp_public_key(
    storage: &Arc<dyn KvStorage>,
    id: &str,
    body: &str,
) -> ReleaseResult<()> {
    let key = format!("{STORAGE_KEY_PREFIX_TRUSTED_PGP_PUBLIC_KEY}{id}");
    storage.put(&key, body.as_bytes().to_vec()).await?;
    Ok(())
}
