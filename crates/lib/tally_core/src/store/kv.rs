//! Embedded key-value credential store.
//!
//! Ordered buckets (`users`, `refresh_tokens`) map string keys to
//! JSON-encoded values. A single write lock covers check-and-insert, which
//! gives atomic create-if-absent. With a backing file every committed write
//! rewrites the file through a temp file + rename, and the in-memory change
//! is rolled back if that fails.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{CredentialStore, Result, StoreError};
use crate::models::auth::{RefreshTokenRecord, User, UserUpdate};

/// Bucket holding user records keyed by user id.
pub const USERS_BUCKET: &str = "users";

/// Bucket holding refresh token records keyed by token id.
pub const TOKENS_BUCKET: &str = "refresh_tokens";

type Bucket = BTreeMap<String, String>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Buckets {
    buckets: BTreeMap<String, Bucket>,
}

impl Buckets {
    fn get<T: DeserializeOwned>(&self, bucket: &str, key: &str) -> Result<Option<T>> {
        self.buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|raw| serde_json::from_str(raw))
            .transpose()
            .map_err(StoreError::from)
    }

    fn contains(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .get(bucket)
            .is_some_and(|b| b.contains_key(key))
    }

    fn values<T: DeserializeOwned>(&self, bucket: &str) -> Result<Vec<T>> {
        match self.buckets.get(bucket) {
            None => Ok(Vec::new()),
            Some(b) => b
                .values()
                .map(|raw| serde_json::from_str(raw).map_err(StoreError::from))
                .collect(),
        }
    }

    /// Write `value` under `key`, returning the previous raw value.
    fn put_raw(&mut self, bucket: &str, key: &str, value: String) -> Option<String> {
        self.buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value)
    }

    fn restore(&mut self, bucket: &str, key: &str, previous: Option<String>) {
        let b = self.buckets.entry(bucket.to_string()).or_default();
        match previous {
            Some(v) => {
                b.insert(key.to_string(), v);
            }
            None => {
                b.remove(key);
            }
        }
    }
}

/// Embedded credential store.
#[derive(Debug)]
pub struct KvStore {
    db: RwLock<Buckets>,
    path: Option<PathBuf>,
}

impl KvStore {
    /// Creates a store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            db: RwLock::new(Buckets::default()),
            path: None,
        }
    }

    /// Opens (or creates) a store persisted at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let db = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Buckets::default(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), "opened embedded credential store");
        Ok(Self {
            db: RwLock::new(db),
            path: Some(path),
        })
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply a batch of writes and persist. All writes are rolled back if
    /// persisting fails.
    async fn commit(
        &self,
        db: &mut Buckets,
        writes: Vec<(&'static str, String, String)>,
    ) -> Result<()> {
        let mut undo = Vec::with_capacity(writes.len());
        for (bucket, key, value) in writes {
            let previous = db.put_raw(bucket, &key, value);
            undo.push((bucket, key, previous));
        }

        if let Err(e) = self.flush(db).await {
            for (bucket, key, previous) in undo.into_iter().rev() {
                db.restore(bucket, &key, previous);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Serialize under the caller's write lock, then write the file on the
    /// blocking pool. Holding the lock across the write keeps file order equal
    /// to commit order.
    async fn flush(&self, db: &Buckets) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(db)?;
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
        Ok(())
    }
}

/// Replace `path` with `bytes` through a synced temp file in the same
/// directory.
fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), bytes = bytes.len(), "flushed embedded credential store");
    Ok(())
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

#[async_trait]
impl CredentialStore for KvStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let mut db = self.db.write().await;
        if db.contains(USERS_BUCKET, &user.id) {
            return Err(StoreError::Exists);
        }
        let value = encode(user)?;
        self.commit(&mut db, vec![(USERS_BUCKET, user.id.clone(), value)])
            .await
    }

    async fn get_user(&self, id: &str) -> Result<User> {
        let db = self.db.read().await;
        db.get(USERS_BUCKET, id)?.ok_or(StoreError::NotFound)
    }

    async fn update_user(&self, update: &UserUpdate, now: DateTime<Utc>) -> Result<()> {
        let mut db = self.db.write().await;
        let mut user: User = db
            .get(USERS_BUCKET, &update.id)?
            .ok_or(StoreError::NotFound)?;

        if let Some(hash) = update.password_hash.as_ref().filter(|h| !h.is_empty()) {
            user.password_hash = hash.clone();
        }
        if let Some(config) = &update.config {
            user.config = Some(config.clone());
        }
        user.updated_at = now;

        let value = encode(&user)?;
        self.commit(&mut db, vec![(USERS_BUCKET, user.id.clone(), value)])
            .await
    }

    async fn create_token(&self, token: &RefreshTokenRecord) -> Result<()> {
        let mut db = self.db.write().await;
        if db.contains(TOKENS_BUCKET, &token.id) {
            return Err(StoreError::Exists);
        }
        let value = encode(token)?;
        self.commit(&mut db, vec![(TOKENS_BUCKET, token.id.clone(), value)])
            .await
    }

    async fn get_token(&self, id: &str) -> Result<RefreshTokenRecord> {
        let db = self.db.read().await;
        db.get::<RefreshTokenRecord>(TOKENS_BUCKET, id)?
            .filter(|t| t.revoked_at.is_none())
            .ok_or(StoreError::NotFound)
    }

    async fn delete_token(&self, id: &str, now: DateTime<Utc>) -> Result<RefreshTokenRecord> {
        let mut db = self.db.write().await;
        let live = db
            .get::<RefreshTokenRecord>(TOKENS_BUCKET, id)?
            .filter(|t| t.revoked_at.is_none())
            .ok_or(StoreError::NotFound)?;

        let revoked = RefreshTokenRecord {
            revoked_at: Some(now),
            ..live.clone()
        };
        let value = encode(&revoked)?;
        self.commit(&mut db, vec![(TOKENS_BUCKET, id.to_string(), value)])
            .await?;
        Ok(live)
    }

    async fn revoke_user_tokens(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let mut db = self.db.write().await;
        let writes = db
            .values::<RefreshTokenRecord>(TOKENS_BUCKET)?
            .into_iter()
            .filter(|t| t.claims.user_id == user_id && t.revoked_at.is_none())
            .map(|t| {
                let id = t.id.clone();
                let revoked = RefreshTokenRecord {
                    revoked_at: Some(now),
                    ..t
                };
                encode(&revoked).map(|value| (TOKENS_BUCKET, id, value))
            })
            .collect::<Result<Vec<_>>>()?;

        let count = writes.len() as u64;
        if count > 0 {
            self.commit(&mut db, writes).await?;
        }
        Ok(count)
    }
}
