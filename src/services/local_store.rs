//! Local content-addressed object backend and its connection pool.
//!
//! Payloads live on disk beneath
//! `base_path/{container}/{id[0..2]}/{id[2..4]}/{id}`; object headers and
//! attributes live in SQLite. The object id is a SHA-256 over the header and
//! the payload digest, so identical uploads into the same container collapse
//! into one object.

use crate::{
    models::{
        ids::{ContainerId, ObjectId, OwnerId},
        object::ObjectHeader,
        token::SessionToken,
    },
    services::pool::{
        ConnectionPool, Lease, ObjectClient, Payload, PoolError, PoolStatus, PutObject,
        StoreError,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Semaphore,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared state behind every local connection.
#[derive(Clone)]
pub struct LocalStore {
    /// SQLite pool holding object headers and attributes.
    pub db: Arc<SqlitePool>,

    /// Root directory for payloads.
    pub base_path: PathBuf,

    max_object_size: u64,

    /// Spent session ids with their expiry. Expired entries are pruned on
    /// every claim since `authorize` already rejects expired sessions.
    used_sessions: Arc<Mutex<HashMap<Uuid, DateTime<Utc>>>>,
}

impl LocalStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, max_object_size: u64) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            max_object_size,
            used_sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    fn object_path(&self, container: &ContainerId, object: &ObjectId) -> PathBuf {
        let id = object.to_string();
        let mut path = self.base_path.join(container.to_string());
        path.push(&id[0..2]);
        path.push(&id[2..4]);
        path.push(&id);
        path
    }

    /// Session and bearer checks. The acting owner must be the bearer issuer
    /// when a bearer is present, and the session owner otherwise.
    fn authorize(&self, request: &PutObject<'_>, now: DateTime<Utc>) -> StoreResult<()> {
        if request.session.is_expired(now) {
            return Err(StoreError::Forbidden("session token expired".into()));
        }
        let expected = match request.bearer {
            Some(bearer) if bearer.is_expired(now) => {
                return Err(StoreError::Forbidden("bearer token expired".into()));
            }
            Some(bearer) => bearer.issuer(),
            None => &request.session.owner_id,
        };
        if &request.header.owner_id != expected {
            return Err(StoreError::Forbidden(format!(
                "owner `{}` is not authorized by the presented tokens",
                request.header.owner_id
            )));
        }
        Ok(())
    }

    /// Mark a session as spent. Each session authorizes one operation.
    fn claim_session(&self, session: &SessionToken, now: DateTime<Utc>) -> StoreResult<()> {
        let mut used = self
            .used_sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        used.retain(|_, expires_at| *expires_at > now);
        if used.insert(session.id, session.expires_at).is_some() {
            return Err(StoreError::Forbidden(format!(
                "session {} was already used",
                session.id
            )));
        }
        Ok(())
    }

    /// Stream the payload into `path`, hashing as it goes.
    async fn write_payload(&self, path: &Path, payload: &mut Payload) -> StoreResult<(u64, [u8; 32])> {
        let mut file = File::create(path).await?;
        let mut size: u64 = 0;
        let mut digest = Sha256::new();

        while let Some(chunk) = payload.next().await {
            let chunk = chunk.map_err(StoreError::Payload)?;
            size += chunk.len() as u64;
            if size > self.max_object_size {
                return Err(StoreError::PayloadTooLarge {
                    limit: self.max_object_size,
                });
            }
            digest.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok((size, digest.finalize().into()))
    }

    /// Stream-upload an object and record its header.
    ///
    /// - Writes the payload to a temporary file while computing SHA-256.
    /// - Derives the object id and renames into the final location.
    /// - Inserts header and attributes in one transaction.
    ///
    /// Temporary files are removed on every failure path.
    pub async fn put_object(&self, request: PutObject<'_>) -> StoreResult<ObjectId> {
        let now = Utc::now();
        self.authorize(&request, now)?;
        self.claim_session(request.session, now)?;

        let header = &request.header;
        let container_root = self.base_path.join(header.container_id.to_string());
        fs::create_dir_all(&container_root).await?;
        let tmp_path = container_root.join(format!(".tmp-{}", Uuid::new_v4()));

        let (size, payload_hash) = match self.write_payload(&tmp_path, request.payload).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        let object_id = object_id_for(header, &payload_hash);
        let file_path = self.object_path(&header.container_id, &object_id);
        let created_parent = match file_path.parent() {
            Some(parent) => fs::create_dir_all(parent).await,
            None => Err(io::Error::other("object path missing parent directory")),
        };
        if let Err(err) = created_parent {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        // An identical object already owns this path; keep its payload.
        let created = match fs::try_exists(&file_path).await {
            Ok(true) => {
                let _ = fs::remove_file(&tmp_path).await;
                false
            }
            Ok(false) => {
                if let Err(err) = fs::rename(&tmp_path, &file_path).await {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
                true
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        };

        if let Err(err) = self
            .insert_header(&object_id, header, size, &payload_hash, request.session)
            .await
        {
            if created {
                let _ = fs::remove_file(&file_path).await;
            }
            return Err(err);
        }

        debug!(object = %object_id, size, "stored object payload");
        Ok(object_id)
    }

    async fn insert_header(
        &self,
        object_id: &ObjectId,
        header: &ObjectHeader,
        size: u64,
        payload_hash: &[u8; 32],
        session: &SessionToken,
    ) -> StoreResult<()> {
        let id = object_id.to_string();
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO objects (id, container_id, owner_id, payload_size, payload_hash, session_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&id)
        .bind(header.container_id.to_string())
        .bind(header.owner_id.as_str())
        .bind(size as i64)
        .bind(hex::encode(payload_hash))
        .bind(session.id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            debug!(object = %id, "object already stored");
        } else {
            for (position, attribute) in header.attributes.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO object_attributes (object_id, position, key, value)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(position as i64)
                .bind(&attribute.key)
                .bind(&attribute.value)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Read back a stored header and its attributes in insertion order.
    #[cfg(test)]
    pub async fn head_object(
        &self,
        object_id: &ObjectId,
    ) -> StoreResult<(
        crate::models::object::StoredObject,
        Vec<crate::models::object::Attribute>,
    )> {
        let id = object_id.to_string();
        let object = sqlx::query_as::<_, crate::models::object::StoredObject>(
            "SELECT id, container_id, owner_id, payload_size, payload_hash, session_id, created_at
             FROM objects WHERE id = ?",
        )
        .bind(&id)
        .fetch_one(&*self.db)
        .await?;
        let attributes = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM object_attributes WHERE object_id = ? ORDER BY position",
        )
        .bind(&id)
        .fetch_all(&*self.db)
        .await?
        .into_iter()
        .map(|(k, v)| crate::models::object::Attribute::new(k, v))
        .collect();
        Ok((object, attributes))
    }
}

/// Object id: SHA-256 over a length-prefixed encoding of the header followed
/// by the payload digest.
fn object_id_for(header: &ObjectHeader, payload_hash: &[u8; 32]) -> ObjectId {
    fn field(digest: &mut Sha256, bytes: &[u8]) {
        digest.update((bytes.len() as u64).to_be_bytes());
        digest.update(bytes);
    }

    let mut digest = Sha256::new();
    field(&mut digest, header.container_id.to_string().as_bytes());
    field(&mut digest, header.owner_id.as_str().as_bytes());
    digest.update((header.attributes.len() as u64).to_be_bytes());
    for attribute in &header.attributes {
        field(&mut digest, attribute.key.as_bytes());
        field(&mut digest, attribute.value.as_bytes());
    }
    digest.update(payload_hash);
    ObjectId::from_bytes(digest.finalize().into())
}

/// One connection of the local pool.
pub struct LocalClient {
    index: usize,
    store: LocalStore,
}

#[async_trait]
impl ObjectClient for LocalClient {
    async fn put_object(&self, request: PutObject<'_>) -> Result<ObjectId, StoreError> {
        debug!(connection = self.index, session = %request.session.id, "put object");
        self.store.put_object(request).await
    }
}

#[derive(Clone, Debug)]
pub struct LocalPoolOptions {
    pub owner_id: OwnerId,
    pub connections: usize,
    pub max_leases: usize,
    pub lease_timeout: Duration,
    pub session_lifetime: chrono::Duration,
}

/// Round-robin pool over local connections.
pub struct LocalPool {
    clients: Vec<Arc<LocalClient>>,
    healthy: Vec<AtomicBool>,
    next: AtomicUsize,
    closed: AtomicBool,
    permits: Arc<Semaphore>,
    options: LocalPoolOptions,
}

impl LocalPool {
    pub fn new(store: LocalStore, options: LocalPoolOptions) -> Self {
        let connections = options.connections.max(1);
        let clients = (0..connections)
            .map(|index| {
                Arc::new(LocalClient {
                    index,
                    store: store.clone(),
                })
            })
            .collect();
        let healthy = (0..connections).map(|_| AtomicBool::new(true)).collect();
        Self {
            clients,
            healthy,
            next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            permits: Arc::new(Semaphore::new(options.max_leases.max(1))),
            options,
        }
    }

    /// Mark a connection healthy or unhealthy. Out-of-range indices are ignored.
    pub fn set_healthy(&self, index: usize, healthy: bool) {
        if let Some(flag) = self.healthy.get(index) {
            flag.store(healthy, Ordering::SeqCst);
            if !healthy {
                warn!(connection = index, "connection marked unhealthy");
            }
        }
    }

    /// Stop handing out leases. Leases already taken stay valid.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
    }

    fn next_healthy(&self) -> Option<Arc<LocalClient>> {
        let n = self.clients.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&i| self.healthy[i].load(Ordering::SeqCst))
            .map(|i| self.clients[i].clone())
    }
}

#[async_trait]
impl ConnectionPool for LocalPool {
    async fn connection(&self) -> Result<Lease, PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }
        let timeout = self.options.lease_timeout;
        let permit = tokio::time::timeout(timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| PoolError::Timeout(timeout))?
            .map_err(|_| PoolError::Closed)?;
        let client = self.next_healthy().ok_or(PoolError::NoHealthyConnection)?;
        let session =
            SessionToken::issue(self.options.owner_id.clone(), self.options.session_lifetime);

        Ok(Lease::new(client, session).with_permit(permit))
    }

    fn owner_id(&self) -> &OwnerId {
        &self.options.owner_id
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            open: !self.closed.load(Ordering::SeqCst),
            total: self.clients.len(),
            healthy: self
                .healthy
                .iter()
                .filter(|h| h.load(Ordering::SeqCst))
                .count(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    pub async fn memory_store(base_path: &Path, max_object_size: u64) -> LocalStore {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = LocalStore::new(Arc::new(db), base_path, max_object_size);
        store.migrate().await.unwrap();
        store
    }

    pub fn pool_options(connections: usize, max_leases: usize) -> LocalPoolOptions {
        LocalPoolOptions {
            owner_id: "gateway".parse().unwrap(),
            connections,
            max_leases,
            lease_timeout: Duration::from_millis(50),
            session_lifetime: chrono::Duration::seconds(60),
        }
    }
}
