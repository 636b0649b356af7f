//! Connection pool and storage client interfaces.
//!
//! The upload flow only needs two capabilities from the storage side: lease a
//! connection with a fresh session token, and put an object through it. Both
//! sit behind traits so the flow can run against the local backend or a fake.

use crate::models::{
    ids::{ObjectId, OwnerId},
    object::ObjectHeader,
    token::{BearerToken, SessionToken},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{fmt, io, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::OwnedSemaphorePermit;

/// Streaming object payload. Finite and not restartable.
pub type Payload = dyn Stream<Item = io::Result<Bytes>> + Send + Unpin;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool is closed")]
    Closed,
    #[error("no healthy connection available")]
    NoHealthyConnection,
    #[error("timed out after {0:?} waiting for a connection")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("payload exceeds the maximum object size of {limit} bytes")]
    PayloadTooLarge { limit: u64 },
    #[error("access denied: {0}")]
    Forbidden(String),
    #[error("reading payload: {0}")]
    Payload(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Everything one put operation needs.
pub struct PutObject<'a> {
    pub header: ObjectHeader,
    pub payload: &'a mut Payload,
    pub session: &'a SessionToken,
    pub bearer: Option<&'a BearerToken>,
}

#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Store an object, consuming the payload to completion or failure.
    async fn put_object(&self, request: PutObject<'_>) -> Result<ObjectId, StoreError>;
}

/// A client handle and session token borrowed from the pool for one call.
pub struct Lease {
    pub client: Arc<dyn ObjectClient>,
    pub session: SessionToken,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Lease {
    pub fn new(client: Arc<dyn ObjectClient>, session: SessionToken) -> Self {
        Self {
            client,
            session,
            _permit: None,
        }
    }

    /// Tie a pool permit to the lease; the permit returns when the lease drops.
    pub fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self._permit = Some(permit);
        self
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("session", &self.session.id)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    pub open: bool,
    pub total: usize,
    pub healthy: usize,
}

#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Lease a client handle with a fresh session token.
    async fn connection(&self) -> Result<Lease, PoolError>;

    /// Identity used when the caller brings no bearer token.
    fn owner_id(&self) -> &OwnerId;

    fn status(&self) -> PoolStatus;
}
