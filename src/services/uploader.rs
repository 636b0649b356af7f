//! Upload flow: from an incoming multipart request to a stored object.
//!
//! Stages run strictly in order and every failure ends the request:
//!
//! 1. extract the bearer token and parse the container id
//! 2. open the first multipart part
//! 3. derive attributes from headers and the part's file name
//! 4. resolve the acting owner (bearer issuer or the pool default)
//! 5. lease a connection and stream the part into the store
//!
//! The opened part is held by a [`FileGuard`], so it is closed whichever
//! stage returns.

use crate::{
    models::{
        ids::{Address, ContainerId, IdError, OwnerId},
        object::ObjectHeader,
        token::BearerToken,
    },
    services::{
        attributes::{HeaderFilter, derive_attributes},
        multipart::{
            BodyStream, FileGuard, MultipartError, MultipartOpener, boundary_from_content_type,
        },
        pool::{ConnectionPool, PoolError, PutObject, StoreError},
        tokens::{TokenError, load_bearer_token, store_bearer_token},
    },
};
use axum::http::{Extensions, StatusCode, header, request::Parts};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("could not fetch bearer token")]
    BearerToken(#[source] TokenError),
    #[error("wrong container id")]
    InvalidContainerId(#[source] IdError),
    #[error("could not receive multipart/form: {0}")]
    Multipart(#[from] MultipartError),
    #[error("failed to get connection artifacts")]
    ConnectionUnavailable(#[from] PoolError),
    #[error("could not store file")]
    Store(#[source] StoreError),
    #[error("could not prepare response")]
    Encoding(#[source] serde_json::Error),
}

impl UploadError {
    /// Only a pool failure is the gateway's fault; everything else,
    /// including store-time rejections, is reported as a bad request.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ConnectionUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Upload request handler state, shared by all requests.
#[derive(Clone)]
pub struct Uploader {
    pool: Arc<dyn ConnectionPool>,
    opener: Arc<dyn MultipartOpener>,
    filter: HeaderFilter,
    enable_default_timestamp: bool,
}

impl Uploader {
    pub fn new(
        pool: Arc<dyn ConnectionPool>,
        opener: Arc<dyn MultipartOpener>,
        filter: HeaderFilter,
        enable_default_timestamp: bool,
    ) -> Self {
        Self {
            pool,
            opener,
            filter,
            enable_default_timestamp,
        }
    }

    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    /// Store the first part of a multipart request into container `scid`.
    ///
    /// `body` is only read through the multipart reader; the caller keeps
    /// its own clone to drain leftovers afterwards.
    pub async fn put(
        &self,
        scid: &str,
        parts: &mut Parts,
        body: BodyStream,
    ) -> Result<Address, UploadError> {
        store_bearer_token(&parts.headers, &mut parts.extensions)
            .map_err(UploadError::BearerToken)?;
        let cid: ContainerId = scid.parse().map_err(UploadError::InvalidContainerId)?;

        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let boundary = boundary_from_content_type(content_type);
        let mut file = FileGuard::new(self.opener.open(body, &boundary).await?);

        let filtered = self.filter.filter(&parts.headers);
        let attributes = derive_attributes(
            &filtered,
            file.file_name(),
            self.enable_default_timestamp,
            Utc::now().timestamp(),
        );

        let (owner_id, bearer) = self.fetch_owner_and_bearer_token(&parts.extensions);

        let lease = self.pool.connection().await?;
        debug!(session = %lease.session.id, owner = %owner_id, "leased connection");

        let header = ObjectHeader {
            container_id: cid,
            owner_id,
            attributes,
        };
        let object_id = lease
            .client
            .put_object(PutObject {
                header,
                payload: &mut file,
                session: &lease.session,
                bearer: bearer.as_ref(),
            })
            .await
            .map_err(UploadError::Store)?;

        let address = Address::new(cid, object_id);
        file.set_address(address);
        Ok(address)
    }

    /// The bearer issuer acts as owner when a token came with the request;
    /// otherwise the pool's own identity is used.
    fn fetch_owner_and_bearer_token(
        &self,
        extensions: &Extensions,
    ) -> (OwnerId, Option<BearerToken>) {
        match load_bearer_token(extensions) {
            Ok(Some(token)) => (token.issuer().clone(), Some(token)),
            _ => (self.pool.owner_id().clone(), None),
        }
    }
}
