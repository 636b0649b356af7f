//! HTTP handler for multipart uploads.
//! The request body is streamed into the store through the multipart reader
//! and drained afterwards so the connection can be reused.

use crate::{
    errors::AppError,
    models::ids::Address,
    services::{
        drain::drain_body,
        multipart::BodyStream,
        uploader::{UploadError, Uploader},
    },
};
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};
use std::error::Error as _;
use tracing::{Instrument, debug, error, info_span};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Body returned for a stored object. Field order is part of the contract.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct PutResponse {
    pub object_id: String,
    pub container_id: String,
}

impl PutResponse {
    pub fn new(address: &Address) -> Self {
        Self {
            object_id: address.object_id.to_string(),
            container_id: address.container_id.to_string(),
        }
    }

    /// Tab-indented JSON followed by a newline.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut buf = Vec::new();
        let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"\t"));
        self.serialize(&mut ser)?;
        buf.push(b'\n');
        Ok(buf)
    }
}

/// `POST /upload/{cid}`: store the first multipart part as an object.
pub async fn upload_object(
    State(uploader): State<Uploader>,
    Path(cid): Path<String>,
    request: Request,
) -> Response {
    let span = info_span!("upload", cid = %cid);
    async move {
        let (mut parts, body) = request.into_parts();
        let body = BodyStream::from_body(body);

        let address = match uploader.put(&cid, &mut parts, body.clone()).await {
            Ok(address) => address,
            Err(err) => return fail(err, None),
        };

        let encoded = match PutResponse::new(&address).encode() {
            Ok(encoded) => encoded,
            Err(err) => return fail(UploadError::Encoding(err), Some(address)),
        };

        let drained = drain_body(body).await;
        debug!(address = %address, drained, "drained request body");

        let mut response = Response::new(Body::from(encoded));
        *response.status_mut() = StatusCode::OK;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(JSON_CONTENT_TYPE),
        );
        response
    }
    .instrument(span)
    .await
}

fn fail(err: UploadError, address: Option<Address>) -> Response {
    error!(
        address = ?address.map(|a| a.to_string()),
        cause = ?err.source().map(ToString::to_string),
        "{}",
        err
    );
    AppError::from(err).into_response()
}
