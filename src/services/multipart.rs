//! Streaming access to the first part of a `multipart/form-data` body.
//!
//! The raw request body is wrapped in a [`BodyStream`] that can be cloned:
//! one handle feeds the multipart reader, the other is kept by the request
//! handler to drain whatever the reader left behind.

use crate::models::ids::Address;
use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, stream::BoxStream};
use multer::{Field, Multipart};
use std::{
    io,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("no multipart boundary in content type")]
    MissingBoundary,
    #[error("multipart body contains no parts")]
    NoParts,
    #[error(transparent)]
    Parse(#[from] multer::Error),
}

/// Shared handle over the raw request body.
#[derive(Clone)]
pub struct BodyStream {
    inner: Arc<Mutex<BoxStream<'static, io::Result<Bytes>>>>,
}

impl BodyStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(stream.boxed())),
        }
    }

    pub fn from_body(body: Body) -> Self {
        Self::new(body.into_data_stream().map_err(io::Error::other))
    }
}

impl Stream for BodyStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.poll_next_unpin(cx)
    }
}

/// One opened multipart part: a sequential byte source plus its file name.
pub trait MultipartPart: Stream<Item = io::Result<Bytes>> + Send + Unpin {
    /// Logical file name declared by the part, empty when absent.
    fn file_name(&self) -> &str;

    /// Release the part. Must not consume more of the body.
    fn close(&mut self) -> io::Result<()>;
}

#[async_trait]
pub trait MultipartOpener: Send + Sync {
    /// Open the first part of `body`, delimited by `boundary`.
    async fn open(
        &self,
        body: BodyStream,
        boundary: &str,
    ) -> Result<Box<dyn MultipartPart>, MultipartError>;
}

/// Extract the boundary from a `Content-Type` value; empty when absent.
pub fn boundary_from_content_type(content_type: Option<&str>) -> String {
    content_type
        .and_then(|ct| multer::parse_boundary(ct).ok())
        .unwrap_or_default()
}

/// [`MultipartOpener`] backed by `multer`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FormDataOpener;

#[async_trait]
impl MultipartOpener for FormDataOpener {
    async fn open(
        &self,
        body: BodyStream,
        boundary: &str,
    ) -> Result<Box<dyn MultipartPart>, MultipartError> {
        if boundary.is_empty() {
            return Err(MultipartError::MissingBoundary);
        }
        let mut multipart = Multipart::new(body, boundary);
        let field = multipart
            .next_field()
            .await?
            .ok_or(MultipartError::NoParts)?;
        let file_name = field.file_name().unwrap_or_default().to_string();
        debug!(file_name = %file_name, field = ?field.name(), "opened multipart part");

        Ok(Box::new(MultipartFile {
            field: Some(field),
            multipart: Some(multipart),
            file_name,
        }))
    }
}

/// First part of a `multipart/form-data` body, read lazily.
pub struct MultipartFile {
    field: Option<Field<'static>>,
    multipart: Option<Multipart<'static>>,
    file_name: String,
}

impl Stream for MultipartFile {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.field.as_mut() {
            Some(field) => field.poll_next_unpin(cx).map_err(io::Error::other),
            None => Poll::Ready(Some(Err(io::Error::other("multipart file is closed")))),
        }
    }
}

impl MultipartPart for MultipartFile {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn close(&mut self) -> io::Result<()> {
        self.field.take();
        self.multipart.take();
        Ok(())
    }
}

/// Owns the opened part for the duration of a request and closes it
/// exactly once when dropped, whichever way the request ends.
pub struct FileGuard {
    part: Option<Box<dyn MultipartPart>>,
    address: Option<Address>,
}

impl FileGuard {
    pub fn new(part: Box<dyn MultipartPart>) -> Self {
        Self {
            part: Some(part),
            address: None,
        }
    }

    pub fn file_name(&self) -> &str {
        self.part.as_ref().map_or("", |p| p.file_name())
    }

    /// Record the stored address so the close log can reference it.
    pub fn set_address(&mut self, address: Address) {
        self.address = Some(address);
    }
}

impl Stream for FileGuard {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.part.as_mut() {
            Some(part) => part.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        let Some(mut part) = self.part.take() else {
            return;
        };
        let result = part.close();
        debug!(
            address = ?self.address.map(|a| a.to_string()),
            filename = part.file_name(),
            error = ?result.err(),
            "close temporary multipart/form file"
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory part that records whether it was closed.
    pub struct FakePart {
        pub chunks: Vec<Bytes>,
        pub file_name: String,
        pub closed: Arc<AtomicBool>,
        pub closes: Arc<AtomicUsize>,
    }

    impl FakePart {
        pub fn new(file_name: &str, payload: &'static str) -> Self {
            Self {
                chunks: vec![Bytes::from_static(payload.as_bytes())],
                file_name: file_name.to_string(),
                closed: Arc::new(AtomicBool::new(false)),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Stream for FakePart {
        type Item = io::Result<Bytes>;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            if self.chunks.is_empty() {
                Poll::Ready(None)
            } else {
                Poll::Ready(Some(Ok(self.chunks.remove(0))))
            }
        }
    }

    impl MultipartPart for FakePart {
        fn file_name(&self) -> &str {
            &self.file_name
        }

        fn close(&mut self) -> io::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Build a multipart body with the given parts and an optional epilogue.
    pub fn form_body(boundary: &str, parts: &[(&str, &str)], epilogue: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        for (file_name, payload) in parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(payload.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body.extend_from_slice(epilogue);
        body
    }

    pub fn body_from_chunks(chunks: Vec<Vec<u8>>) -> BodyStream {
        BodyStream::new(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from(c))),
        ))
    }
}
