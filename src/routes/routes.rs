//! Defines routes for the upload gateway.
//!
//! ## Structure
//! - `GET  /healthz`      liveness
//! - `GET  /readyz`       readiness (connection pool state)
//! - `POST /upload/{cid}` store the first multipart part in container `cid`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::upload_object,
    },
    services::uploader::Uploader,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router. Handlers share the [`Uploader`] state.
pub fn routes() -> Router<Uploader> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload/{cid}", post(upload_object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::upload_handlers::{JSON_CONTENT_TYPE, PutResponse},
        services::{
            attributes::HeaderFilter,
            local_store::{
                LocalPool,
                testing::{memory_store, pool_options},
            },
            multipart::{FormDataOpener, testing::form_body},
            pool::ConnectionPool,
            uploader::testing::FakePool,
        },
    };
    use axum::{
        body::{Body, Bytes},
        http::{Request, StatusCode, header},
    };
    use futures::{StreamExt, stream};
    use http_body_util::BodyExt;
    use std::{
        io,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };
    use tower::ServiceExt;

    const CID: &str = "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";
    const BOUNDARY: &str = "----gateway-test";

    fn app(pool: Arc<dyn ConnectionPool>) -> Router {
        let uploader = Uploader::new(
            pool,
            Arc::new(FormDataOpener),
            HeaderFilter::default(),
            true,
        );
        routes().with_state(uploader)
    }

    fn upload(cid: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/upload/{cid}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header("x-attribute-project", "apollo")
            .body(body)
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn upload_returns_address_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store(dir.path(), 1 << 20).await;
        let pool = Arc::new(LocalPool::new(store.clone(), pool_options(2, 8)));

        let raw = form_body(BOUNDARY, &[("notes.txt", "remember the milk")], b"");
        let response = app(pool).oneshot(upload(CID, Body::from(raw))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            JSON_CONTENT_TYPE
        );
        let decoded: PutResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(decoded.container_id, CID);

        let (object, attributes) = store
            .head_object(&decoded.object_id.parse().unwrap())
            .await
            .unwrap();
        assert_eq!(object.container_id, CID);
        assert_eq!(object.owner_id, "gateway");
        assert_eq!(object.payload_size, 17);
        assert_eq!(attributes[0].key, "project");
        assert_eq!(attributes[1].key, "filename");
        assert_eq!(attributes[1].value, "notes.txt");
        assert_eq!(attributes[2].key, "timestamp");
    }

    #[tokio::test]
    async fn response_matches_store_result() {
        let pool = Arc::new(FakePool::new(false, false));
        let raw = form_body(BOUNDARY, &[("a.bin", "abc")], b"");
        let response = app(pool.clone())
            .oneshot(upload(CID, Body::from(raw)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let decoded: PutResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(decoded.container_id, CID);
        assert_eq!(decoded.object_id, pool.client.object_id.to_string());
    }

    #[tokio::test]
    async fn trailing_parts_and_epilogue_are_drained() {
        let pool = Arc::new(FakePool::new(false, false));
        let raw = form_body(
            BOUNDARY,
            &[("first.bin", "one"), ("second.bin", "two")],
            b"0\r\n\r\n",
        );
        let total = raw.len();
        let consumed = Arc::new(AtomicUsize::new(0));
        let counter = consumed.clone();
        let chunks: Vec<io::Result<Bytes>> = raw
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let body = Body::from_stream(stream::iter(chunks).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                counter.fetch_add(bytes.len(), Ordering::SeqCst);
            }
        }));

        let response = app(pool.clone()).oneshot(upload(CID, body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(consumed.load(Ordering::SeqCst), total);
        assert_eq!(pool.puts()[0].payload, b"one");
    }

    #[tokio::test]
    async fn invalid_container_id_is_bad_request() {
        let pool = Arc::new(FakePool::new(false, false));
        let raw = form_body(BOUNDARY, &[("a.bin", "abc")], b"");
        let response = app(pool.clone())
            .oneshot(upload("nope", Body::from(raw)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"], "wrong container id");
        assert_eq!(pool.lease_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_pool_is_server_error() {
        let pool = Arc::new(FakePool::new(false, true));
        let raw = form_body(BOUNDARY, &[("a.bin", "abc")], b"");
        let response = app(pool.clone())
            .oneshot(upload(CID, Body::from(raw)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(pool.puts().is_empty());
    }

    #[tokio::test]
    async fn store_rejection_is_bad_request() {
        let pool = Arc::new(FakePool::new(true, false));
        let raw = form_body(BOUNDARY, &[("a.bin", "abc")], b"");
        let response = app(pool)
            .oneshot(upload(CID, Body::from(raw)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"], "could not store file");
    }

    #[tokio::test]
    async fn health_and_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(LocalPool::new(
            memory_store(dir.path(), 1024).await,
            pool_options(1, 8),
        ));
        let app = app(pool.clone());

        let ok = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let ready = app
            .clone()
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);

        pool.set_healthy(0, false);
        let not_ready = app
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
