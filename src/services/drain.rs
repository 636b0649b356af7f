//! Discards whatever the multipart reader left unread in the request body.
//!
//! Multipart bodies may carry more parts than we consume, and with chunked
//! transfer encoding the terminating zero-length chunk can be left behind
//! because the multipart reader stops at its closing boundary. Leftovers
//! would be read as the start of the next pipelined request.

use crate::services::multipart::BodyStream;
use std::io::ErrorKind;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::debug;

pub const DRAIN_BUF_SIZE: usize = 4096;

/// Read `body` to its end and return how many bytes were discarded.
///
/// End of stream and unexpected end of stream both terminate draining;
/// any other read error also stops it without being reported.
pub async fn drain_body(body: BodyStream) -> u64 {
    let mut reader = StreamReader::new(body);
    let mut buf = [0u8; DRAIN_BUF_SIZE];
    let mut drained = 0u64;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => drained += n as u64,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => {
                debug!(error = %err, drained, "stopped draining request body");
                break;
            }
        }
    }
    drained
}
