// Chunked JSON streaming utilities
use crate::application::export_controller::ExportProgress;
use crate::infrastructure::http_response::brotli_compress;
use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Create a chunked streaming response of length-prefixed JSON frames
pub fn chunked_json_stream<S, T>(stream: S, compress: bool) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + Send + Sync + 'static,
{
    let byte_stream = stream.then(move |msg| async move { serialize_chunk(&msg, compress).await });

    let body = Body::from_stream(byte_stream);

    // Chunks are compressed individually, so no Content-Encoding header.
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson-framed")
        .header(header::TRANSFER_ENCODING, "chunked")
        .body(body)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// One frame: 4-byte big-endian length, then the (optionally Brotli-compressed) JSON.
pub async fn serialize_chunk<T: Serialize>(msg: &T, compress: bool) -> Result<Bytes, std::io::Error> {
    let json = serde_json::to_vec(msg)?;

    let payload = if compress {
        brotli_compress(&json).await?
    } else {
        json
    };

    let mut chunk = BytesMut::with_capacity(4 + payload.len());
    chunk.put_u32(payload.len() as u32);
    chunk.put_slice(&payload);
    Ok(chunk.freeze())
}

/// Progress frames from the current value until the export returns to idle.
pub fn progress_stream(rx: watch::Receiver<ExportProgress>) -> impl Stream<Item = ExportProgress> {
    let mut updates = WatchStream::new(rx);
    async_stream::stream! {
        while let Some(progress) = updates.next().await {
            let done = progress == ExportProgress::Idle;
            yield progress;
            if done {
                break;
            }
        }
    }
}

/// Streaming response that follows an export's progress
pub fn stream_progress(rx: watch::Receiver<ExportProgress>, compress: bool) -> impl IntoResponse {
    match chunked_json_stream(progress_stream(rx), compress) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}
