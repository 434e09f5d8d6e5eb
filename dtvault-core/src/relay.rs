//! Relay sessions: storage read -> emitter -> HTTP response
//!
//! [`StreamRelay::open`] performs every step that can still fail with a clean
//! status (input check, emitter selection, opening the storage stream) and
//! then moves the session into a task. The caller receives a
//! [`PendingResponse`] that resolves once the response head is decided.

use std::sync::Arc;

use bytes::Bytes;
use dtvault_proto::storage::{GetVideoRequest, GetVideoResponse};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument, Span};

use crate::emitter::Emitter;
use crate::error::{Error, Result};
use crate::framing::{Frame, FrameOrder};
use crate::grpc::Upstreams;
use crate::logging::relay_span;
use crate::sink::{PendingResponse, ResponseSink};

/// Chunks allowed to wait between storage and emitter
pub const CHUNK_QUEUE_DEPTH: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub video_id: String,
    pub preset_id: Option<String>,
}

impl StreamRequest {
    pub fn new(video_id: impl Into<String>, preset_id: Option<String>) -> Self {
        Self {
            video_id: video_id.into(),
            // An empty selector means no transcoding
            preset_id: preset_id.filter(|p| !p.is_empty()),
        }
    }
}

#[derive(Clone)]
pub struct StreamRelay {
    upstreams: Arc<Upstreams>,
}

impl StreamRelay {
    pub const fn new(upstreams: Arc<Upstreams>) -> Self {
        Self { upstreams }
    }

    /// Start a relay session for `request`.
    ///
    /// Errors returned here happen before anything is sent to the client and
    /// map to a status via [`Error::status_code`]. Later failures are
    /// reported through the pending response.
    pub async fn open(&self, request: StreamRequest) -> Result<PendingResponse> {
        if request.video_id.trim().is_empty() {
            return Err(Error::InvalidInput("video id is required".to_string()));
        }

        let span = relay_span(&request.video_id, request.preset_id.as_deref());

        let emitter = Emitter::select(&self.upstreams, request.preset_id.as_deref())
            .instrument(span.clone())
            .await?;

        let frames = async {
            let mut storage = self.upstreams.storage_client().await?;
            let response = storage
                .get_video(GetVideoRequest {
                    video_id: request.video_id.clone(),
                })
                .await?;
            Ok::<_, Error>(response.into_inner())
        }
        .instrument(span.clone())
        .await?;

        let (sink, pending) = ResponseSink::channel();
        tokio::spawn(run_session(emitter, frames, sink).instrument(span));

        Ok(pending)
    }
}

async fn run_session<S>(emitter: Emitter, frames: S, sink: ResponseSink)
where
    S: Stream<Item = std::result::Result<GetVideoResponse, tonic::Status>> + Unpin,
{
    info!(emitter = emitter.kind(), "Relay session started");
    let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);
    let abort = CancellationToken::new();

    let forwarding = async {
        let chunk_tx = chunk_tx;
        let forwarded = forward(frames, &emitter, &chunk_tx).await;
        if let Err(e) = &forwarded {
            error!(error = %e, "Reading from storage failed");
            // Must fire while `chunk_tx` is alive
            abort.cancel();
            sink.fail_internal();
        }
        forwarded
    };

    let emitting = async {
        let emitted = emitter.run(chunk_rx, sink.clone(), &abort).await;
        if let Err(e) = &emitted {
            error!(error = %e, "Emitter failed");
            sink.fail_internal();
        }
        emitted
    };

    // A client that goes away while nothing moves would otherwise leave the
    // session parked on a silent upstream
    let outcome = tokio::select! {
        outcome = async { tokio::join!(forwarding, emitting) } => Some(outcome),
        () = sink.closed() => None,
    };
    let bytes_written = sink.bytes_written();
    drop(sink);
    Span::current().record("bytes_written", bytes_written);

    if let Err(e) = emitter.close() {
        error!(error = %e, "Failed to close emitter");
    }

    match outcome {
        Some((Ok(forwarded), Ok(()))) => info!(
            bytes_forwarded = forwarded,
            bytes_written,
            "Relay session finished"
        ),
        Some(_) => info!(bytes_written, "Relay session aborted"),
        None => info!(bytes_written, "Client disconnected; relay session dropped"),
    }
}

/// Read storage frames, configure `emitter` from the header and push every
/// payload onto `chunks`. Returns the number of payload bytes forwarded.
///
/// Forwarding stops without error once the consumer of `chunks` is gone.
/// Dropping the sender is left to the caller, so a failure can be announced
/// before the consumer sees the channel close.
pub async fn forward<S>(mut frames: S, emitter: &Emitter, chunks: &mpsc::Sender<Bytes>) -> Result<u64>
where
    S: Stream<Item = std::result::Result<GetVideoResponse, tonic::Status>> + Unpin,
{
    let mut order = FrameOrder::default();
    let mut forwarded = 0u64;

    loop {
        let message = tokio::select! {
            biased;
            () = chunks.closed() => {
                debug!("Emitter stopped consuming; dropping storage stream");
                break;
            }
            message = frames.next() => message,
        };
        let Some(message) = message else { break };

        match Frame::try_from(message?)? {
            Frame::Header(descriptor) => {
                order.header()?;
                debug!(
                    total_length = descriptor.total_length,
                    mime_type = %descriptor.mime_type,
                    "Received video header"
                );
                emitter.configure(descriptor)?;
            }
            Frame::Datagram(datagram) => {
                order.datagram()?;
                let len = datagram.payload.len() as u64;
                if chunks.send(datagram.payload).await.is_err() {
                    debug!("Emitter stopped consuming; dropping storage stream");
                    break;
                }
                forwarded += len;
            }
        }
    }

    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtvault_proto::storage::get_video_response;
    use std::time::Duration;

    fn header(total_length: u64) -> std::result::Result<GetVideoResponse, tonic::Status> {
        Ok(GetVideoResponse {
            part: Some(get_video_response::Part::Header(dtvault_proto::Video {
                video_id: "v1".to_string(),
                total_length,
                mime_type: "video/mp2t".to_string(),
                file_name: "v1.ts".to_string(),
                ..Default::default()
            })),
        })
    }

    fn datagram(offset: u64, payload: &[u8]) -> std::result::Result<GetVideoResponse, tonic::Status> {
        Ok(GetVideoResponse {
            part: Some(get_video_response::Part::Datagram(get_video_response::Datagram {
                offset,
                payload: payload.to_vec(),
            })),
        })
    }

    #[test]
    fn test_empty_preset_means_passthrough() {
        let request = StreamRequest::new("v1", Some(String::new()));
        assert_eq!(request.preset_id, None);
        let request = StreamRequest::new("v1", Some("hq".to_string()));
        assert_eq!(request.preset_id.as_deref(), Some("hq"));
    }

    #[tokio::test]
    async fn test_forward_pushes_payloads_in_order() {
        let frames = futures::stream::iter(vec![
            header(6),
            datagram(0, b"abc"),
            datagram(3, b"def"),
        ]);
        let emitter = Emitter::passthrough();
        let (tx, mut rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);

        let collector = tokio::spawn(async move {
            let mut chunks = Vec::new();
            while let Some(chunk) = rx.recv().await {
                chunks.push(chunk);
            }
            chunks
        });

        let forwarded = forward(frames, &emitter, &tx).await.unwrap();
        assert_eq!(forwarded, 6);
        drop(tx);
        assert_eq!(
            collector.await.unwrap(),
            vec![Bytes::from_static(b"abc"), Bytes::from_static(b"def")]
        );
    }

    #[tokio::test]
    async fn test_forward_blocks_on_unconsumed_chunk() {
        let frames = futures::stream::iter(vec![
            header(12),
            datagram(0, b"aaa"),
            datagram(3, b"bbb"),
            datagram(6, b"ccc"),
            datagram(9, b"ddd"),
        ]);
        let emitter = Emitter::passthrough();
        let (tx, rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);

        let blocked =
            tokio::time::timeout(Duration::from_millis(100), forward(frames, &emitter, &tx)).await;

        assert!(blocked.is_err(), "forward must wait for the consumer");
        assert_eq!(rx.len(), 1);
    }

    #[tokio::test]
    async fn test_forward_rejects_datagram_before_header() {
        let frames = futures::stream::iter(vec![datagram(0, b"abc"), header(3)]);
        let emitter = Emitter::passthrough();
        let (tx, _rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);

        let err = forward(frames, &emitter, &tx).await.unwrap_err();
        assert!(matches!(err, Error::StreamProtocol(_)));
    }

    #[tokio::test]
    async fn test_forward_rejects_second_header() {
        let frames = futures::stream::iter(vec![header(3), header(3)]);
        let emitter = Emitter::passthrough();
        let (tx, _rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);

        let err = forward(frames, &emitter, &tx).await.unwrap_err();
        assert!(matches!(err, Error::StreamProtocol(_)));
    }

    #[tokio::test]
    async fn test_forward_surfaces_storage_error() {
        let frames = futures::stream::iter(vec![
            header(3),
            Err(tonic::Status::internal("disk on fire")),
        ]);
        let emitter = Emitter::passthrough();
        let (tx, _rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);

        let err = forward(frames, &emitter, &tx).await.unwrap_err();
        assert!(matches!(err, Error::StreamTransport(_)));
    }

    #[tokio::test]
    async fn test_forward_stops_quietly_without_consumer() {
        let frames = futures::stream::iter(vec![header(3), datagram(0, b"abc")]);
        let emitter = Emitter::passthrough();
        let (tx, rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);
        drop(rx);

        assert_eq!(forward(frames, &emitter, &tx).await.unwrap(), 0);
    }
}
