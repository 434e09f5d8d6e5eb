//! HTTP response sink with commit-on-first-byte semantics
//!
//! Headers may be set until the first body chunk is written. That write
//! commits a `200 OK` head; from then on a failure can only truncate the
//! body. A failure reported before the commit turns into a plain-text error
//! response instead.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Body of every 500 answered by the relay
pub const INTERNAL_ERROR_BODY: &str = "Internal error\n";

#[derive(Debug)]
enum Head {
    Stream { status: StatusCode, headers: HeaderMap },
    Failed { status: StatusCode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Commit {
    Pending,
    Streaming,
    Failed,
}

struct SinkState {
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<Head>>,
    commit: Commit,
    bytes_written: u64,
}

impl SinkState {
    fn send_head(&mut self, head: Head) {
        if let Some(tx) = self.head_tx.take() {
            // The receiver is gone when the client disconnected before the head
            let _ = tx.send(head);
        }
    }
}

impl Drop for SinkState {
    fn drop(&mut self) {
        // A session that finished without writing anything still answers 200
        if self.commit == Commit::Pending {
            let headers = std::mem::take(&mut self.headers);
            self.send_head(Head::Stream {
                status: StatusCode::OK,
                headers,
            });
        }
    }
}

/// Writer half handed to emitters and the orchestrator. Clones share state.
#[derive(Clone)]
pub struct ResponseSink {
    state: Arc<Mutex<SinkState>>,
    body_tx: mpsc::Sender<Bytes>,
}

/// Reader half held by the HTTP handler.
pub struct PendingResponse {
    head_rx: oneshot::Receiver<Head>,
    body_rx: mpsc::Receiver<Bytes>,
}

impl ResponseSink {
    /// Create a connected sink/response pair. The body channel holds a single
    /// chunk so a slow client slows the whole pipeline down.
    #[must_use]
    pub fn channel() -> (Self, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(1);

        let sink = Self {
            state: Arc::new(Mutex::new(SinkState {
                headers: HeaderMap::new(),
                head_tx: Some(head_tx),
                commit: Commit::Pending,
                bytes_written: 0,
            })),
            body_tx,
        };

        (sink, PendingResponse { head_rx, body_rx })
    }

    /// Set a response header. Returns `false` once the head is committed.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) -> bool {
        let mut state = self.state.lock();
        if state.commit != Commit::Pending {
            warn!(header = %name, "Header set after response was committed; ignored");
            return false;
        }
        state.headers.insert(name, value);
        true
    }

    /// Whether a status has been sent to the client.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.state.lock().commit != Commit::Pending
    }

    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.state.lock().bytes_written
    }

    /// Append `chunk` to the body, committing a `200 OK` head on first use.
    ///
    /// Waits while the previous chunk has not been taken by the client.
    pub async fn write(&self, chunk: Bytes) -> Result<()> {
        {
            let mut state = self.state.lock();
            match state.commit {
                Commit::Failed => {
                    return Err(Error::StreamTransport(tonic::Status::aborted(
                        "response already failed",
                    )))
                }
                Commit::Pending => {
                    state.commit = Commit::Streaming;
                    let headers = std::mem::take(&mut state.headers);
                    state.send_head(Head::Stream {
                        status: StatusCode::OK,
                        headers,
                    });
                }
                Commit::Streaming => {}
            }
            state.bytes_written += chunk.len() as u64;
        }

        self.body_tx
            .send(chunk)
            .await
            .map_err(|_| Error::StreamTransport(tonic::Status::cancelled("HTTP client disconnected")))
    }

    /// Resolves once the client stopped reading the response.
    pub async fn closed(&self) {
        self.body_tx.closed().await;
    }

    /// Report a failure. Before the commit this answers `status` with
    /// `message`; afterwards the body is left truncated. Either way every
    /// later write is refused.
    /// Returns whether the failure reached the client as a status.
    pub fn fail(&self, status: StatusCode, message: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        match state.commit {
            Commit::Pending => {
                state.commit = Commit::Failed;
                state.send_head(Head::Failed {
                    status,
                    message: message.into(),
                });
                true
            }
            Commit::Streaming => {
                state.commit = Commit::Failed;
                warn!(
                    bytes_written = state.bytes_written,
                    "Response already streaming; body left truncated"
                );
                false
            }
            Commit::Failed => false,
        }
    }

    /// Shorthand for a 500 with the generic body.
    pub fn fail_internal(&self) -> bool {
        self.fail(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY)
    }
}

impl PendingResponse {
    /// Wait until the head is decided and build the `axum` response. The body
    /// keeps streaming from the sink after this returns.
    pub async fn into_response(self) -> Response {
        match self.head_rx.await {
            Ok(Head::Stream { status, headers }) => {
                let stream = ReceiverStream::new(self.body_rx).map(Ok::<_, Infallible>);
                let mut response = Response::new(Body::from_stream(stream));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            Ok(Head::Failed { status, message }) => (status, message).into_response(),
            Err(_) => {
                debug!("Response sink vanished without a head");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
            }
        }
    }
}
