//! Thumbnail bridge
//!
//! Reads a stored video through `VideoStorageService.GetVideo` and replays it
//! into `EncoderService.GenerateThumbnail`, collecting the image bytes the
//! encoder sends back. The storage side runs as its own task and can be
//! stopped at any point through the bridge's [`CancellationToken`].

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dtvault_proto::encoder::{
    generate_thumbnail_request, generate_thumbnail_response, GenerateThumbnailRequest,
    GenerateThumbnailResponse,
};
use dtvault_proto::storage::GetVideoRequest;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::ThumbnailConfig;
use crate::error::{Error, Result};
use crate::framing::{Datagram, Frame, FrameOrder};
use crate::grpc::Upstreams;
use crate::logging::thumbnail_span;
use crate::media::VideoDescriptor;

/// Size and seek position of the generated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSpec {
    pub width: u32,
    pub height: u32,
    pub position_seconds: u32,
}

impl Default for ThumbnailSpec {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            position_seconds: 30,
        }
    }
}

impl From<&ThumbnailConfig> for ThumbnailSpec {
    fn from(config: &ThumbnailConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            position_seconds: config.position_seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

/// Single-use bridge between one storage read and one thumbnail call.
pub struct ThumbnailBridge {
    upstreams: Arc<Upstreams>,
    spec: ThumbnailSpec,
    cancel: CancellationToken,
    state: Mutex<BridgeState>,
}

impl ThumbnailBridge {
    pub fn new(upstreams: Arc<Upstreams>, spec: ThumbnailSpec) -> Self {
        Self {
            upstreams,
            spec,
            cancel: CancellationToken::new(),
            state: Mutex::new(BridgeState::Idle),
        }
    }

    /// Token that stops the storage side when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn state(&self) -> BridgeState {
        *self.state.lock()
    }

    /// Generate a thumbnail of the first of `video_ids`.
    ///
    /// No candidates yields empty bytes without dialing anything. An encoder
    /// that produces nothing also yields empty bytes.
    pub async fn generate(&self, video_ids: &[String]) -> Result<Bytes> {
        {
            let mut state = self.state.lock();
            if *state != BridgeState::Idle {
                return Err(Error::Internal(format!(
                    "thumbnail bridge already used (state {:?})",
                    *state
                )));
            }
            *state = BridgeState::Streaming;
        }

        let Some(video_id) = video_ids.first() else {
            debug!("No candidate video for thumbnail");
            *self.state.lock() = BridgeState::Completed;
            return Ok(Bytes::new());
        };

        let span = thumbnail_span(video_id);
        let result = self.bridge(video_id).instrument(span.clone()).await;
        if let Ok((image, _)) = &result {
            span.record("bytes_written", image.len() as u64);
        }

        let final_state = match &result {
            Ok((_, true)) => BridgeState::Cancelled,
            Ok((_, false)) => BridgeState::Completed,
            Err(_) => BridgeState::Failed,
        };
        *self.state.lock() = final_state;

        result.map(|(image, _)| image)
    }

    /// Returns the image and whether the caller cancelled mid-flight.
    async fn bridge(&self, video_id: &str) -> Result<(Bytes, bool)> {
        let mut encoder = self.upstreams.encoder_client().await?;
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let upstream_failed = CancellationToken::new();

        let upstream = {
            let upstreams = Arc::clone(&self.upstreams);
            let video_id = video_id.to_string();
            let spec = self.spec;
            let cancel = self.cancel.clone();
            let failed = upstream_failed.clone();
            tokio::spawn(
                async move {
                    let pumped = pump_video(upstreams, video_id, spec, &requests_tx, cancel).await;
                    if pumped.is_err() {
                        // Raised before `requests_tx` goes, so the encoder
                        // call is dropped rather than finished
                        failed.cancel();
                    }
                    pumped
                }
                .in_current_span(),
            )
        };

        let foreground = tokio::select! {
            biased;
            () = upstream_failed.cancelled() => {
                debug!("Storage read failed; dropping thumbnail call");
                None
            }
            collected = async {
                let response = encoder
                    .generate_thumbnail(ReceiverStream::new(requests_rx))
                    .await?;
                collect_image(response.into_inner()).await
            } => Some(collected),
        };

        let cancelled_by_caller = self.cancel.is_cancelled();
        if matches!(foreground, Some(Err(_))) {
            debug!("Thumbnail generation failed; stopping storage read");
        }
        self.cancel.cancel();

        let upstream = upstream
            .await
            .map_err(|e| Error::Internal(format!("thumbnail storage task failed: {e}")));

        match (foreground, upstream) {
            (Some(Err(e)), _) => Err(e),
            (_, Err(e)) | (_, Ok(Err(e))) => Err(e),
            (Some(Ok(image)), Ok(Ok(()))) => {
                info!(
                    bytes = image.len(),
                    cancelled = cancelled_by_caller,
                    "Thumbnail generated"
                );
                Ok((image, cancelled_by_caller))
            }
            (None, Ok(Ok(()))) => Err(Error::Internal(
                "thumbnail storage read stopped without a result".to_string(),
            )),
        }
    }
}

/// Storage side: translate storage frames into thumbnail requests until the
/// video ends, the encoder stops reading, or `cancel` fires.
async fn pump_video(
    upstreams: Arc<Upstreams>,
    video_id: String,
    spec: ThumbnailSpec,
    requests: &mpsc::Sender<GenerateThumbnailRequest>,
    cancel: CancellationToken,
) -> Result<()> {
    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        opened = async {
            let mut storage = upstreams.storage_client().await?;
            let response = storage.get_video(GetVideoRequest { video_id }).await?;
            Ok::<_, Error>(response.into_inner())
        } => opened,
    };
    let mut frames = opened?;
    let mut order = FrameOrder::default();
    let mut translated = 0usize;

    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(frames = translated, "Thumbnail storage read cancelled");
                return Ok(());
            }
            message = frames.message() => message?,
        };
        let Some(message) = message else { break };

        let request = match Frame::try_from(message)? {
            Frame::Header(descriptor) => {
                order.header()?;
                thumbnail_header(&descriptor, spec)
            }
            Frame::Datagram(datagram) => {
                order.datagram()?;
                thumbnail_datagram(datagram)
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(frames = translated, "Thumbnail storage read cancelled");
                return Ok(());
            }
            sent = requests.send(request) => {
                if sent.is_err() {
                    debug!("Encoder closed the thumbnail request stream");
                    return Ok(());
                }
            }
        }
        translated += 1;
    }

    debug!(frames = translated, "Thumbnail source fully sent");
    Ok(())
}

async fn collect_image(mut frames: tonic::Streaming<GenerateThumbnailResponse>) -> Result<Bytes> {
    let mut image = BytesMut::new();

    loop {
        match frames.message().await {
            Ok(Some(message)) => match message.part {
                Some(generate_thumbnail_response::Part::Datagram(datagram)) => {
                    image.extend_from_slice(&datagram.payload);
                }
                None => warn!("Encoder sent a thumbnail frame without datagram; skipped"),
            },
            Ok(None) => break,
            Err(status) if is_premature_close(&status) => {
                warn!(error = %status, "Encoder closed the thumbnail stream abruptly; keeping result");
                break;
            }
            Err(status) => return Err(status.into()),
        }
    }

    Ok(image.freeze())
}

/// The encoder backend tears down its side of a finished thumbnail call
/// without a clean status; those closes count as end of stream.
#[must_use]
pub fn is_premature_close(status: &tonic::Status) -> bool {
    let message = status.message().to_ascii_lowercase();
    message.contains("broken pipe") || message.contains("connection reset")
}

fn thumbnail_header(descriptor: &VideoDescriptor, spec: ThumbnailSpec) -> GenerateThumbnailRequest {
    GenerateThumbnailRequest {
        part: Some(generate_thumbnail_request::Part::Header(
            generate_thumbnail_request::Header {
                total_length: descriptor.total_length,
                output_format: generate_thumbnail_request::OutputFormat::Jpeg as i32,
                width: spec.width,
                height: spec.height,
                position: spec.position_seconds,
            },
        )),
    }
}

fn thumbnail_datagram(datagram: Datagram) -> GenerateThumbnailRequest {
    GenerateThumbnailRequest {
        part: Some(generate_thumbnail_request::Part::Datagram(
            generate_thumbnail_request::Datagram {
                offset: datagram.offset,
                payload: Vec::from(datagram.payload),
            },
        )),
    }
}
