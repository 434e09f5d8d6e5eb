//! Consumers of a relayed chunk stream
//!
//! An [`Emitter`] is picked once per session: [`Passthrough`] copies the
//! stored bytes to the response, [`Transcoding`] pipes them through the
//! encoder and copies its output instead. Both are configured with the video
//! descriptor while [`Emitter::run`] is already waiting for chunks, so the
//! descriptor sits in a write-once slot.

mod passthrough;
mod transcoding;

pub use passthrough::Passthrough;
pub use transcoding::{Transcoding, TRANSCODED_MIME_TYPE};

use std::sync::OnceLock;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::grpc::Upstreams;
use crate::media::VideoDescriptor;
use crate::sink::ResponseSink;

pub enum Emitter {
    Passthrough(Passthrough),
    Transcoding(Transcoding),
}

impl Emitter {
    /// Passthrough when no preset is requested, Transcoding otherwise.
    ///
    /// Selecting a transcoder dials the encoder and resolves the preset; an
    /// unknown preset fails with [`Error::PresetNotFound`].
    pub async fn select(upstreams: &Upstreams, preset_id: Option<&str>) -> Result<Self> {
        match preset_id {
            None => Ok(Self::passthrough()),
            Some(preset_id) => Ok(Self::Transcoding(
                Transcoding::connect(upstreams, preset_id).await?,
            )),
        }
    }

    #[must_use]
    pub fn passthrough() -> Self {
        Self::Passthrough(Passthrough::new())
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Passthrough(_) => "passthrough",
            Self::Transcoding(_) => "transcoding",
        }
    }

    /// Hand over the video descriptor. Accepted once per session.
    pub fn configure(&self, descriptor: VideoDescriptor) -> Result<()> {
        match self {
            Self::Passthrough(emitter) => emitter.configure(descriptor),
            Self::Transcoding(emitter) => emitter.configure(descriptor),
        }
    }

    /// Consume `chunks` until the sender is dropped, writing to `sink`.
    ///
    /// `abort` is cancelled when the input failed. The sender is still alive
    /// at that point, so the end of `chunks` never looks like a complete video.
    pub async fn run(
        &self,
        chunks: mpsc::Receiver<Bytes>,
        sink: ResponseSink,
        abort: &CancellationToken,
    ) -> Result<()> {
        match self {
            // Stored bytes are final as written; the truncated body is enough
            Self::Passthrough(emitter) => emitter.run(chunks, sink).await,
            Self::Transcoding(emitter) => emitter.run(chunks, sink, abort).await,
        }
    }

    /// Release whatever the emitter holds on to.
    pub fn close(self) -> Result<()> {
        match self {
            Self::Passthrough(_) => Ok(()),
            Self::Transcoding(emitter) => emitter.close(),
        }
    }
}

/// Write-once holder of the session's descriptor.
#[derive(Debug, Default)]
pub(crate) struct DescriptorSlot(OnceLock<VideoDescriptor>);

impl DescriptorSlot {
    pub(crate) fn set(&self, descriptor: VideoDescriptor) -> Result<()> {
        self.0
            .set(descriptor)
            .map_err(|_| Error::StreamProtocol("video header received twice".to_string()))
    }

    pub(crate) fn get(&self) -> Result<&VideoDescriptor> {
        self.0
            .get()
            .ok_or_else(|| Error::StreamProtocol("chunk arrived before the video header".to_string()))
    }
}
