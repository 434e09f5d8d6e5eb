use axum::http::{header, HeaderValue};
use bytes::Bytes;
use dtvault_proto::encoder::{
    encode_video_response, encoder_service_client::EncoderServiceClient, EncodeVideoRequest,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::{debug, info, warn};

use super::DescriptorSlot;
use crate::error::Result;
use crate::framing::{encode_datagram, encode_header, OffsetCounter};
use crate::grpc::{fetch_presets, Upstreams};
use crate::media::{find_preset, Preset, VideoDescriptor};
use crate::sink::ResponseSink;

/// Content type of everything the encoder produces
pub const TRANSCODED_MIME_TYPE: &str = "video/mp4";

/// Pipes chunks through `EncoderService.EncodeVideo` and writes its output.
pub struct Transcoding {
    client: EncoderServiceClient<Channel>,
    preset: Preset,
    descriptor: DescriptorSlot,
}

impl Transcoding {
    /// Dial the encoder and resolve `preset_id` against its catalog.
    pub async fn connect(upstreams: &Upstreams, preset_id: &str) -> Result<Self> {
        let mut client = upstreams.encoder_client().await?;
        let catalog = fetch_presets(&mut client).await?;
        let preset = find_preset(&catalog, preset_id)?.clone();

        debug!(preset_id = %preset.preset_id, title = %preset.title, "Resolved transcoding preset");

        Ok(Self {
            client,
            preset,
            descriptor: DescriptorSlot::default(),
        })
    }

    #[must_use]
    pub const fn preset(&self) -> &Preset {
        &self.preset
    }

    pub fn configure(&self, descriptor: VideoDescriptor) -> Result<()> {
        self.descriptor.set(descriptor)
    }

    /// Run one `EncodeVideo` call: chunks go up as header + datagrams while
    /// encoded datagrams come back into `sink`. Returns once both directions
    /// are done; a receive error takes precedence over a send error.
    ///
    /// Once `abort` fires the call is dropped on the spot: nothing more is
    /// sent and no further encoder output is written to `sink`.
    pub async fn run(
        &self,
        chunks: mpsc::Receiver<Bytes>,
        sink: ResponseSink,
        abort: &CancellationToken,
    ) -> Result<()> {
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let call_done = CancellationToken::new();

        let send = self.send_chunks(chunks, requests_tx, call_done.clone());
        let receive = self.receive_encoded(requests_rx, sink, call_done);

        let (sent, received) = tokio::select! {
            biased;
            () = abort.cancelled() => {
                warn!(preset_id = %self.preset.preset_id, "Input failed; dropping encode call");
                return Ok(());
            }
            done = async { tokio::join!(send, receive) } => done,
        };
        received?;
        sent
    }

    async fn send_chunks(
        &self,
        mut chunks: mpsc::Receiver<Bytes>,
        requests: mpsc::Sender<EncodeVideoRequest>,
        call_done: CancellationToken,
    ) -> Result<()> {
        let mut offsets = OffsetCounter::default();
        let mut header_sent = false;

        loop {
            let chunk = tokio::select! {
                biased;
                () = call_done.cancelled() => {
                    debug!("Encode call ended; abandoning remaining input");
                    return Ok(());
                }
                chunk = chunks.recv() => chunk,
            };
            let Some(chunk) = chunk else { break };

            if !header_sent {
                let descriptor = self.descriptor.get()?;
                let request = encode_header(descriptor.total_length, &self.preset.preset_id);
                if !send_request(&requests, &call_done, request).await {
                    return Ok(());
                }
                header_sent = true;
            }

            let offset = offsets.advance(chunk.len());
            if !send_request(&requests, &call_done, encode_datagram(offset, chunk)).await {
                return Ok(());
            }
        }

        // Dropping `requests` half-closes the call
        debug!(bytes = offsets.total(), "Finished sending to encoder");
        Ok(())
    }

    async fn receive_encoded(
        &self,
        requests: mpsc::Receiver<EncodeVideoRequest>,
        sink: ResponseSink,
        call_done: CancellationToken,
    ) -> Result<()> {
        let _done = call_done.drop_guard();
        let mut client = self.client.clone();

        let response = client.encode_video(ReceiverStream::new(requests)).await?;
        let mut frames = response.into_inner();
        let mut written = 0u64;
        let mut content_type_set = false;

        while let Some(message) = frames.message().await? {
            match message.part {
                Some(encode_video_response::Part::Datagram(datagram)) => {
                    if !content_type_set {
                        sink.set_header(
                            header::CONTENT_TYPE,
                            HeaderValue::from_static(TRANSCODED_MIME_TYPE),
                        );
                        content_type_set = true;
                    }
                    written += datagram.payload.len() as u64;
                    sink.write(Bytes::from(datagram.payload)).await?;
                }
                None => warn!("Encoder sent a frame without datagram; skipped"),
            }
        }

        debug!(bytes = written, "Encoder stream ended");
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        info!(preset_id = %self.preset.preset_id, "Closing encoder channel");
        Ok(())
    }
}

/// Send one request unless the call is over. Returns whether it was sent.
async fn send_request(
    requests: &mpsc::Sender<EncodeVideoRequest>,
    call_done: &CancellationToken,
    request: EncodeVideoRequest,
) -> bool {
    tokio::select! {
        biased;
        () = call_done.cancelled() => false,
        sent = requests.send(request) => {
            if sent.is_err() {
                debug!("Encoder stopped reading requests");
            }
            sent.is_ok()
        }
    }
}
