//! Test helpers and fixtures for relay and thumbnail tests
//!
//! Provides in-process storage and encoder services served by tonic on a
//! loopback port, so tests exercise the real gRPC client paths. Exported for
//! the integration suites of this crate and of the HTTP crate.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dtvault_proto::encoder::{
    encode_video_request, encode_video_response,
    encoder_service_server::{EncoderService, EncoderServiceServer},
    generate_thumbnail_request, generate_thumbnail_response, EncodeVideoRequest,
    EncodeVideoResponse, GenerateThumbnailRequest, GenerateThumbnailResponse, ListPresetsRequest,
    ListPresetsResponse,
};
use dtvault_proto::storage::{
    get_video_response,
    video_storage_service_server::{VideoStorageService, VideoStorageServiceServer},
    GetVideoRequest, GetVideoResponse,
};
use futures::{stream, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{transport::Server, Request, Response, Status, Streaming};

use crate::error::{Error, Result};
use crate::grpc::{GrpcAddress, Upstreams};
use crate::media::Preset;

type ResponseStream<T> = Pin<Box<dyn Stream<Item = std::result::Result<T, Status>> + Send>>;

/// Create a test preset
pub fn test_preset(id: &str) -> Preset {
    Preset {
        preset_id: id.to_string(),
        title: format!("{id} preset"),
        command: format!("ffmpeg -i - -preset {id} -f mp4 -"),
    }
}

/// How a stored video stream ends after its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEnding {
    Eof,
    Error(String),
    /// Error status after a pause, once earlier chunks have been relayed
    ErrorAfter(String, Duration),
    /// Never ends; the stream stays open until the client drops it
    Stall,
}

/// Test fixture builder for a stored video
#[derive(Debug, Clone)]
pub struct StoredVideo {
    id: String,
    mime_type: String,
    file_name: String,
    chunks: Vec<Bytes>,
    ending: StorageEnding,
}

impl StoredVideo {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            mime_type: "video/mp2t".to_string(),
            file_name: format!("{id}.ts"),
            chunks: Vec::new(),
            ending: StorageEnding::Eof,
        }
    }

    pub fn with_mime_type(mut self, mime_type: &str) -> Self {
        self.mime_type = mime_type.to_string();
        self
    }

    pub fn with_file_name(mut self, file_name: &str) -> Self {
        self.file_name = file_name.to_string();
        self
    }

    pub fn with_chunks(mut self, chunks: &[&[u8]]) -> Self {
        self.chunks = chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect();
        self
    }

    pub fn ending(mut self, ending: StorageEnding) -> Self {
        self.ending = ending;
        self
    }

    pub fn total_length(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    fn frames(&self) -> Vec<GetVideoResponse> {
        let header = GetVideoResponse {
            part: Some(get_video_response::Part::Header(dtvault_proto::Video {
                video_id: self.id.clone(),
                total_length: self.total_length(),
                file_name: self.file_name.clone(),
                mime_type: self.mime_type.clone(),
                ..Default::default()
            })),
        };

        let mut offset = 0u64;
        let datagrams = self.chunks.iter().map(|chunk| {
            let datagram = GetVideoResponse {
                part: Some(get_video_response::Part::Datagram(get_video_response::Datagram {
                    offset,
                    payload: chunk.to_vec(),
                })),
            };
            offset += chunk.len() as u64;
            datagram
        });

        std::iter::once(header).chain(datagrams).collect()
    }
}

/// In-process `VideoStorageService`
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    videos: HashMap<String, StoredVideo>,
    open_streams: Arc<AtomicUsize>,
}

/// Counts a served stream until it is dropped.
struct OpenStream(Arc<AtomicUsize>);

impl OpenStream {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(mut self, video: StoredVideo) -> Self {
        self.videos.insert(video.id.clone(), video);
        self
    }

    /// `GetVideo` streams the server is still serving
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

#[tonic::async_trait]
impl VideoStorageService for MockStorage {
    type GetVideoStream = ResponseStream<GetVideoResponse>;

    async fn get_video(
        &self,
        request: Request<GetVideoRequest>,
    ) -> std::result::Result<Response<Self::GetVideoStream>, Status> {
        let video_id = request.into_inner().video_id;
        let video = self
            .videos
            .get(&video_id)
            .ok_or_else(|| Status::not_found(format!("video {video_id} not found")))?;

        let frames = stream::iter(video.frames().into_iter().map(Ok));
        let served: Self::GetVideoStream = match video.ending.clone() {
            StorageEnding::Eof => Box::pin(frames),
            StorageEnding::Error(message) => {
                Box::pin(frames.chain(stream::once(async move { Err(Status::internal(message)) })))
            }
            StorageEnding::ErrorAfter(message, pause) => {
                Box::pin(frames.chain(stream::once(async move {
                    tokio::time::sleep(pause).await;
                    Err(Status::internal(message))
                })))
            }
            StorageEnding::Stall => Box::pin(frames.chain(stream::pending())),
        };

        let guard = OpenStream::new(&self.open_streams);
        let tracked: Self::GetVideoStream = Box::pin(served.map(move |item| {
            let _alive = &guard;
            item
        }));

        Ok(Response::new(tracked))
    }
}

/// How the mock encoder finishes a thumbnail call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailEnding {
    /// Image then a clean end of stream
    Eof,
    /// Image then a status reporting a broken pipe
    BrokenPipe,
    /// Error status right after the header, no image
    FailAfterHeader,
    /// No answer at all, even after the source has ended
    Stall,
}

/// In-process `EncoderService`.
///
/// Encoding upper-cases every payload and echoes it back with the same
/// offset. Requests are recorded for inspection.
#[derive(Debug, Clone)]
pub struct MockEncoder {
    presets: Vec<Preset>,
    fail_encoding: Option<String>,
    fail_after_datagrams: Option<(usize, String)>,
    end_marker: Option<Bytes>,
    thumbnail: Bytes,
    thumbnail_ending: ThumbnailEnding,
    encode_requests: Arc<Mutex<Vec<EncodeVideoRequest>>>,
    thumbnail_requests: Arc<Mutex<Vec<GenerateThumbnailRequest>>>,
}

impl Default for MockEncoder {
    fn default() -> Self {
        Self {
            presets: Vec::new(),
            fail_encoding: None,
            fail_after_datagrams: None,
            end_marker: None,
            thumbnail: Bytes::from_static(b"\xff\xd8\xff\xe0JFIF-thumbnail\xff\xd9"),
            thumbnail_ending: ThumbnailEnding::Eof,
            encode_requests: Arc::default(),
            thumbnail_requests: Arc::default(),
        }
    }
}

impl MockEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_presets(mut self, presets: Vec<Preset>) -> Self {
        self.presets = presets;
        self
    }

    /// Answer every encode call with an error status after the header.
    pub fn failing_encoding(mut self, message: &str) -> Self {
        self.fail_encoding = Some(message.to_string());
        self
    }

    /// Echo `count` datagrams, then answer with an error status.
    pub fn failing_after(mut self, count: usize, message: &str) -> Self {
        self.fail_after_datagrams = Some((count, message.to_string()));
        self
    }

    /// Send `marker` as a last datagram when the input ends cleanly. A call
    /// the client drops mid-stream never gets it.
    pub fn finalizing_with(mut self, marker: &[u8]) -> Self {
        self.end_marker = Some(Bytes::copy_from_slice(marker));
        self
    }

    pub fn with_thumbnail(mut self, image: &[u8]) -> Self {
        self.thumbnail = Bytes::copy_from_slice(image);
        self
    }

    pub fn thumbnail_ending(mut self, ending: ThumbnailEnding) -> Self {
        self.thumbnail_ending = ending;
        self
    }

    pub fn thumbnail_image(&self) -> Bytes {
        self.thumbnail.clone()
    }

    /// Encode requests received so far, across all calls
    pub fn encode_requests(&self) -> Vec<EncodeVideoRequest> {
        self.encode_requests.lock().clone()
    }

    pub fn thumbnail_requests(&self) -> Vec<GenerateThumbnailRequest> {
        self.thumbnail_requests.lock().clone()
    }
}

#[tonic::async_trait]
impl EncoderService for MockEncoder {
    type EncodeVideoStream = ResponseStream<EncodeVideoResponse>;
    type GenerateThumbnailStream = ResponseStream<GenerateThumbnailResponse>;

    async fn list_presets(
        &self,
        _request: Request<ListPresetsRequest>,
    ) -> std::result::Result<Response<ListPresetsResponse>, Status> {
        Ok(Response::new(ListPresetsResponse {
            presets: self.presets.iter().cloned().map(Into::into).collect(),
        }))
    }

    async fn encode_video(
        &self,
        request: Request<Streaming<EncodeVideoRequest>>,
    ) -> std::result::Result<Response<Self::EncodeVideoStream>, Status> {
        let mut inbound = request.into_inner();
        let recorded = Arc::clone(&self.encode_requests);
        let fail_encoding = self.fail_encoding.clone();
        let fail_after = self.fail_after_datagrams.clone();
        let end_marker = self.end_marker.clone();
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            let mut header_seen = false;
            let mut echoed = 0usize;
            let mut last_offset = 0u64;

            loop {
                let message = match inbound.message().await {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        if let Some(marker) = end_marker {
                            let _ = tx.send(Ok(encoded_datagram(last_offset, marker.to_vec()))).await;
                        }
                        break;
                    }
                    Err(_) => break,
                };
                recorded.lock().push(message.clone());
                let reply = match message.part {
                    Some(encode_video_request::Part::Header(_)) if header_seen => {
                        Err(Status::invalid_argument("header sent twice"))
                    }
                    Some(encode_video_request::Part::Header(_)) => {
                        header_seen = true;
                        match &fail_encoding {
                            Some(message) => Err(Status::internal(message.clone())),
                            None => continue,
                        }
                    }
                    Some(encode_video_request::Part::Datagram(_)) if !header_seen => {
                        Err(Status::invalid_argument("datagram before header"))
                    }
                    Some(encode_video_request::Part::Datagram(datagram)) => match &fail_after {
                        Some((count, message)) if echoed >= *count => {
                            Err(Status::internal(message.clone()))
                        }
                        _ => {
                            echoed += 1;
                            last_offset = datagram.offset + datagram.payload.len() as u64;
                            Ok(encoded_datagram(
                                datagram.offset,
                                datagram.payload.to_ascii_uppercase(),
                            ))
                        }
                    },
                    None => Err(Status::invalid_argument("empty request")),
                };

                let failed = reply.is_err();
                if tx.send(reply).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx)) as Self::EncodeVideoStream))
    }

    async fn generate_thumbnail(
        &self,
        request: Request<Streaming<GenerateThumbnailRequest>>,
    ) -> std::result::Result<Response<Self::GenerateThumbnailStream>, Status> {
        let mut inbound = request.into_inner();
        let recorded = Arc::clone(&self.thumbnail_requests);
        let image = self.thumbnail.clone();
        let ending = self.thumbnail_ending;
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            while let Ok(Some(message)) = inbound.message().await {
                let is_header = matches!(
                    message.part,
                    Some(generate_thumbnail_request::Part::Header(_))
                );
                recorded.lock().push(message);

                if is_header && ending == ThumbnailEnding::FailAfterHeader {
                    let _ = tx.send(Err(Status::internal("thumbnail generation failed"))).await;
                    return;
                }
            }

            if ending == ThumbnailEnding::Stall {
                // Hold the call open until the client drops it
                tx.closed().await;
                return;
            }

            // Image in two halves once the whole source has arrived
            let (first, second) = image.split_at(image.len() / 2);
            for part in [first, second] {
                let reply = GenerateThumbnailResponse {
                    part: Some(generate_thumbnail_response::Part::Datagram(
                        generate_thumbnail_response::Datagram {
                            offset: 0,
                            payload: part.to_vec(),
                        },
                    )),
                };
                if tx.send(Ok(reply)).await.is_err() {
                    return;
                }
            }

            if ending == ThumbnailEnding::BrokenPipe {
                let _ = tx
                    .send(Err(Status::unavailable("write tcp 127.0.0.1: write: broken pipe")))
                    .await;
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx)) as Self::GenerateThumbnailStream))
    }
}

fn encoded_datagram(offset: u64, payload: Vec<u8>) -> EncodeVideoResponse {
    EncodeVideoResponse {
        part: Some(encode_video_response::Part::Datagram(
            encode_video_response::Datagram { offset, payload },
        )),
    }
}

async fn bind_loopback() -> Result<(SocketAddr, TcpListenerStream)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Internal(format!("failed to bind test listener: {e}")))?;
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Internal(format!("failed to read test listener address: {e}")))?;
    Ok((addr, TcpListenerStream::new(listener)))
}

/// Serve `storage` on a loopback port for the rest of the runtime's life.
pub async fn spawn_storage(storage: MockStorage) -> Result<GrpcAddress> {
    let (addr, incoming) = bind_loopback().await?;
    tokio::spawn(
        Server::builder()
            .add_service(VideoStorageServiceServer::new(storage))
            .serve_with_incoming(incoming),
    );
    format!("http://{addr}").parse()
}

/// Serve `encoder` on a loopback port for the rest of the runtime's life.
pub async fn spawn_encoder(encoder: MockEncoder) -> Result<GrpcAddress> {
    let (addr, incoming) = bind_loopback().await?;
    tokio::spawn(
        Server::builder()
            .add_service(EncoderServiceServer::new(encoder))
            .serve_with_incoming(incoming),
    );
    format!("http://{addr}").parse()
}

/// Serve both mocks and return upstreams pointing at them.
pub async fn spawn_upstreams(storage: MockStorage, encoder: MockEncoder) -> Result<Arc<Upstreams>> {
    let storage = spawn_storage(storage).await?;
    let encoder = spawn_encoder(encoder).await?;
    Ok(Arc::new(
        Upstreams::new(storage, encoder).with_connect_timeout(Duration::from_secs(5)),
    ))
}
