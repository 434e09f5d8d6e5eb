// DTVault relay core
//
// Streams recordings from the storage service to HTTP clients, optionally
// re-encoding them through the encoder service, and bridges a storage read
// into the encoder's thumbnail generator.
//
// Architecture:
// - framing / media: wire frames and the domain values carried by them
// - sink: HTTP response writer with a commit-on-first-byte head
// - emitter: passthrough or transcoding consumer of a chunk stream
// - relay: per-request orchestration of storage -> emitter -> sink
// - thumbnail: two-legged storage -> encoder bridge with cancellation

pub mod bootstrap;
pub mod config;
pub mod emitter;
pub mod error;
pub mod framing;
pub mod grpc;
pub mod logging;
pub mod media;
pub mod relay;
pub mod sink;
pub mod test_helpers;
pub mod thumbnail;

pub use config::Config;
pub use emitter::Emitter;
pub use error::{Error, Result};
pub use grpc::{GrpcAddress, Upstreams};
pub use media::{Preset, VideoDescriptor};
pub use relay::{StreamRelay, StreamRequest};
pub use sink::{PendingResponse, ResponseSink};
pub use thumbnail::{BridgeState, ThumbnailBridge, ThumbnailSpec};
