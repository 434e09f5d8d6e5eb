//! gRPC addressing and dialing of the storage and encoder services
//!
//! Every session dials its own channel; nothing here is cached or shared
//! between requests.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use dtvault_proto::encoder::{encoder_service_client::EncoderServiceClient, ListPresetsRequest};
use dtvault_proto::storage::video_storage_service_client::VideoStorageServiceClient;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::error::{Error, Result};
use crate::media::Preset;

/// Largest message accepted from either service (16 MB).
/// Storage and encoder send 1 MB datagrams; the margin covers larger peers.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Parsed service address: `http://host:port` dials plaintext,
/// `https://host:port` dials TLS with the platform's root certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcAddress {
    authority: String,
    tls: bool,
}

impl GrpcAddress {
    /// `host[:port]` part of the address
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls
    }

    #[must_use]
    pub fn uri(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}", self.authority)
    }

    /// Build a tonic endpoint with keepalive and, for `https`, TLS settings.
    pub fn endpoint(&self, connect_timeout: Duration) -> Result<Endpoint> {
        let mut endpoint = Endpoint::from_shared(self.uri())
            .map_err(|e| Error::Config(format!("Invalid endpoint URI {self}: {e}")))?
            .connect_timeout(connect_timeout)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .http2_keep_alive_interval(Duration::from_secs(30))
            .keep_alive_timeout(Duration::from_secs(10));

        if self.tls {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
        }

        Ok(endpoint)
    }

    /// Dial the address and wait for the connection to be established.
    pub async fn connect(&self, connect_timeout: Duration) -> Result<Channel> {
        let channel = self
            .endpoint(connect_timeout)?
            .connect()
            .await
            .map_err(|e| Error::ConnectionFailure(format!("Failed to connect to {self}: {e}")))?;

        debug!(address = %self, "Established gRPC connection");
        Ok(channel)
    }
}

impl FromStr for GrpcAddress {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw.trim())
            .map_err(|e| Error::Config(format!("'{raw}' is not a URL: {e}")))?;

        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(Error::Config(format!(
                    "unsupported scheme '{other}' in '{raw}' (expected http or https)"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Config(format!("'{raw}' has no host")))?;

        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Self { authority, tls })
    }
}

impl fmt::Display for GrpcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Addresses of the two services the relay depends on, handed explicitly to
/// every component that dials them.
#[derive(Debug, Clone)]
pub struct Upstreams {
    pub storage: GrpcAddress,
    pub encoder: GrpcAddress,
    pub connect_timeout: Duration,
}

impl Upstreams {
    #[must_use]
    pub const fn new(storage: GrpcAddress, encoder: GrpcAddress) -> Self {
        Self {
            storage,
            encoder,
            connect_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        let storage = config.storage_address.parse()?;
        let encoder = config.encoder_address.parse()?;
        Ok(Self::new(storage, encoder).with_connect_timeout(config.connect_timeout()))
    }

    /// Dial the storage ("central") service.
    pub async fn storage_client(&self) -> Result<VideoStorageServiceClient<Channel>> {
        let channel = self.storage.connect(self.connect_timeout).await?;
        Ok(VideoStorageServiceClient::new(channel).max_decoding_message_size(MAX_MESSAGE_SIZE))
    }

    /// Dial the encoder service.
    pub async fn encoder_client(&self) -> Result<EncoderServiceClient<Channel>> {
        let channel = self.encoder.connect(self.connect_timeout).await?;
        Ok(EncoderServiceClient::new(channel).max_decoding_message_size(MAX_MESSAGE_SIZE))
    }

    /// Dial the encoder and fetch its preset catalog.
    pub async fn list_presets(&self) -> Result<Vec<Preset>> {
        let mut client = self.encoder_client().await?;
        fetch_presets(&mut client).await
    }
}

/// Call `EncoderService.ListPresets` on an established client.
pub async fn fetch_presets(client: &mut EncoderServiceClient<Channel>) -> Result<Vec<Preset>> {
    let response = client
        .list_presets(ListPresetsRequest {})
        .await
        .map_err(|status| {
            Error::ConnectionFailure(format!("EncoderService.ListPresets failed: {status}"))
        })?;

    Ok(response
        .into_inner()
        .presets
        .into_iter()
        .map(Preset::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plaintext_address() {
        let addr: GrpcAddress = "http://central:50051".parse().unwrap();
        assert_eq!(addr.authority(), "central:50051");
        assert!(!addr.is_tls());
        assert_eq!(addr.uri(), "http://central:50051");
    }

    #[test]
    fn test_parse_tls_address() {
        let addr: GrpcAddress = "https://encoder.example.com".parse().unwrap();
        assert_eq!(addr.authority(), "encoder.example.com");
        assert!(addr.is_tls());
        assert_eq!(addr.to_string(), "https://encoder.example.com");
    }

    #[test]
    fn test_parse_ignores_path_and_whitespace() {
        let addr: GrpcAddress = " http://127.0.0.1:9000/ignored ".parse().unwrap();
        assert_eq!(addr.uri(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_parse_rejects_bad_addresses() {
        assert!(matches!("central:50051".parse::<GrpcAddress>(), Err(Error::Config(_))));
        assert!(matches!("grpc://central:50051".parse::<GrpcAddress>(), Err(Error::Config(_))));
        assert!(matches!("not a url".parse::<GrpcAddress>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_upstreams_from_config() {
        let config = UpstreamConfig {
            storage_address: "http://central:50051".to_string(),
            encoder_address: "http://encoder:50052".to_string(),
            connect_timeout_seconds: 3,
        };
        let upstreams = Upstreams::from_config(&config).unwrap();
        assert_eq!(upstreams.storage.authority(), "central:50051");
        assert_eq!(upstreams.encoder.authority(), "encoder:50052");
        assert_eq!(upstreams.connect_timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Port 1 on loopback is never served in test environments
        let addr: GrpcAddress = "http://127.0.0.1:1".parse().unwrap();
        let err = addr.connect(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailure(_)));
    }
}
