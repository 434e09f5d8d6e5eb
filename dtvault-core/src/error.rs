use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Stream protocol error: {0}")]
    StreamProtocol(String),

    #[error("Stream transport error: {0}")]
    StreamTransport(#[from] tonic::Status),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Status to answer with while the response head is still undecided.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::PresetNotFound(_) | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Self::ConnectionFailure(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
