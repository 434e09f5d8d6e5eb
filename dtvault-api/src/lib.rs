// DTVault HTTP API
//
// Serves video downloads, transcoded streams and thumbnails on top of
// dtvault-core.

pub mod http;

pub use http::{create_router, AppState};
