//! DTVault Protocol Definitions
//!
//! Protobuf contracts of the storage and encoder services that the relay
//! talks to. Package names match the deployed services; prost resolves
//! cross-package references with `super::`, so the module tree mirrors the
//! package tree and the useful parts are re-exported at the crate root.

pub mod shibafu528 {
    #[allow(clippy::all)]
    #[allow(warnings)]
    pub mod dtvault {
        tonic::include_proto!("shibafu528.dtvault");

        // Storage API
        pub mod storage {
            tonic::include_proto!("shibafu528.dtvault.storage");
        }

        // Encoder API
        pub mod encoder {
            tonic::include_proto!("shibafu528.dtvault.encoder");
        }
    }
}

pub use shibafu528::dtvault::{encoder, storage, Preset, Video};
