//! Domain values carried by the storage and encoder contracts

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Metadata of one stored video, delivered once by the storage header frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDescriptor {
    pub id: String,
    pub total_length: u64,
    pub mime_type: String,
    pub file_name: String,
}

impl From<dtvault_proto::Video> for VideoDescriptor {
    fn from(video: dtvault_proto::Video) -> Self {
        Self {
            id: video.video_id,
            total_length: video.total_length,
            mime_type: video.mime_type,
            file_name: video.file_name,
        }
    }
}

/// Named transcoding configuration from the encoder's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub preset_id: String,
    pub title: String,
    pub command: String,
}

impl From<dtvault_proto::Preset> for Preset {
    fn from(preset: dtvault_proto::Preset) -> Self {
        Self {
            preset_id: preset.preset_id,
            title: preset.title,
            command: preset.command,
        }
    }
}

impl From<Preset> for dtvault_proto::Preset {
    fn from(preset: Preset) -> Self {
        Self {
            preset_id: preset.preset_id,
            title: preset.title,
            command: preset.command,
        }
    }
}

/// Linear lookup of `preset_id` in a catalog.
pub fn find_preset<'a>(catalog: &'a [Preset], preset_id: &str) -> Result<&'a Preset> {
    catalog
        .iter()
        .find(|p| p.preset_id == preset_id)
        .ok_or_else(|| Error::PresetNotFound(preset_id.to_string()))
}
