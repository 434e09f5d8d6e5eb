//! Framing of streamed videos
//!
//! Every stream exchanged with storage and encoder carries one header frame
//! followed by offset-tagged datagrams. Offsets are cumulative byte counts:
//! the first datagram sits at 0 and each next one starts where the previous
//! payload ended.

use bytes::Bytes;
use dtvault_proto::encoder::{encode_video_request, EncodeVideoRequest};
use dtvault_proto::storage::{get_video_response, GetVideoResponse};

use crate::error::{Error, Result};
use crate::media::VideoDescriptor;

/// Payload tagged with its position in the whole stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub offset: u64,
    pub payload: Bytes,
}

/// One message on a framed stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<H> {
    Header(H),
    Datagram(Datagram),
}

impl TryFrom<GetVideoResponse> for Frame<VideoDescriptor> {
    type Error = Error;

    fn try_from(response: GetVideoResponse) -> Result<Self> {
        match response.part {
            Some(get_video_response::Part::Header(video)) => Ok(Self::Header(video.into())),
            Some(get_video_response::Part::Datagram(datagram)) => Ok(Self::Datagram(Datagram {
                offset: datagram.offset,
                payload: Bytes::from(datagram.payload),
            })),
            None => Err(Error::StreamProtocol(
                "GetVideo response carries neither header nor datagram".to_string(),
            )),
        }
    }
}

/// Running total of payload bytes sent on one stream.
#[derive(Debug, Default)]
pub struct OffsetCounter {
    sent: u64,
}

impl OffsetCounter {
    /// Offset for a payload of `len` bytes, advancing the total past it.
    pub fn advance(&mut self, len: usize) -> u64 {
        let offset = self.sent;
        self.sent += len as u64;
        offset
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.sent
    }
}

/// Guards the header-before-datagram rule of a framed stream.
#[derive(Debug, Default)]
pub struct FrameOrder {
    header_seen: bool,
}

impl FrameOrder {
    pub fn header(&mut self) -> Result<()> {
        if self.header_seen {
            return Err(Error::StreamProtocol("header received twice".to_string()));
        }
        self.header_seen = true;
        Ok(())
    }

    pub fn datagram(&self) -> Result<()> {
        if self.header_seen {
            Ok(())
        } else {
            Err(Error::StreamProtocol("datagram received before header".to_string()))
        }
    }

    #[must_use]
    pub const fn header_seen(&self) -> bool {
        self.header_seen
    }
}

pub fn encode_header(total_length: u64, preset_id: &str) -> EncodeVideoRequest {
    EncodeVideoRequest {
        part: Some(encode_video_request::Part::Header(encode_video_request::Header {
            total_length,
            preset_id: preset_id.to_string(),
        })),
    }
}

pub fn encode_datagram(offset: u64, payload: Bytes) -> EncodeVideoRequest {
    EncodeVideoRequest {
        part: Some(encode_video_request::Part::Datagram(encode_video_request::Datagram {
            offset,
            payload: Vec::from(payload),
        })),
    }
}
