//! Destinations for the interleaved composite stream.

mod flv;
mod vcr;

pub use flv::FlvSink;
pub use vcr::VcrSink;

use std::io::Write;

use crate::error::{ExtractError, Result};
use crate::extract::CompositePacket;
use crate::metadata::Track;

pub const CONTENT_TYPE_FLV: &str = "video/x-flv";
pub const CONTENT_TYPE_VCR: &str = "application/x-agvcr";

/// What the sink wants the pipeline to do after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Continue,
    /// The downstream consumer is gone; stop at this packet boundary.
    Done,
}

/// Everything a container may want to declare before the first packet.
#[derive(Debug, Clone)]
pub struct SinkHints {
    /// Length of the requested window, ms.
    pub duration_ms: i64,
    /// Absolute wall-clock ms of the window start.
    pub start_ms: i64,
    /// Window start relative to the beginning of the recording, ms.
    pub offset_ms: i64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_audio: bool,
    pub has_video: bool,
    /// Selected tracks in selection order; packet track indices refer
    /// into this list. The first `video_tracks` entries are video.
    pub tracks: Vec<Track>,
    pub video_tracks: usize,
}

pub trait ContainerSink: Send {
    fn start(&mut self, hints: &SinkHints) -> Result<()>;
    fn write(&mut self, packet: &CompositePacket) -> Result<SinkStatus>;
    fn finish(&mut self) -> Result<()>;
}

/// Builds the sink for a content type, or Unsupported.
pub fn create(
    content_type: &str,
    out: Box<dyn Write + Send>,
) -> Result<Box<dyn ContainerSink>> {
    match content_type {
        CONTENT_TYPE_FLV => Ok(Box::new(FlvSink::new(out))),
        CONTENT_TYPE_VCR => Ok(Box::new(VcrSink::new(out))),
        other => Err(ExtractError::Unsupported(format!(
            "no multiplexer for content type {other}"
        ))),
    }
}

/// True when the container carries captured packets verbatim instead of
/// mixed media.
pub fn is_raw(content_type: &str) -> bool {
    content_type == CONTENT_TYPE_VCR
}
