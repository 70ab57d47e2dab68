//! Reconstructs time-aligned composite media from per-SSRC RTP capture
//! logs: metadata recovery from the raw packet stream, multi-track
//! synchronization with approximate seek, spatial/amplitude mixing,
//! paced interleaving, and export to FLV or the legacy chunked format.

pub mod codec;
pub mod constants;
pub mod error;
pub mod extract;
pub mod index;
pub mod metadata;
pub mod mixer;
pub mod reader;
pub mod sink;
pub mod source;
pub mod timeline;

#[cfg(test)]
mod testutil;

pub use error::{ExtractError, Result};
pub use extract::{CompositePacket, ExtractionRequest, Extractor, PacketKind, VideoSelection};
pub use metadata::{MediaKind, MetadataStore, Track};
pub use mixer::VideoLayout;
