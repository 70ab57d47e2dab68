//! FLV multiplexer.
//!
//! Tag layout follows the FLV 1.0 specification: a 9-byte file header,
//! an `onMetaData` script tag declaring duration and canvas size up
//! front, then one tag per composite packet. Audio is carried as 16-bit
//! little-endian linear PCM at 44100 Hz mono, matching the mixer's
//! fixed output format.

use std::io::{ErrorKind, Write};

use byteorder::{BigEndian, WriteBytesExt};
use tracing::debug;

use crate::error::Result;
use crate::extract::{CompositePacket, PacketKind};

use super::{ContainerSink, SinkHints, SinkStatus};

const TAG_AUDIO: u8 = 0x08;
const TAG_VIDEO: u8 = 0x09;
const TAG_SCRIPT: u8 = 0x12;

// Sound header: linear PCM little-endian, 44 kHz, 16-bit, mono.
const AUDIO_TAG_HEADER: u8 = (3 << 4) | (3 << 2) | (1 << 1);
const FRAME_KEY: u8 = 1;
const FRAME_INTER: u8 = 2;
const VIDEO_CODEC_ID: u8 = 2;

pub struct FlvSink {
    out: Box<dyn Write + Send>,
    /// Added to every tag timestamp so players show the position within
    /// the whole recording.
    offset_ms: i64,
    closed: bool,
}

impl FlvSink {
    pub fn new(out: Box<dyn Write + Send>) -> FlvSink {
        FlvSink {
            out,
            offset_ms: 0,
            closed: false,
        }
    }

    fn write_tag(&mut self, tag_type: u8, timestamp_ms: i64, body: &[u8]) -> std::io::Result<()> {
        let ts = timestamp_ms.max(0) as u32;
        self.out.write_u8(tag_type)?;
        self.out.write_u24::<BigEndian>(body.len() as u32)?;
        self.out.write_u24::<BigEndian>(ts & 0x00ff_ffff)?;
        self.out.write_u8((ts >> 24) as u8)?;
        self.out.write_u24::<BigEndian>(0)?; // stream id
        self.out.write_all(body)?;
        self.out.write_u32::<BigEndian>(11 + body.len() as u32)?;
        Ok(())
    }
}

fn amf_string(out: &mut Vec<u8>, s: &str) {
    out.write_u16::<BigEndian>(s.len() as u16).unwrap();
    out.extend_from_slice(s.as_bytes());
}

fn amf_number_entry(out: &mut Vec<u8>, key: &str, value: f64) {
    amf_string(out, key);
    out.push(0x00); // number marker
    out.write_f64::<BigEndian>(value).unwrap();
}

fn metadata_body(hints: &SinkHints) -> Vec<u8> {
    let mut entries = Vec::new();
    let mut count = 1u32;
    amf_number_entry(&mut entries, "duration", hints.duration_ms as f64 / 1000.0);
    if let (Some(w), Some(h)) = (hints.width, hints.height) {
        amf_number_entry(&mut entries, "width", w as f64);
        amf_number_entry(&mut entries, "height", h as f64);
        count += 2;
    }

    let mut body = Vec::new();
    body.push(0x02); // string marker
    amf_string(&mut body, "onMetaData");
    body.push(0x08); // ECMA array marker
    body.write_u32::<BigEndian>(count).unwrap();
    body.extend_from_slice(&entries);
    body.extend_from_slice(&[0x00, 0x00, 0x09]); // object end
    body
}

impl ContainerSink for FlvSink {
    fn start(&mut self, hints: &SinkHints) -> Result<()> {
        self.offset_ms = hints.offset_ms;
        let flags = (hints.has_audio as u8) << 2 | hints.has_video as u8;
        self.out.write_all(b"FLV")?;
        self.out.write_u8(1)?;
        self.out.write_u8(flags)?;
        self.out.write_u32::<BigEndian>(9)?; // data offset
        self.out.write_u32::<BigEndian>(0)?; // first prev-tag size
        self.write_tag(TAG_SCRIPT, 0, &metadata_body(hints))?;
        Ok(())
    }

    fn write(&mut self, packet: &CompositePacket) -> Result<SinkStatus> {
        if self.closed {
            return Ok(SinkStatus::Done);
        }
        let timestamp_ms = packet.timestamp_ns / 1_000_000 + self.offset_ms;
        let mut body = Vec::with_capacity(packet.payload.len() + 1);
        match packet.kind {
            PacketKind::Audio => body.push(AUDIO_TAG_HEADER),
            PacketKind::Video => {
                let frame_type = if packet.marker { FRAME_KEY } else { FRAME_INTER };
                body.push(frame_type << 4 | VIDEO_CODEC_ID);
            }
        }
        body.extend_from_slice(&packet.payload);
        let tag_type = match packet.kind {
            PacketKind::Audio => TAG_AUDIO,
            PacketKind::Video => TAG_VIDEO,
        };
        match self.write_tag(tag_type, timestamp_ms, &body) {
            Ok(()) => Ok(SinkStatus::Continue),
            Err(e) if disconnected(&e) => {
                debug!("[sink] flv consumer disconnected: {e}");
                self.closed = true;
                Ok(SinkStatus::Done)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn finish(&mut self) -> Result<()> {
        if !self.closed {
            self.out.flush()?;
        }
        Ok(())
    }
}

fn disconnected(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
