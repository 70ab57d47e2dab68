//! Codec seams between captured payloads and the mixing pipeline.
//!
//! Compression itself is out of scope for the engine; decoders and the
//! video encoder are opaque trait objects selected by payload type, so a
//! deployment can plug in real codecs without touching the pipeline.
//! Built in: PCM mu-law and L16 audio, and an uncompressed planar YUV
//! video format used for raw captures.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ExtractError, Result};
use crate::reader::MediaPacket;

/// Payload type the uncompressed planar video codec is registered under
/// by default.
pub const RAW_VIDEO_PT: u8 = 96;

/// One decoded video frame, 4:2:0 planar.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

impl VideoFrame {
    /// Black frame of the given size. Dimensions must be even.
    pub fn black(width: u32, height: u32) -> VideoFrame {
        let luma = (width * height) as usize;
        let chroma = luma / 4;
        VideoFrame {
            width,
            height,
            y: vec![16; luma],
            u: vec![128; chroma],
            v: vec![128; chroma],
        }
    }
}

/// Turns one packet's payload into signed 16-bit mono samples at the
/// decoder's native rate.
pub trait AudioDecoder: Send {
    fn sample_rate(&self) -> u32;
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>>;
}

/// Reassembles packets into frames; a frame completes on the packet
/// carrying the marker bit.
pub trait VideoDecoder: Send {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Option<VideoFrame>>;
}

/// Serializes a composited frame into the byte form the sink carries.
pub trait VideoEncoder: Send {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Bytes>;
}

/// ITU G.711 mu-law, 8 kHz mono.
pub struct PcmuDecoder;

fn mulaw_to_linear(sample: u8) -> i16 {
    let sample = !sample;
    let sign = sample & 0x80;
    let exponent = (sample >> 4) & 0x07;
    let mantissa = (sample & 0x0f) as i16;
    let magnitude = (((mantissa << 3) + 0x84) << exponent) - 0x84;
    if sign != 0 {
        -magnitude
    } else {
        magnitude
    }
}

impl AudioDecoder for PcmuDecoder {
    fn sample_rate(&self) -> u32 {
        8000
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>> {
        Ok(payload.iter().map(|&b| mulaw_to_linear(b)).collect())
    }
}

/// L16: network-order 16-bit linear PCM.
pub struct L16Decoder {
    rate: u32,
}

impl AudioDecoder for L16Decoder {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>> {
        Ok(payload
            .chunks_exact(2)
            .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }
}

/// Uncompressed planar 4:2:0 video. Every packet of a frame carries the
/// same header (u16 width, u16 height, big-endian) followed by a slice
/// of the plane data; the marker packet completes the frame.
#[derive(Default)]
pub struct RawVideoDecoder {
    pending: Vec<u8>,
}

impl VideoDecoder for RawVideoDecoder {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Option<VideoFrame>> {
        if packet.payload.len() < 4 {
            return Ok(None);
        }
        self.pending.extend_from_slice(&packet.payload[4..]);
        if !packet.marker {
            return Ok(None);
        }
        let width = u16::from_be_bytes([packet.payload[0], packet.payload[1]]) as u32;
        let height = u16::from_be_bytes([packet.payload[2], packet.payload[3]]) as u32;
        let data = std::mem::take(&mut self.pending);
        let luma = (width * height) as usize;
        let chroma = luma / 4;
        if data.len() < luma + 2 * chroma {
            // Lost packets left the frame short; drop it.
            return Ok(None);
        }
        Ok(Some(VideoFrame {
            width,
            height,
            y: data[..luma].to_vec(),
            u: data[luma..luma + chroma].to_vec(),
            v: data[luma + chroma..luma + 2 * chroma].to_vec(),
        }))
    }
}

/// Counterpart of [`RawVideoDecoder`]: one encoded blob per frame.
#[derive(Default)]
pub struct RawVideoEncoder;

impl VideoEncoder for RawVideoEncoder {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(4 + frame.y.len() + frame.u.len() + frame.v.len());
        out.put_u16(frame.width as u16);
        out.put_u16(frame.height as u16);
        out.put_slice(&frame.y);
        out.put_slice(&frame.u);
        out.put_slice(&frame.v);
        Ok(out.freeze())
    }
}

type AudioFactory = fn() -> Box<dyn AudioDecoder>;
type VideoFactory = fn() -> Box<dyn VideoDecoder>;

/// Payload-type keyed decoder registry.
pub struct CodecRegistry {
    audio: HashMap<u8, AudioFactory>,
    video: HashMap<u8, VideoFactory>,
}

impl Default for CodecRegistry {
    fn default() -> CodecRegistry {
        let mut audio: HashMap<u8, AudioFactory> = HashMap::new();
        audio.insert(0, || Box::new(PcmuDecoder));
        audio.insert(10, || Box::new(L16Decoder { rate: 44100 }));
        audio.insert(11, || Box::new(L16Decoder { rate: 44100 }));
        let mut video: HashMap<u8, VideoFactory> = HashMap::new();
        video.insert(RAW_VIDEO_PT, || Box::<RawVideoDecoder>::default());
        CodecRegistry { audio, video }
    }
}

impl CodecRegistry {
    pub fn register_audio(&mut self, payload_type: u8, factory: AudioFactory) {
        self.audio.insert(payload_type, factory);
    }

    pub fn register_video(&mut self, payload_type: u8, factory: VideoFactory) {
        self.video.insert(payload_type, factory);
    }

    pub fn audio_decoder(&self, payload_type: u8) -> Result<Box<dyn AudioDecoder>> {
        self.audio
            .get(&payload_type)
            .map(|f| f())
            .ok_or_else(|| {
                ExtractError::Unsupported(format!("no audio codec for payload type {payload_type}"))
            })
    }

    pub fn video_decoder(&self, payload_type: u8) -> Result<Box<dyn VideoDecoder>> {
        self.video
            .get(&payload_type)
            .map(|f| f())
            .ok_or_else(|| {
                ExtractError::Unsupported(format!("no video codec for payload type {payload_type}"))
            })
    }

    pub fn video_encoder(&self) -> Box<dyn VideoEncoder> {
        Box::<RawVideoEncoder>::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mulaw_known_values() {
        // 0xFF encodes zero; 0x00/0x80 are the extreme magnitudes.
        assert_eq!(mulaw_to_linear(0xff), 0);
        assert_eq!(mulaw_to_linear(0x00), -32124);
        assert_eq!(mulaw_to_linear(0x80), 32124);
    }

    #[test]
    fn l16_decodes_network_order() {
        let mut decoder = L16Decoder { rate: 44100 };
        let samples = decoder.decode(&[0x01, 0x00, 0xff, 0x00]).unwrap();
        assert_eq!(samples, vec![256, -256]);
    }

    #[test]
    fn raw_video_reassembles_on_marker() {
        use bytes::Bytes;
        let frame = VideoFrame::black(16, 16);
        let mut encoder = RawVideoEncoder;
        let blob = encoder.encode(&frame).unwrap();

        // Split the blob into two packets sharing the header.
        let header = &blob[..4];
        let body = &blob[4..];
        let half = body.len() / 2;
        let mut p1 = header.to_vec();
        p1.extend_from_slice(&body[..half]);
        let mut p2 = header.to_vec();
        p2.extend_from_slice(&body[half..]);

        let mut decoder = RawVideoDecoder::default();
        let packet = |payload: Vec<u8>, marker| crate::reader::MediaPacket {
            timestamp_ns: 0,
            payload_type: RAW_VIDEO_PT,
            marker,
            sequence_number: 0,
            rtp_timestamp: 0,
            payload: Bytes::from(payload),
            raw: Bytes::new(),
        };
        assert!(decoder.decode(&packet(p1, false)).unwrap().is_none());
        let out = decoder.decode(&packet(p2, true)).unwrap().unwrap();
        assert_eq!(out.width, 16);
        assert_eq!(out.height, 16);
        assert_eq!(out.y, frame.y);
        assert_eq!(out.u, frame.u);
        assert_eq!(out.v, frame.v);
    }

    #[test]
    fn unknown_payload_type_is_unsupported() {
        let registry = CodecRegistry::default();
        assert!(matches!(
            registry.audio_decoder(42),
            Err(ExtractError::Unsupported(_))
        ));
    }
}
