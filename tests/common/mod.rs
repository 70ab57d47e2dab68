//! Synthetic capture directories and container walkers shared by the
//! integration tests.

use std::io::Write;
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};
use bytes::Bytes;
use webrtc::rtcp::source_description::{
    SdesType, SourceDescription, SourceDescriptionChunk, SourceDescriptionItem,
};
use webrtc::util::Marshal;

use rtpreplay::codec::{RawVideoEncoder, VideoEncoder, VideoFrame, RAW_VIDEO_PT};

pub struct CapturePacket {
    pub offset_ms: i64,
    pub record_type: u16,
    pub bytes: Vec<u8>,
}

pub fn rtp(offset_ms: i64, payload_type: u8, marker: bool, payload: &[u8]) -> CapturePacket {
    let packet = webrtc::rtp::packet::Packet {
        header: webrtc::rtp::header::Header {
            version: 2,
            payload_type,
            marker,
            sequence_number: (offset_ms as u16).wrapping_mul(3),
            timestamp: offset_ms as u32,
            ssrc: 7,
            ..Default::default()
        },
        payload: Bytes::copy_from_slice(payload),
    };
    CapturePacket {
        offset_ms,
        record_type: 0,
        bytes: packet.marshal().unwrap().to_vec(),
    }
}

pub fn sdes(offset_ms: i64, source: u32, cname: &str, name: &str) -> CapturePacket {
    let sdes = SourceDescription {
        chunks: vec![SourceDescriptionChunk {
            source,
            items: vec![
                SourceDescriptionItem {
                    sdes_type: SdesType::SdesCname,
                    text: Bytes::copy_from_slice(cname.as_bytes()),
                },
                SourceDescriptionItem {
                    sdes_type: SdesType::SdesName,
                    text: Bytes::copy_from_slice(name.as_bytes()),
                },
            ],
        }],
    };
    CapturePacket {
        offset_ms,
        record_type: 1,
        bytes: sdes.marshal().unwrap().to_vec(),
    }
}

/// One encoded frame of flat luma at the given capture offset.
pub fn video_frame(offset_ms: i64, luma: u8) -> CapturePacket {
    let mut frame = VideoFrame::black(16, 16);
    frame.y.fill(luma);
    let blob = RawVideoEncoder.encode(&frame).unwrap();
    rtp(offset_ms, RAW_VIDEO_PT, true, &blob)
}

/// 20 ms of constant-amplitude L16 at 44100 Hz.
pub fn audio_tone(offset_ms: i64, amplitude: i16) -> CapturePacket {
    let payload: Vec<u8> = std::iter::repeat(amplitude.to_be_bytes())
        .take(882)
        .flatten()
        .collect();
    rtp(offset_ms, 11, true, &payload)
}

pub fn write_capture(
    dir: &Path,
    ssrc: &str,
    start_secs: u32,
    start_usecs: u32,
    packets: &[CapturePacket],
) {
    let mut log = Vec::new();
    let mut index = Vec::new();

    log.write_u32::<BigEndian>(start_secs).unwrap();
    log.write_u32::<BigEndian>(start_usecs).unwrap();
    log.write_all(&[0u8; 6]).unwrap();

    for packet in packets {
        index.write_i64::<BigEndian>(packet.offset_ms).unwrap();
        index.write_i64::<BigEndian>(log.len() as i64).unwrap();
        log.write_u16::<BigEndian>(packet.bytes.len() as u16).unwrap();
        log.write_u16::<BigEndian>(packet.record_type).unwrap();
        log.write_u32::<BigEndian>(packet.offset_ms as u32).unwrap();
        log.write_all(&packet.bytes).unwrap();
    }

    std::fs::write(dir.join(ssrc), log).unwrap();
    std::fs::write(dir.join(format!("{ssrc}.index")), index).unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlvTag {
    pub tag_type: u8,
    pub timestamp_ms: u32,
    pub size: usize,
}

/// Walks an FLV byte stream and returns its tags in file order.
pub fn flv_tags(bytes: &[u8]) -> Vec<FlvTag> {
    assert_eq!(&bytes[..3], b"FLV");
    let mut tags = Vec::new();
    // 9-byte header, then each tag is preceded by a prev-tag size.
    let mut at = 9;
    while at + 15 <= bytes.len() {
        at += 4;
        let tag_type = bytes[at];
        let size =
            u32::from_be_bytes([0, bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize;
        let timestamp_ms = u32::from_be_bytes([
            bytes[at + 7],
            bytes[at + 4],
            bytes[at + 5],
            bytes[at + 6],
        ]);
        tags.push(FlvTag {
            tag_type,
            timestamp_ms,
            size,
        });
        at += 11 + size;
    }
    tags
}
