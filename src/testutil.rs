//! Builders for synthetic capture directories used across unit tests.

use std::io::Write;
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};
use bytes::Bytes;
use webrtc::rtcp::source_description::{
    SdesType, SourceDescription, SourceDescriptionChunk, SourceDescriptionItem,
};
use webrtc::util::Marshal;

use crate::constants::{RECORD_RTCP, RECORD_RTP};

pub struct CapturePacket {
    pub offset_ms: i64,
    pub record_type: u16,
    pub bytes: Vec<u8>,
}

impl CapturePacket {
    pub fn rtp(offset_ms: i64, payload_type: u8, marker: bool, payload: &[u8]) -> CapturePacket {
        let packet = webrtc::rtp::packet::Packet {
            header: webrtc::rtp::header::Header {
                version: 2,
                payload_type,
                marker,
                sequence_number: (offset_ms as u16).wrapping_mul(7),
                timestamp: offset_ms as u32,
                ssrc: 1,
                ..Default::default()
            },
            payload: Bytes::copy_from_slice(payload),
        };
        CapturePacket {
            offset_ms,
            record_type: RECORD_RTP,
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
            record_type: RECORD_RTCP,
            bytes: sdes.marshal().unwrap().to_vec(),
        }
    }
}

/// Writes `<dir>/<ssrc>` and `<dir>/<ssrc>.index` holding the given
/// packets, with one index entry per record.
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
