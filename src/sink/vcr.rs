//! Legacy chunked binary exporter.
//!
//! The format is little-endian throughout: a 32-byte file header, four
//! fixed multicast source descriptors, then chunks of raw packets that
//! share one microsecond timestamp, each chunk header recording its own
//! file offset and the previous chunk's so readers can walk the file
//! backward from the footer. After the last chunk comes one source
//! description block per exported track and a 32-byte footer.

use std::io::{ErrorKind, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;

use crate::error::Result;
use crate::extract::{CompositePacket, PacketKind};
use crate::metadata::Track;

use super::{ContainerSink, SinkHints, SinkStatus};

const VERSION: u8 = 4;
const SOURCE_SLOTS: u8 = 4;
const HOST: &[u8] = b"224.0.0.1";
const BASE_PORT: u16 = 57004;
const TTL: u8 = 127;
/// Media/type ids of the four fixed slots.
const SLOT_MEDIA: [u8; 4] = [1, 1, 2, 2];
const SLOT_TYPE: [u8; 4] = [1, 2, 1, 2];

const FILE_HEADER_LEN: u64 = 32;
const DESCRIPTOR_LEN: u64 = 16 + HOST.len() as u64;
const CHUNK_HEADER_LEN: u32 = 32;
const MAX_CHUNK_PACKETS: u8 = 127;
const MAX_CHUNK_SIZE: u64 = 2 * i32::MAX as u64;

const MEDIA_AUDIO: u8 = 1;
const MEDIA_VIDEO: u8 = 2;

pub struct VcrSink {
    out: Box<dyn Write + Send>,
    written: u64,
    chunk: Vec<u8>,
    chunk_count: u8,
    chunk_ts_us: i64,
    chunk_open: bool,
    prev_chunk_pos: i64,
    tracks: Vec<Track>,
    video_tracks: usize,
    end_secs: i64,
    closed: bool,
}

impl VcrSink {
    pub fn new(out: Box<dyn Write + Send>) -> VcrSink {
        VcrSink {
            out,
            written: 0,
            chunk: Vec::new(),
            chunk_count: 0,
            chunk_ts_us: 0,
            chunk_open: false,
            prev_chunk_pos: 0,
            tracks: Vec::new(),
            video_tracks: 0,
            end_secs: 0,
            closed: false,
        }
    }

    fn emit(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.out.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn flush_chunk(&mut self) -> std::io::Result<()> {
        if !self.chunk_open {
            return Ok(());
        }
        let own = self.written as i64;
        let mut header = Vec::with_capacity(CHUNK_HEADER_LEN as usize);
        header.write_u16::<LittleEndian>(0).unwrap();
        header.write_u8(self.chunk_count).unwrap();
        header.write_u8(0).unwrap();
        header
            .write_u32::<LittleEndian>(CHUNK_HEADER_LEN + self.chunk.len() as u32)
            .unwrap();
        header.write_i64::<LittleEndian>(self.chunk_ts_us).unwrap();
        header.write_i64::<LittleEndian>(own).unwrap();
        header.write_i64::<LittleEndian>(self.prev_chunk_pos).unwrap();
        self.emit(&header)?;
        let body = std::mem::take(&mut self.chunk);
        self.emit(&body)?;
        self.prev_chunk_pos = own;
        self.chunk_count = 0;
        self.chunk_open = false;
        Ok(())
    }

    fn append_packet(&mut self, packet: &CompositePacket) -> std::io::Result<()> {
        let ts_us = packet.timestamp_ns / 1_000;
        let record_len = 8 + packet.payload.len() as u64;
        let full = self.chunk_count >= MAX_CHUNK_PACKETS
            || CHUNK_HEADER_LEN as u64 + self.chunk.len() as u64 + record_len > MAX_CHUNK_SIZE;
        if self.chunk_open && (ts_us != self.chunk_ts_us || full) {
            self.flush_chunk()?;
        }
        if !self.chunk_open {
            self.chunk_open = true;
            self.chunk_ts_us = ts_us;
        }

        let stream_flags = match packet.kind {
            PacketKind::Video => MEDIA_VIDEO,
            PacketKind::Audio => 0,
        };
        // Flags byte mirrors the RTP header: payload type, top bit for
        // the marker.
        let payload_type = if packet.payload.len() >= 2 {
            packet.payload[1] & 0x7f
        } else {
            0
        };
        let type_flags = payload_type | if packet.marker { 0x80 } else { 0 };

        self.chunk
            .write_u16::<LittleEndian>(0)
            .unwrap();
        self.chunk
            .write_u16::<LittleEndian>(packet.payload.len() as u16)
            .unwrap();
        self.chunk.write_u8(stream_flags).unwrap();
        self.chunk.write_u8(type_flags).unwrap();
        self.chunk
            .write_u16::<LittleEndian>(packet.track as u16)
            .unwrap();
        self.chunk.extend_from_slice(&packet.payload);
        self.chunk_count += 1;
        Ok(())
    }

    fn sdes_block(track: &Track, index: u32, media: u8) -> Vec<u8> {
        let item = |s: &Option<String>| -> Vec<u8> {
            s.as_deref().unwrap_or("").as_bytes().to_vec()
        };
        let items = [
            item(&track.cname),
            item(&track.name),
            item(&track.email),
            item(&track.phone),
            item(&track.location),
            item(&track.tool),
            item(&track.note),
        ];

        let mut block = Vec::new();
        block.write_u32::<LittleEndian>(index).unwrap();
        block.write_u8(track.payload_type.unwrap_or(0)).unwrap();
        block.write_u8(media).unwrap();
        block.write_u8(items[0].len() as u8).unwrap();
        block.extend_from_slice(&[0u8; 9]);
        block.write_u8(0).unwrap();
        for it in &items {
            block.write_u8(it.len() as u8).unwrap();
        }
        block.extend_from_slice(&[0u8; 8]);
        for it in &items {
            block.extend_from_slice(it);
        }
        // The cname repeats after the itemized fields.
        block.extend_from_slice(&items[0]);
        block
    }
}

impl ContainerSink for VcrSink {
    fn start(&mut self, hints: &SinkHints) -> Result<()> {
        self.tracks = hints.tracks.clone();
        self.video_tracks = hints.video_tracks;
        self.end_secs = self
            .tracks
            .iter()
            .map(|t| t.end_ms() / 1000)
            .max()
            .unwrap_or(0);
        let first_chunk = FILE_HEADER_LEN + SOURCE_SLOTS as u64 * DESCRIPTOR_LEN;

        let mut header = Vec::with_capacity(FILE_HEADER_LEN as usize);
        header.write_u8(VERSION).unwrap();
        header.write_u8(SOURCE_SLOTS).unwrap();
        header.write_u16::<LittleEndian>(0).unwrap();
        header.write_u8(2).unwrap(); // platform
        header.write_u8(2).unwrap(); // major
        header.write_u8(2).unwrap(); // minor
        header.write_u8(1).unwrap(); // update
        header
            .write_i64::<LittleEndian>(hints.start_ms / 1000)
            .unwrap();
        header.write_i64::<LittleEndian>(first_chunk as i64).unwrap();
        header.write_u8(0).unwrap(); // little-endian payloads
        header.write_u8(0).unwrap(); // description length
        header.extend_from_slice(&[0u8; 6]);
        self.emit(&header)?;

        for slot in 0..SOURCE_SLOTS as usize {
            let mut desc = Vec::with_capacity(DESCRIPTOR_LEN as usize);
            desc.write_u16::<LittleEndian>(0).unwrap();
            desc.write_u8(SLOT_MEDIA[slot]).unwrap();
            desc.write_u8(SLOT_TYPE[slot]).unwrap();
            desc.write_u8(HOST.len() as u8).unwrap();
            desc.write_u8(TTL).unwrap();
            desc.write_u16::<LittleEndian>(BASE_PORT + slot as u16)
                .unwrap();
            desc.write_u8(0).unwrap(); // description length
            desc.write_u8(0).unwrap(); // not encrypted
            desc.extend_from_slice(&[0u8; 6]);
            desc.extend_from_slice(HOST);
            self.emit(&desc)?;
        }
        Ok(())
    }

    fn write(&mut self, packet: &CompositePacket) -> Result<SinkStatus> {
        if self.closed {
            return Ok(SinkStatus::Done);
        }
        match self.append_packet(packet) {
            Ok(()) => Ok(SinkStatus::Continue),
            Err(e) if disconnected(&e) => {
                debug!("[sink] vcr consumer disconnected: {e}");
                self.closed = true;
                Ok(SinkStatus::Done)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush_chunk()?;
        let last_chunk = self.prev_chunk_pos;

        let mut sdes = Vec::new();
        for (i, track) in self.tracks.iter().enumerate() {
            let media = if i < self.video_tracks {
                MEDIA_VIDEO
            } else {
                MEDIA_AUDIO
            };
            sdes.extend_from_slice(&Self::sdes_block(track, i as u32, media));
        }
        let sdes_len = sdes.len() as u32;
        self.emit(&sdes)?;

        let participants = self.tracks.len() as u16;
        let mut footer = Vec::with_capacity(32);
        footer.write_u16::<LittleEndian>(0).unwrap();
        footer.write_u16::<LittleEndian>(participants).unwrap();
        footer.write_u32::<LittleEndian>(sdes_len).unwrap();
        footer.write_i64::<LittleEndian>(self.end_secs).unwrap();
        footer.write_i64::<LittleEndian>(last_chunk).unwrap();
        footer.write_u16::<LittleEndian>(participants).unwrap();
        footer.extend_from_slice(&[0u8; 6]);
        self.emit(&footer)?;
        self.out.flush()?;
        Ok(())
    }
}

fn disconnected(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
