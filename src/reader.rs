//! Sequential, seekable reader over one captured track.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use bytes::Bytes;
use tracing::trace;
use webrtc::util::Unmarshal;

use crate::constants::{LOG_HEADER_LEN, NANOS_PER_MS, RECORD_RTP};
use crate::error::{ExtractError, Result};
use crate::index::StreamIndex;
use crate::metadata::Track;

/// One media packet as read back from a capture, with its header fields
/// already parsed. `raw` is the RTP packet verbatim as captured; the
/// legacy exporter re-emits it untouched.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    /// Nanoseconds relative to the position of the last seek.
    pub timestamp_ns: i64,
    pub payload_type: u8,
    pub marker: bool,
    pub sequence_number: u16,
    pub rtp_timestamp: u32,
    /// RTP payload with the header stripped.
    pub payload: Bytes,
    /// The packet exactly as captured, header included.
    pub raw: Bytes,
}

pub struct TrackReader {
    log: File,
    index: StreamIndex,
    /// Offset in ms of the record the cursor was seeked to; reported
    /// timestamps are relative to this.
    base_ms: i64,
}

impl TrackReader {
    pub fn open(track: &Track) -> Result<TrackReader> {
        let log = File::open(&track.log_path)
            .map_err(|e| ExtractError::from_io(e, &track.log_path))?;
        let index = StreamIndex::open(&track.index_path)?;
        let mut reader = TrackReader {
            log,
            index,
            base_ms: 0,
        };
        reader.seek(0)?;
        Ok(reader)
    }

    /// Positions the cursor at the indexed record at or before
    /// `offset_ms` and returns the actual offset found. Subsequent
    /// packet timestamps are relative to that actual offset; the caller
    /// keeps externally-visible time consistent by adding
    /// `actual - requested` to each of them.
    pub fn seek(&mut self, offset_ms: i64) -> Result<i64> {
        match self.index.lookup(offset_ms)? {
            Some(entry) => {
                self.log.seek(SeekFrom::Start(entry.position))?;
                self.base_ms = entry.offset_ms;
            }
            None => {
                self.log.seek(SeekFrom::Start(LOG_HEADER_LEN))?;
                self.base_ms = 0;
            }
        }
        trace!("[reader] seek {offset_ms} -> {}", self.base_ms);
        Ok(self.base_ms)
    }

    /// Next media packet, or `None` at end of stream. Control records
    /// are skipped; a truncated trailing record is ordinary EOF.
    pub fn read_next(&mut self) -> Result<Option<MediaPacket>> {
        loop {
            let mut header = [0u8; 8];
            match self.log.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            let length = u16::from_be_bytes([header[0], header[1]]) as usize;
            let record_type = u16::from_be_bytes([header[2], header[3]]);
            let offset_ms =
                u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as i64;

            let mut raw = vec![0u8; length];
            match self.log.read_exact(&mut raw) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            if record_type != RECORD_RTP {
                continue;
            }
            let raw = Bytes::from(raw);
            let mut buf = &raw[..];
            let Ok(packet) = webrtc::rtp::packet::Packet::unmarshal(&mut buf) else {
                // Unparseable media record; skip rather than abort.
                continue;
            };
            return Ok(Some(MediaPacket {
                timestamp_ns: (offset_ms - self.base_ms) * NANOS_PER_MS,
                payload_type: packet.header.payload_type,
                marker: packet.header.marker,
                sequence_number: packet.header.sequence_number,
                rtp_timestamp: packet.header.timestamp,
                payload: packet.payload,
                raw,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataStore;
    use crate::testutil::{write_capture, CapturePacket};

    fn sample_track(dir: &std::path::Path) -> Track {
        write_capture(
            dir,
            "4001",
            100,
            0,
            &[
                CapturePacket::rtp(0, 96, false, b"p0"),
                CapturePacket::sdes(10, 4001, "c", "n"),
                CapturePacket::rtp(40, 96, false, b"p1"),
                CapturePacket::rtp(80, 96, true, b"p2"),
                CapturePacket::rtp(120, 96, false, b"p3"),
            ],
        );
        MetadataStore::new().recover(dir, "4001").unwrap()
    }

    #[test]
    fn reads_media_packets_in_order_skipping_control() {
        let dir = tempfile::tempdir().unwrap();
        let track = sample_track(dir.path());
        let mut reader = TrackReader::open(&track).unwrap();

        let mut stamps = Vec::new();
        while let Some(packet) = reader.read_next().unwrap() {
            stamps.push(packet.timestamp_ns);
        }
        assert_eq!(stamps, vec![0, 40_000_000, 80_000_000, 120_000_000]);
    }

    #[test]
    fn seek_lands_at_or_before_and_corrects() {
        let dir = tempfile::tempdir().unwrap();
        let track = sample_track(dir.path());
        let mut reader = TrackReader::open(&track).unwrap();

        let requested = 50;
        let actual = reader.seek(requested).unwrap();
        assert!(actual <= requested);
        assert_eq!(actual, 40);

        let first = reader.read_next().unwrap().unwrap();
        // Relative to the seek position, then corrected by the caller.
        assert_eq!(first.timestamp_ns, 0);
        let corrected_ms = first.timestamp_ns / 1_000_000 + actual;
        assert!(corrected_ms <= requested);
    }

    #[test]
    fn marker_and_payload_survive() {
        let dir = tempfile::tempdir().unwrap();
        let track = sample_track(dir.path());
        let mut reader = TrackReader::open(&track).unwrap();
        reader.seek(80).unwrap();
        let packet = reader.read_next().unwrap().unwrap();
        assert!(packet.marker);
        assert_eq!(&packet.payload[..], b"p2");
        assert_eq!(packet.payload_type, 96);
    }

    #[test]
    fn eof_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let track = sample_track(dir.path());
        let mut reader = TrackReader::open(&track).unwrap();
        reader.seek(i64::MAX / 2).unwrap();
        let last = reader.read_next().unwrap().unwrap();
        assert_eq!(last.timestamp_ns, 0);
        assert!(reader.read_next().unwrap().is_none());
        assert!(reader.read_next().unwrap().is_none());
    }
}
