//! Timestamp-ordered merge of raw packets, used by the legacy export
//! where payloads must survive byte for byte.

use crate::error::Result;
use crate::metadata::Track;

use super::{earliest, max_live_offset, Constituent, MediaStream, StreamPacket};

pub struct PassthroughGroup {
    constituents: Vec<Constituent>,
}

impl PassthroughGroup {
    /// `tracks` pairs each track with its timeline offset (shift
    /// included) and its index within the request's selection.
    pub fn open(tracks: &[(&Track, i64, usize)]) -> Result<PassthroughGroup> {
        let constituents = tracks
            .iter()
            .map(|&(track, offset_ms, index)| Constituent::open(track, offset_ms, index))
            .collect::<Result<Vec<_>>>()?;
        Ok(PassthroughGroup { constituents })
    }
}

impl MediaStream for PassthroughGroup {
    fn seek(&mut self, window_start_ms: i64) -> Result<()> {
        for c in &mut self.constituents {
            c.seek(window_start_ms)?;
        }
        Ok(())
    }

    fn offset_ms(&self) -> i64 {
        max_live_offset(&self.constituents)
    }

    fn read_next(&mut self) -> Result<Option<StreamPacket>> {
        let Some(i) = earliest(&mut self.constituents)? else {
            return Ok(None);
        };
        let c = &mut self.constituents[i];
        let correction = c.correction_ns;
        let track = c.track;
        let packet = match c.take() {
            Some(packet) => packet,
            None => return Ok(None),
        };
        Ok(Some(StreamPacket {
            timestamp_ns: packet.timestamp_ns + correction,
            payload: packet.raw,
            marker: packet.marker,
            track,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataStore;
    use crate::testutil::{write_capture, CapturePacket};

    #[test]
    fn merges_two_tracks_by_composite_time() {
        let dir = tempfile::tempdir().unwrap();
        // Track A starts 100 ms after track B.
        write_capture(
            dir.path(),
            "A",
            10, // 10_100 ms epoch start
            100_000,
            &[
                CapturePacket::rtp(0, 96, true, b"a0"),
                CapturePacket::rtp(80, 96, true, b"a1"),
            ],
        );
        write_capture(
            dir.path(),
            "B",
            10,
            0,
            &[
                CapturePacket::rtp(0, 96, true, b"b0"),
                CapturePacket::rtp(40, 96, true, b"b1"),
                CapturePacket::rtp(120, 96, true, b"b2"),
            ],
        );
        let store = MetadataStore::new();
        let a = store.recover(dir.path(), "A").unwrap();
        let b = store.recover(dir.path(), "B").unwrap();

        let mut group = PassthroughGroup::open(&[(&a, 100, 0), (&b, 0, 1)]).unwrap();
        group.seek(0).unwrap();

        let mut order = Vec::new();
        while let Some(packet) = group.read_next().unwrap() {
            order.push((packet.track, packet.timestamp_ns / 1_000_000));
        }
        // b0@0 b1@40 a0@100 b2@120 a1@180
        assert_eq!(order, vec![(1, 0), (1, 40), (0, 100), (1, 120), (0, 180)]);
    }
}
