//! Merges several captured tracks of one media kind into a single
//! logical stream with the same seek/read contract as one reader.

mod audio;
mod passthrough;
mod video;

pub use audio::AudioMixer;
pub use passthrough::PassthroughGroup;
pub use video::{frame_from_rgb, VideoLayout, VideoMixer};

use bytes::Bytes;
use tracing::trace;

use crate::constants::NANOS_PER_MS;
use crate::error::Result;
use crate::metadata::Track;
use crate::reader::{MediaPacket, TrackReader};

/// One packet in composite time: nanoseconds relative to the requested
/// window start, already corrected for approximate seek and per-track
/// timeline offset.
#[derive(Debug, Clone)]
pub struct StreamPacket {
    pub timestamp_ns: i64,
    pub payload: Bytes,
    pub marker: bool,
    /// Index of the owning track within the request's selection.
    pub track: usize,
}

/// Shared contract of the mixers and the passthrough group.
pub trait MediaStream: Send {
    /// Seeks every constituent so that subsequent packet timestamps are
    /// composite nanoseconds relative to `window_start_ms`.
    fn seek(&mut self, window_start_ms: i64) -> Result<()>;

    /// Greatest actual seek offset in ms over the constituents that
    /// still have data.
    fn offset_ms(&self) -> i64;

    /// Next packet in nondecreasing composite order, or `None` when
    /// every constituent is exhausted.
    fn read_next(&mut self) -> Result<Option<StreamPacket>>;
}

/// One underlying track of a mixed stream, holding the reader, the
/// track's place on the timeline and the seek correction.
pub(crate) struct Constituent {
    pub reader: TrackReader,
    /// Timeline offset plus the request's shift, in ms.
    pub offset_ms: i64,
    /// `actual - requested` from the last seek, in ns.
    pub correction_ns: i64,
    pub actual_ms: i64,
    pub pending: Option<MediaPacket>,
    pub exhausted: bool,
    pub track: usize,
}

impl Constituent {
    pub fn open(track: &Track, offset_ms: i64, index: usize) -> Result<Constituent> {
        Ok(Constituent {
            reader: TrackReader::open(track)?,
            offset_ms,
            correction_ns: 0,
            actual_ms: 0,
            pending: None,
            exhausted: false,
            track: index,
        })
    }

    /// Seeks the track to its own position for a composite window
    /// starting at `window_start_ms`.
    pub fn seek(&mut self, window_start_ms: i64) -> Result<()> {
        let requested = window_start_ms - self.offset_ms;
        let actual = self.reader.seek(requested)?;
        self.actual_ms = actual;
        self.correction_ns = (actual - requested) * NANOS_PER_MS;
        self.pending = None;
        self.exhausted = false;
        trace!(
            "[mixer] constituent {} seek requested={requested} actual={actual}",
            self.track
        );
        Ok(())
    }

    /// Composite timestamp of the next packet, filling the one-packet
    /// lookahead if needed.
    pub fn peek_ts(&mut self) -> Result<Option<i64>> {
        if self.pending.is_none() && !self.exhausted {
            match self.reader.read_next()? {
                Some(packet) => self.pending = Some(packet),
                None => self.exhausted = true,
            }
        }
        Ok(self
            .pending
            .as_ref()
            .map(|p| p.timestamp_ns + self.correction_ns))
    }

    pub fn take(&mut self) -> Option<MediaPacket> {
        self.pending.take()
    }
}

/// Index of the constituent with the smallest composite timestamp.
pub(crate) fn earliest(constituents: &mut [Constituent]) -> Result<Option<usize>> {
    let mut best: Option<(usize, i64)> = None;
    for (i, c) in constituents.iter_mut().enumerate() {
        if let Some(ts) = c.peek_ts()? {
            if best.map_or(true, |(_, t)| ts < t) {
                best = Some((i, ts));
            }
        }
    }
    Ok(best.map(|(i, _)| i))
}

pub(crate) fn max_live_offset(constituents: &[Constituent]) -> i64 {
    constituents
        .iter()
        .filter(|c| !c.exhausted)
        .map(|c| c.actual_ms)
        .max()
        .unwrap_or(0)
}
