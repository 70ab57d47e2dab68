//! Common zero point across the tracks of one extraction.

use crate::error::{ExtractError, Result};
use crate::metadata::Track;

/// The earliest start time over the selected tracks plus any sync-only
/// tracks. A track's offset is how far after that zero point it begins;
/// sync-only tracks shift the zero point without contributing data.
#[derive(Debug, Clone, Copy)]
pub struct Timeline {
    earliest_start_ms: i64,
}

impl Timeline {
    pub fn compute<'a, I>(tracks: I) -> Result<Timeline>
    where
        I: IntoIterator<Item = &'a Track>,
    {
        let earliest = tracks.into_iter().map(|t| t.start_ms()).min();
        match earliest {
            Some(earliest_start_ms) => Ok(Timeline { earliest_start_ms }),
            None => Err(ExtractError::InvalidRequest(
                "no tracks selected".to_owned(),
            )),
        }
    }

    pub fn earliest_start_ms(&self) -> i64 {
        self.earliest_start_ms
    }

    /// Milliseconds between the timeline zero and this track's start.
    pub fn offset_ms(&self, track: &Track) -> i64 {
        track.start_ms() - self.earliest_start_ms
    }
}
