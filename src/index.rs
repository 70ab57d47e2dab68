//! Random-access index over a captured stream log.
//!
//! The capture side appends one fixed 16-byte entry per distinct packet
//! timestamp: a big-endian i64 offset in milliseconds from the stream
//! start followed by the i64 byte position of the matching record in the
//! raw log. Entries are strictly increasing in both fields, which makes
//! the file binary-searchable without loading it.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use crate::constants::INDEX_ENTRY_LEN;
use crate::error::{ExtractError, Result};

/// One entry of the index: time offset to byte position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Milliseconds from the track's start time.
    pub offset_ms: i64,
    /// Byte position of the record in the raw log.
    pub position: u64,
}

#[derive(Debug)]
pub struct StreamIndex {
    file: File,
    entries: u64,
}

impl StreamIndex {
    pub fn open(path: &Path) -> Result<StreamIndex> {
        let file = File::open(path).map_err(|e| ExtractError::from_io(e, path))?;
        let len = file
            .metadata()
            .map_err(|e| ExtractError::from_io(e, path))?
            .len();
        Ok(StreamIndex {
            file,
            entries: len / INDEX_ENTRY_LEN,
        })
    }

    fn read_entry(&mut self, n: u64) -> Result<IndexEntry> {
        self.file.seek(SeekFrom::Start(n * INDEX_ENTRY_LEN))?;
        let offset_ms = self.file.read_i64::<BigEndian>()?;
        let position = self.file.read_i64::<BigEndian>()? as u64;
        Ok(IndexEntry {
            offset_ms,
            position,
        })
    }

    /// First indexed record, if any.
    pub fn first(&mut self) -> Result<Option<IndexEntry>> {
        if self.entries == 0 {
            return Ok(None);
        }
        self.read_entry(0).map(Some)
    }

    /// Last indexed record; its offset is the track duration.
    pub fn last(&mut self) -> Result<Option<IndexEntry>> {
        if self.entries == 0 {
            return Ok(None);
        }
        self.read_entry(self.entries - 1).map(Some)
    }

    /// Entry with the greatest offset that is `<= offset_ms`, or the very
    /// first entry when the request precedes the whole index. Seek is
    /// therefore approximate: the caller compensates with the returned
    /// entry's actual offset.
    pub fn lookup(&mut self, offset_ms: i64) -> Result<Option<IndexEntry>> {
        if self.entries == 0 {
            return Ok(None);
        }
        let mut lo = 0u64;
        let mut hi = self.entries - 1;
        let mut best = self.read_entry(0)?;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.read_entry(mid)?;
            if entry.offset_ms <= offset_ms {
                best = entry;
                lo = mid + 1;
            } else {
                if mid == 0 {
                    break;
                }
                hi = mid - 1;
            }
        }
        Ok(Some(best))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn write_index(path: &Path, entries: &[(i64, u64)]) {
        let mut out = Vec::new();
        for (offset, pos) in entries {
            out.write_i64::<BigEndian>(*offset).unwrap();
            out.write_i64::<BigEndian>(*pos as i64).unwrap();
        }
        let mut file = File::create(path).unwrap();
        file.write_all(&out).unwrap();
    }

    #[test]
    fn lookup_returns_entry_at_or_before_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1234.index");
        write_index(&path, &[(0, 14), (40, 200), (80, 420), (120, 700)]);

        let mut index = StreamIndex::open(&path).unwrap();
        assert_eq!(index.lookup(80).unwrap().unwrap().offset_ms, 80);
        assert_eq!(index.lookup(95).unwrap().unwrap().offset_ms, 80);
        assert_eq!(index.lookup(39).unwrap().unwrap().offset_ms, 0);
        // Requests before the first entry still land on the first entry.
        assert_eq!(index.lookup(-10).unwrap().unwrap().offset_ms, 0);
        // Requests past the end land on the last entry.
        assert_eq!(index.lookup(10_000).unwrap().unwrap().offset_ms, 120);
    }

    #[test]
    fn last_entry_gives_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1234.index");
        write_index(&path, &[(0, 14), (500, 90), (1500, 140)]);

        let mut index = StreamIndex::open(&path).unwrap();
        let last = index.last().unwrap().unwrap();
        assert_eq!(last.offset_ms, 1500);
        assert_eq!(last.position, 140);
    }

    #[test]
    fn missing_index_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = StreamIndex::open(&dir.path().join("nope.index")).unwrap_err();
        assert!(matches!(err, ExtractError::NotFound(_)));
    }
}
