//! Track identity and timing metadata, recovered from raw captures.
//!
//! Each captured stream lives in a recording directory as `<ssrc>` (raw
//! log), `<ssrc>.index` and, once recovered, `<ssrc>.metadata`. The
//! metadata file is a plain JSON rendering of [`Track`] so the schema is
//! an explicit contract rather than anything introspected at runtime.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{BigEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use webrtc::rtcp::source_description::{SdesType, SourceDescription};
use webrtc::util::Unmarshal;

use crate::constants::{
    RECORD_RTP, STREAM_INDEX_SUFFIX, STREAM_METADATA_SUFFIX,
};
use crate::error::{ExtractError, Result};
use crate::index::StreamIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Everything known about one captured track.
///
/// `start_ms`/`end_ms` are wall-clock milliseconds since the epoch; the
/// descriptive fields come from RTCP source-description records and may
/// legitimately be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub ssrc: String,
    pub kind: Option<MediaKind>,
    pub payload_type: Option<u8>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub cname: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub tool: Option<String>,
    pub note: Option<String>,
    #[serde(skip)]
    pub log_path: PathBuf,
    #[serde(skip)]
    pub index_path: PathBuf,
}

impl Track {
    fn empty(dir: &Path, ssrc: &str) -> Track {
        Track {
            ssrc: ssrc.to_owned(),
            kind: None,
            payload_type: None,
            start_ms: None,
            end_ms: None,
            cname: None,
            name: None,
            email: None,
            phone: None,
            location: None,
            tool: None,
            note: None,
            log_path: dir.join(ssrc),
            index_path: dir.join(format!("{ssrc}{STREAM_INDEX_SUFFIX}")),
        }
    }

    /// True when every field required for playback is present.
    fn is_complete(&self) -> bool {
        self.start_ms.is_some() && self.end_ms.is_some() && self.payload_type.is_some()
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ms.unwrap_or(0)
    }

    pub fn end_ms(&self) -> i64 {
        self.end_ms.unwrap_or(0)
    }

    /// Track length in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.end_ms() - self.start_ms()
    }
}

/// Static payload type assignment, used only to label a track's kind
/// when the capture carries a well-known type.
fn kind_of_payload_type(pt: u8) -> Option<MediaKind> {
    match pt {
        0..=23 => Some(MediaKind::Audio),
        24..=34 => Some(MediaKind::Video),
        _ => None,
    }
}

/// Directory-scoped metadata store: resolves tracks, scanning raw
/// captures only when the cache is missing or incomplete.
#[derive(Default)]
pub struct MetadataStore {
    scans: AtomicU64,
}

impl MetadataStore {
    pub fn new() -> MetadataStore {
        MetadataStore::default()
    }

    /// Number of raw scans performed so far. A warm cache keeps this at
    /// zero across repeated `recover` calls.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Returns the track's metadata, recovering it from the raw log and
    /// index when no complete cached copy exists. A recovery writes the
    /// cache file for future calls.
    pub fn recover(&self, dir: &Path, ssrc: &str) -> Result<Track> {
        let cache_path = dir.join(format!("{ssrc}{STREAM_METADATA_SUFFIX}"));
        if let Some(track) = load_cache(&cache_path, dir, ssrc) {
            if track.is_complete() {
                return Ok(track);
            }
        }

        self.scans.fetch_add(1, Ordering::Relaxed);
        let track = self.scan(dir, ssrc)?;

        // The cache write is idempotent; a failure here only costs a
        // re-scan next time.
        match serde_json::to_vec_pretty(&track) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&cache_path, json) {
                    warn!("[metadata] cache write failed for {ssrc}: {e}");
                }
            }
            Err(e) => warn!("[metadata] cache encode failed for {ssrc}: {e}"),
        }
        Ok(track)
    }

    fn scan(&self, dir: &Path, ssrc: &str) -> Result<Track> {
        let mut track = Track::empty(dir, ssrc);

        let mut log = File::open(&track.log_path)
            .map_err(|e| ExtractError::from_io(e, &track.log_path))?;
        let secs = log.read_u32::<BigEndian>()? as i64;
        let usecs = log.read_u32::<BigEndian>()? as i64;
        let start_ms = secs * 1000 + usecs / 1000;
        track.start_ms = Some(start_ms);

        let mut index = StreamIndex::open(&track.index_path)?;
        if let Some(last) = index.last()? {
            track.end_ms = Some(start_ms + last.offset_ms);
        } else {
            track.end_ms = Some(start_ms);
        }

        let scan_from = index.first()?.map(|e| e.position);
        if let Some(pos) = scan_from {
            finish_scan(scan_records(&mut log, pos, &mut track), &track.log_path)?;
        }
        track.kind = track.payload_type.and_then(kind_of_payload_type);

        debug!(
            "[metadata] recovered {ssrc}: start={start_ms} duration={}ms pt={:?} cname={:?}",
            track.duration_ms(),
            track.payload_type,
            track.cname
        );
        Ok(track)
    }
}

fn load_cache(path: &Path, dir: &Path, ssrc: &str) -> Option<Track> {
    let file = File::open(path).ok()?;
    let mut track: Track = serde_json::from_reader(BufReader::new(file)).ok()?;
    track.log_path = dir.join(ssrc);
    track.index_path = dir.join(format!("{ssrc}{STREAM_INDEX_SUFFIX}"));
    Some(track)
}

/// Truncation mid-record is the normal end of a capture and leaves the
/// remaining fields unset; any other failure aborts the recovery so an
/// incomplete track is never cached.
fn finish_scan(result: std::io::Result<()>, path: &Path) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            debug!("[metadata] scan of {} reached end of log", path.display());
            Ok(())
        }
        Err(e) => Err(ExtractError::from_io(e, path)),
    }
}

/// Walks framed records from `pos`, filling the payload type from the
/// first media record and the descriptive fields from control records.
/// Stops once the payload type, cname and name are all known, or at EOF.
fn scan_records(log: &mut File, pos: u64, track: &mut Track) -> std::io::Result<()> {
    log.seek(SeekFrom::Start(pos))?;
    loop {
        if track.payload_type.is_some() && track.cname.is_some() && track.name.is_some() {
            return Ok(());
        }
        let length = log.read_u16::<BigEndian>()? as usize;
        let record_type = log.read_u16::<BigEndian>()?;
        let _offset_ms = log.read_u32::<BigEndian>()?;
        let mut payload = vec![0u8; length];
        log.read_exact(&mut payload)?;

        if record_type == RECORD_RTP {
            if track.payload_type.is_none() {
                let mut buf = &payload[..];
                if let Ok(packet) = webrtc::rtp::packet::Packet::unmarshal(&mut buf) {
                    track.payload_type = Some(packet.header.payload_type);
                }
            }
        } else {
            apply_source_description(&payload, track);
        }
    }
}

/// Pulls SDES items out of an RTCP compound packet. Corrupt control
/// packets are ignored.
fn apply_source_description(payload: &[u8], track: &mut Track) {
    let mut buf = payload;
    let packets = match webrtc::rtcp::packet::unmarshal(&mut buf) {
        Ok(packets) => packets,
        Err(_) => return,
    };
    for packet in packets {
        let Some(sdes) = packet.as_any().downcast_ref::<SourceDescription>() else {
            continue;
        };
        for chunk in &sdes.chunks {
            for item in &chunk.items {
                let text = String::from_utf8_lossy(&item.text).into_owned();
                if text.is_empty() {
                    continue;
                }
                let slot = match item.sdes_type {
                    SdesType::SdesCname => &mut track.cname,
                    SdesType::SdesName => &mut track.name,
                    SdesType::SdesEmail => &mut track.email,
                    SdesType::SdesPhone => &mut track.phone,
                    SdesType::SdesLocation => &mut track.location,
                    SdesType::SdesTool => &mut track.tool,
                    SdesType::SdesNote => &mut track.note,
                    _ => continue,
                };
                if slot.is_none() {
                    *slot = Some(text);
                }
            }
        }
        // One source-description block is enough for a single-SSRC log.
        return;
    }
}
