//! On-disk names and record framing constants for captured streams.

/// Suffix of the random-access index that accompanies each raw log.
pub const STREAM_INDEX_SUFFIX: &str = ".index";

/// Suffix of the cached per-stream metadata file.
pub const STREAM_METADATA_SUFFIX: &str = ".metadata";

/// Record type id of an RTP (media) packet inside a raw log.
pub const RECORD_RTP: u16 = 0;

/// Record type id of an RTCP (control) packet inside a raw log.
pub const RECORD_RTCP: u16 = 1;

/// Size of the raw log file header: seconds, microseconds, 4 reserved
/// address bytes and a reserved u16.
pub const LOG_HEADER_LEN: u64 = 14;

/// Size of the per-record header: u16 length, u16 type, u32 offset ms.
pub const RECORD_HEADER_LEN: u64 = 8;

/// Size of one index entry: i64 offset ms + i64 byte position.
pub const INDEX_ENTRY_LEN: u64 = 16;

/// Nanoseconds per millisecond; composite timestamps are carried in ns.
pub const NANOS_PER_MS: i64 = 1_000_000;
