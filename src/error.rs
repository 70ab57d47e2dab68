use std::io;

/// Coarse error taxonomy surfaced to callers of the extraction engine.
///
/// A client disconnecting mid-stream is deliberately *not* represented
/// here: the pipeline stops at the next packet boundary and returns
/// normally.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// A selected track, its raw log or its index file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request itself is unusable (empty selection, bad window).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No multiplexer exists for the requested content type, or no codec
    /// is registered for a track's payload type.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A low-level I/O failure other than a missing file.
    #[error("io failure: {0}")]
    Io(#[from] io::Error),
}

impl ExtractError {
    /// Maps an I/O error on `path` to the taxonomy: a missing file is
    /// NotFound, anything else stays an I/O failure.
    pub fn from_io(err: io::Error, path: &std::path::Path) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            ExtractError::NotFound(path.display().to_string())
        } else {
            ExtractError::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
