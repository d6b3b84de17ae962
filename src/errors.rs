use thiserror::Error;

/// Failure kinds for the fetch/unpack core.
///
/// Everything here is caught at the per-ref boundary in `clone`:
/// one ref failing to download, unpack or check out never aborts the
/// other refs.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("malformed ref advertisement: {0}")]
    Protocol(String),

    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid pack: {0}")]
    InvalidPack(String),

    #[error("no base object {0} for delta")]
    MissingBase(String),

    #[error("object {0} not found")]
    MissingObject(String),
}
