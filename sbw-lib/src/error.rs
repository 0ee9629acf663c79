use crate::decode::Decoded;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Too many authentication failures with no successful block. The
    /// partial decode state is included so callers can still report the
    /// ledger for the blocks that were attempted.
    #[error("{failures} authentication failures before any block succeeded; key is likely wrong")]
    KeyLikelyWrong { failures: u32, partial: Box<Decoded> },
}

pub type Result<T> = std::result::Result<T, Error>;
