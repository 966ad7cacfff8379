//! Error types for gatehouse-media.

use std::io;
use thiserror::Error;

/// Result type for gatehouse-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for gatehouse-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The bytes are not a usable PDF.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// A page number outside the document.
    #[error("Page {page} out of range (document has {total} pages)")]
    PageOutOfRange { page: u32, total: u32 },

    /// A manifest that does not parse as an HLS media playlist.
    #[error("Invalid playlist: {0}")]
    InvalidPlaylist(String),
}

impl Error {
    /// Create an invalid document error.
    pub fn invalid_document(msg: impl Into<String>) -> Self {
        Self::InvalidDocument(msg.into())
    }

    /// Create an invalid playlist error.
    pub fn invalid_playlist(msg: impl Into<String>) -> Self {
        Self::InvalidPlaylist(msg.into())
    }
}

impl From<Error> for gatehouse_common::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => gatehouse_common::Error::from(e),
            Error::InvalidDocument(msg) => gatehouse_common::Error::MalformedSource(msg),
            Error::PageOutOfRange { page, .. } => gatehouse_common::Error::not_found("unit", page),
            Error::InvalidPlaylist(msg) => {
                gatehouse_common::Error::internal(format!("corrupt package manifest: {msg}"))
            }
        }
    }
}
