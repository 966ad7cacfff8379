//! Gatehouse-Media: document splitting and HLS manifest handling.
//!
//! - [`document`]: parse PDFs with lopdf, count pages from the page tree and
//!   extract standalone single-page documents
//! - [`hls`]: parse, truncate and rewrite VOD media playlists

pub mod document;
pub mod error;
pub mod hls;

pub use document::PdfDocument;
pub use error::{Error, Result};
pub use hls::{MediaPlaylist, Segment};
