//! HLS media playlist handling.
//!
//! Packages on disk carry a plain VOD manifest with relative URIs. At serve
//! time the manifest is parsed, optionally cut at a preview boundary, and
//! rendered with every URI rewritten for the requesting caller.

mod playlist;

pub use playlist::{KeyTag, MediaPlaylist, Segment};
