//! Byte-level file delivery.
//!
//! Used for unit PDFs, page images and video package files. Every gated
//! file goes through [`serve_file`] so range handling and byte ceilings are
//! enforced in one place.

mod direct;

pub use direct::{determine_content_type, parse_range_header, serve_file, ByteLimit};
