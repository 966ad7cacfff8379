//! # gatehouse-av
//!
//! Wrappers around the external tools gatehouse depends on:
//!
//! - Tool discovery with config overrides ([`ToolRegistry`])
//! - Async process execution with timeout, cancellation and kill-on-drop
//!   ([`ToolCommand`])
//! - Page rasterization methods (`pdftoppm`, `mutool`)
//! - ffprobe duration probing, ffmpeg HLS packaging and thumbnails
//!
//! Missing binaries surface as [`Error::ToolNotFound`] so callers can fall
//! back instead of failing.

pub mod command;
mod error;
pub mod raster;
pub mod tools;
pub mod transcode;

pub use command::{ToolCommand, ToolOutput};
pub use error::{Error, Result};
pub use raster::{RasterMethod, RasterOptions};
pub use tools::{ToolInfo, ToolRegistry, ToolsConfig};
pub use transcode::{HlsOptions, Watermark, WatermarkPosition};
