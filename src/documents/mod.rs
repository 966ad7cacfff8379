//! Paginated documents: upload-time splitting and page images.

pub mod paginator;
pub mod placeholder;
pub mod rasterizer;

pub use paginator::{check_committed, check_ready, paginate, UploadMeta};
pub use rasterizer::{ConvertSummary, RasterOutput, RasterSource, Rasterizer};
