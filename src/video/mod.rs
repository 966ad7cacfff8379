//! Video packaging, lookup and preview enforcement.

pub mod package;
pub mod pipeline;
pub mod preview;
pub mod worker;

pub use package::{Package, PackageEntry};
pub use pipeline::{FfmpegTranscoder, PipelineSettings, Transcoder, VideoPipeline};
pub use preview::{ByteWindow, PlayerAction, PreviewClamp, PreviewInfo, PreviewWindow};
pub use worker::{recover, spawn_workers, VideoQueue};
