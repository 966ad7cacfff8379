//! Video package builder.
//!
//! Probes the duration, transcodes to (optionally encrypted) HLS and falls
//! back to a passthrough package when ffmpeg is missing or fails. Packages
//! are built in a staging directory and swapped into place whole, and the
//! outcome is recorded with a guarded state transition.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatehouse_av::transcode::{self, generate_key};
use gatehouse_av::{HlsOptions, ToolRegistry, Watermark, WatermarkPosition};
use gatehouse_common::storage::swap_dir_into_place;
use gatehouse_common::{Error, Result, StorageLayout, VideoId};
use gatehouse_db::models::PackageState;
use gatehouse_db::pool::{get_conn, DbPool};
use gatehouse_db::queries::videos::{self, PackageOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::package::{build_passthrough, Package};
use crate::config::VideoConfig;

/// The external tools the pipeline drives.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn probe_duration(&self, input: &Path) -> gatehouse_av::Result<Option<f64>>;

    async fn package_hls(
        &self,
        input: &Path,
        out_dir: &Path,
        options: &HlsOptions,
    ) -> gatehouse_av::Result<()>;

    async fn thumbnail(&self, input: &Path, output: &Path) -> gatehouse_av::Result<()>;
}

/// [`Transcoder`] backed by ffmpeg and ffprobe.
pub struct FfmpegTranscoder {
    tools: Arc<ToolRegistry>,
    probe_timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            probe_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe_duration(&self, input: &Path) -> gatehouse_av::Result<Option<f64>> {
        transcode::probe_duration(&self.tools, input, self.probe_timeout).await
    }

    async fn package_hls(
        &self,
        input: &Path,
        out_dir: &Path,
        options: &HlsOptions,
    ) -> gatehouse_av::Result<()> {
        transcode::transcode_hls(&self.tools, input, out_dir, options).await
    }

    async fn thumbnail(&self, input: &Path, output: &Path) -> gatehouse_av::Result<()> {
        transcode::extract_thumbnail(&self.tools, input, output, self.probe_timeout).await
    }
}

/// Packaging settings taken from the `[video]` config section.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub segment_seconds: u32,
    pub encrypt: bool,
    pub watermark_position: WatermarkPosition,
    pub timeout: Duration,
}

impl From<&VideoConfig> for PipelineSettings {
    fn from(config: &VideoConfig) -> Self {
        Self {
            segment_seconds: config.segment_seconds,
            encrypt: config.encrypt,
            watermark_position: config.watermark_position,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

pub struct VideoPipeline {
    db: DbPool,
    storage: Arc<StorageLayout>,
    transcoder: Arc<dyn Transcoder>,
    settings: PipelineSettings,
    cancel: CancellationToken,
}

impl VideoPipeline {
    pub fn new(
        db: DbPool,
        storage: Arc<StorageLayout>,
        transcoder: Arc<dyn Transcoder>,
        settings: PipelineSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            storage,
            transcoder,
            settings,
            cancel,
        }
    }

    /// Build the package for one video.
    ///
    /// Returns `Ok(None)` when the video was not pending (another run owns
    /// it, or it is already built).
    pub async fn process(&self, id: VideoId) -> Result<Option<PackageState>> {
        let video = {
            let conn = get_conn(&self.db)?;
            if !videos::claim_for_processing(&conn, id)? {
                debug!(video_id = %id, "Video not pending, skipping");
                return Ok(None);
            }
            videos::get_video(&conn, id)?.ok_or_else(|| Error::not_found("video", id))?
        };

        info!(video_id = %id, title = %video.title, "Building video package");

        let original = self.storage.video_original(id, &video.source_format);
        let duration = match self.transcoder.probe_duration(&original).await {
            Ok(Some(d)) => Some(d),
            Ok(None) => video.duration_seconds,
            Err(e) => {
                debug!(video_id = %id, error = %e, "Duration probe failed, using upload value");
                video.duration_seconds
            }
        };

        let staging = self.storage.package_staging_dir(id);
        let key = self.settings.encrypt.then(generate_key);
        let options = HlsOptions {
            segment_seconds: self.settings.segment_seconds,
            key,
            watermark: video.watermark_text.clone().map(|text| Watermark {
                text,
                position: self.settings.watermark_position,
            }),
            timeout: self.settings.timeout,
            cancel: self.cancel.clone(),
        };

        let transcoded = match self.transcoder.package_hls(&original, &staging, &options).await {
            Ok(()) => verify_staged(&staging).await,
            Err(e) => Err(Error::from(e)),
        };
        let built = match transcoded {
            Ok(()) => Ok((PackageState::Segmented, key.is_some())),
            Err(e) => {
                remove_quietly(&staging).await;
                if self.cancel.is_cancelled() {
                    // Left in `processing`; startup recovery re-queues it.
                    return Err(Error::internal("package build cancelled by shutdown"));
                }
                warn!(video_id = %id, error = %e, "Transcode failed, building passthrough package");
                build_passthrough(&original, &staging, &video.source_format, duration)
                    .await
                    .map(|()| (PackageState::Passthrough, false))
            }
        };

        let built = match built {
            Ok(done) => self.swap_into_place(id, &staging).await.map(|()| done),
            Err(e) => Err(e),
        };

        let outcome = match built {
            Ok((state, encrypted)) => {
                let has_thumbnail = self.make_thumbnail(id, &original).await;
                PackageOutcome {
                    state,
                    encrypted,
                    has_thumbnail,
                    duration_seconds: duration,
                    error_message: None,
                }
            }
            Err(e) => {
                error!(video_id = %id, error = %e, "Video package build failed");
                remove_quietly(&staging).await;
                PackageOutcome {
                    state: PackageState::Failed,
                    encrypted: false,
                    has_thumbnail: false,
                    duration_seconds: duration,
                    error_message: Some(e.to_string()),
                }
            }
        };

        let conn = get_conn(&self.db)?;
        if !videos::finish_processing(&conn, id, &outcome)? {
            warn!(video_id = %id, "Video left processing before the build finished");
        }
        info!(video_id = %id, state = %outcome.state, "Video package finished");
        Ok(Some(outcome.state))
    }

    async fn swap_into_place(&self, id: VideoId, staging: &Path) -> Result<()> {
        let staging = staging.to_path_buf();
        let dest = self.storage.package_dir(id);
        tokio::task::spawn_blocking(move || swap_dir_into_place(&staging, &dest))
            .await
            .map_err(|e| Error::internal(format!("package swap task failed: {e}")))??;
        Ok(())
    }

    async fn make_thumbnail(&self, id: VideoId, original: &Path) -> bool {
        let output = self.storage.thumbnail(id);
        match self.transcoder.thumbnail(original, &output).await {
            Ok(()) => true,
            Err(e) => {
                warn!(video_id = %id, error = %e, "Thumbnail extraction failed");
                false
            }
        }
    }
}

/// A transcode that exits cleanly can still leave files out of the package.
async fn verify_staged(staging: &Path) -> Result<()> {
    Package::open(staging).await?.verify().await
}

async fn remove_quietly(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %dir.display(), error = %e, "Failed to remove staging directory");
        }
    }
}
