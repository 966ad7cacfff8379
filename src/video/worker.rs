//! Package build queue.
//!
//! Uploads enqueue a video id. A dispatcher task pulls ids off an mpsc
//! channel and runs each build as its own task, at most `workers` at a time.

use std::sync::Arc;

use gatehouse_common::{Error, Result, VideoId};
use gatehouse_db::models::PackageState;
use gatehouse_db::pool::{get_conn, DbPool};
use gatehouse_db::queries::videos;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::pipeline::VideoPipeline;

/// Handle for submitting package builds.
#[derive(Debug, Clone)]
pub struct VideoQueue {
    tx: mpsc::UnboundedSender<VideoId>,
}

impl VideoQueue {
    pub fn enqueue(&self, id: VideoId) -> Result<()> {
        self.tx
            .send(id)
            .map_err(|_| Error::internal("video worker pool is not running"))
    }
}

/// Start the dispatcher. It stops when `cancel` fires or every queue handle
/// is dropped; running builds see the same token.
pub fn spawn_workers(
    pipeline: Arc<VideoPipeline>,
    workers: usize,
    cancel: CancellationToken,
) -> (VideoQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<VideoId>();
    let permits = Arc::new(Semaphore::new(workers.max(1)));

    let handle = tokio::spawn(async move {
        info!(workers, "Video worker pool started");
        loop {
            let id = tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = pipeline.process(id).await {
                    error!(video_id = %id, error = %e, "Video job failed");
                }
            });
        }
        info!("Video worker pool stopped");
    });

    (VideoQueue { tx }, handle)
}

/// Reset builds interrupted by a restart and queue everything pending.
pub fn recover(db: &DbPool, queue: &VideoQueue) -> Result<usize> {
    let conn = get_conn(db)?;
    let reset = videos::reset_orphaned_processing(&conn)?;
    if reset > 0 {
        info!(count = reset, "Reset interrupted video builds to pending");
    }

    let pending = videos::list_videos_by_state(&conn, PackageState::Pending)?;
    drop(conn);
    for video in &pending {
        queue.enqueue(video.id)?;
    }
    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::pipeline::{PipelineSettings, Transcoder};
    use async_trait::async_trait;
    use gatehouse_av::{HlsOptions, WatermarkPosition};
    use gatehouse_common::StorageLayout;
    use gatehouse_db::pool::init_memory_pool;
    use gatehouse_db::queries::videos::NewVideo;
    use std::path::Path;
    use std::time::Duration;

    struct NoTools;

    #[async_trait]
    impl Transcoder for NoTools {
        async fn probe_duration(&self, _input: &Path) -> gatehouse_av::Result<Option<f64>> {
            Ok(None)
        }

        async fn package_hls(&self, _: &Path, _: &Path, _: &HlsOptions) -> gatehouse_av::Result<()> {
            Err(gatehouse_av::Error::tool_not_found("ffmpeg"))
        }

        async fn thumbnail(&self, _: &Path, _: &Path) -> gatehouse_av::Result<()> {
            Err(gatehouse_av::Error::tool_not_found("ffmpeg"))
        }
    }

    fn add_video(db: &DbPool, storage: &StorageLayout) -> VideoId {
        let id = VideoId::new();
        let original = storage.video_original(id, "webm");
        std::fs::create_dir_all(original.parent().unwrap()).unwrap();
        std::fs::write(&original, b"webm bytes").unwrap();

        let conn = db.get().unwrap();
        videos::create_video(
            &conn,
            &NewVideo {
                id,
                title: "Queued",
                source_format: "webm",
                is_premium: false,
                preview_seconds: 0,
                duration_seconds: Some(3.0),
                watermark_text: None,
                storage_path: "",
            },
        )
        .unwrap();
        id
    }

    async fn wait_for_state(db: &DbPool, id: VideoId, state: PackageState) {
        for _ in 0..200 {
            let current = {
                let conn = db.get().unwrap();
                videos::get_video(&conn, id).unwrap().unwrap().package_state
            };
            if current == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("video {id} never reached {state}");
    }

    #[tokio::test]
    async fn recovery_requeues_interrupted_builds() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(StorageLayout::new(dir.path()));
        let db = init_memory_pool().unwrap();

        let interrupted = add_video(&db, &storage);
        let pending = add_video(&db, &storage);
        {
            let conn = db.get().unwrap();
            assert!(videos::claim_for_processing(&conn, interrupted).unwrap());
        }

        let cancel = CancellationToken::new();
        let pipeline = Arc::new(VideoPipeline::new(
            db.clone(),
            storage,
            Arc::new(NoTools),
            PipelineSettings {
                segment_seconds: 6,
                encrypt: false,
                watermark_position: WatermarkPosition::default(),
                timeout: Duration::from_secs(5),
            },
            cancel.clone(),
        ));
        let (queue, handle) = spawn_workers(pipeline, 2, cancel.clone());

        assert_eq!(recover(&db, &queue).unwrap(), 2);
        wait_for_state(&db, interrupted, PackageState::Passthrough).await;
        wait_for_state(&db, pending, PackageState::Passthrough).await;

        cancel.cancel();
        handle.await.unwrap();
        assert!(queue.enqueue(VideoId::new()).is_err());
    }
}
