//! On-demand page rasterization with a method chain and a disk cache.
//!
//! A cache miss takes the per-(resource, unit) lock, re-checks the cache and
//! spawns a detached render task. The task hands the JPEG back over a oneshot
//! as soon as it exists, then writes it to the canonical cache path while
//! still holding the lock. Concurrent misses on the same unit queue on the
//! lock and find the file. A handler that goes away only drops its receiver.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use gatehouse_av::{RasterMethod, RasterOptions};
use gatehouse_common::storage::write_atomic;
use gatehouse_common::{Error, ResourceId, Result, StorageLayout};
use gatehouse_db::models::Resource;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use super::placeholder::render_placeholder;

type UnitKey = (ResourceId, u32);

/// Where a served image came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RasterSource {
    Cache,
    Method(String),
    Placeholder,
}

impl RasterSource {
    /// Value of the `X-Raster-Method` header.
    pub fn label(&self) -> &str {
        match self {
            RasterSource::Cache => "cache",
            RasterSource::Method(name) => name,
            RasterSource::Placeholder => "placeholder",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RasterOutput {
    pub jpeg: Bytes,
    pub source: RasterSource,
}

/// Result of a bulk conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConvertSummary {
    pub converted: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// Shared rasterizer; cheap to clone.
#[derive(Clone)]
pub struct Rasterizer {
    storage: Arc<StorageLayout>,
    methods: Arc<[Arc<dyn RasterMethod>]>,
    options: RasterOptions,
    locks: Arc<DashMap<UnitKey, Arc<Mutex<()>>>>,
}

impl Rasterizer {
    pub fn new(
        storage: Arc<StorageLayout>,
        methods: Vec<Arc<dyn RasterMethod>>,
        options: RasterOptions,
    ) -> Self {
        Self {
            storage,
            methods: methods.into(),
            options,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Names of the configured methods, in order.
    pub fn method_names(&self) -> Vec<String> {
        self.methods.iter().map(|m| m.name().to_string()).collect()
    }

    /// Serve a unit's JPEG from cache, rendering it on a miss.
    pub async fn get_or_render(&self, resource: &Resource, unit: u32) -> Result<RasterOutput> {
        if let Some(jpeg) = self.read_cached(resource.id, unit).await? {
            return Ok(RasterOutput {
                jpeg,
                source: RasterSource::Cache,
            });
        }

        let guard = self.lock(resource.id, unit).await;
        if let Some(jpeg) = self.read_cached(resource.id, unit).await? {
            return Ok(RasterOutput {
                jpeg,
                source: RasterSource::Cache,
            });
        }

        let (rx, _task) = self.spawn_render(resource, unit, guard);
        rx.await
            .map_err(|_| Error::internal("render task ended without a result"))?
    }

    /// Render and persist every unit that has no cached image.
    pub async fn convert_all(&self, resource: &Resource) -> Result<ConvertSummary> {
        let mut summary = ConvertSummary::default();

        for unit in 1..=resource.total_units {
            if self.storage.find_cached_raster(resource.id, unit).is_some() {
                summary.skipped += 1;
                continue;
            }

            let guard = self.lock(resource.id, unit).await;
            if self.storage.find_cached_raster(resource.id, unit).is_some() {
                summary.skipped += 1;
                continue;
            }

            let (rx, task) = self.spawn_render(resource, unit, guard);
            let outcome = rx.await;
            // Wait for the cache write so the summary reflects the disk.
            let _ = task.await;

            match outcome {
                Ok(Ok(RasterOutput {
                    source: RasterSource::Method(_),
                    ..
                })) if self.storage.find_cached_raster(resource.id, unit).is_some() => {
                    summary.converted += 1
                }
                _ => summary.failed += 1,
            }
        }

        tracing::info!(
            resource_id = %resource.id,
            converted = summary.converted,
            skipped = summary.skipped,
            failed = summary.failed,
            "Converted resource to images"
        );
        Ok(summary)
    }

    async fn read_cached(&self, id: ResourceId, unit: u32) -> Result<Option<Bytes>> {
        let Some(path) = self.storage.find_cached_raster(id, unit) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn lock(&self, id: ResourceId, unit: u32) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry((id, unit)).or_default().clone();
        lock.lock_owned().await
    }

    /// Start the detached render for one unit. `guard` is held until the
    /// cache write finishes.
    fn spawn_render(
        &self,
        resource: &Resource,
        unit: u32,
        guard: OwnedMutexGuard<()>,
    ) -> (oneshot::Receiver<Result<RasterOutput>>, JoinHandle<()>) {
        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        let id = resource.id;
        let title = resource.title.clone();

        let task = tokio::spawn(async move {
            let rendered = this.render_chain(id, unit).await;

            match rendered {
                Some((method, jpeg)) => {
                    let jpeg = Bytes::from(jpeg);
                    let _ = tx.send(Ok(RasterOutput {
                        jpeg: jpeg.clone(),
                        source: RasterSource::Method(method),
                    }));
                    this.persist(id, unit, jpeg).await;
                }
                None => {
                    tracing::warn!(resource_id = %id, unit, "All raster methods failed, serving placeholder");
                    let placeholder = tokio::task::spawn_blocking(move || render_placeholder(&title, unit))
                        .await
                        .map_err(|e| Error::internal(format!("placeholder task failed: {e}")))
                        .and_then(|r| r);
                    let _ = tx.send(placeholder.map(|jpeg| RasterOutput {
                        jpeg: Bytes::from(jpeg),
                        source: RasterSource::Placeholder,
                    }));
                }
            }

            drop(guard);
            this.locks
                .remove_if(&(id, unit), |_, lock| Arc::strong_count(lock) == 1);
        });

        (rx, task)
    }

    async fn render_chain(&self, id: ResourceId, unit: u32) -> Option<(String, Vec<u8>)> {
        let source = self.storage.unit_source(id, unit);

        for method in self.methods.iter() {
            match method.render(&source, &self.options).await {
                Ok(jpeg) => {
                    tracing::debug!(resource_id = %id, unit, method = method.name(), "Rendered page");
                    return Some((method.name().to_string(), jpeg));
                }
                Err(e) if e.is_unavailable() => {
                    tracing::debug!(method = method.name(), "Raster method unavailable, trying next");
                }
                Err(e) => {
                    tracing::warn!(resource_id = %id, unit, method = method.name(), error = %e, "Raster method failed");
                }
            }
        }
        None
    }

    async fn persist(&self, id: ResourceId, unit: u32, jpeg: Bytes) {
        let path = self.storage.canonical_raster(id, unit);
        let written = tokio::task::spawn_blocking(move || write_atomic(&path, &jpeg)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(resource_id = %id, unit, error = %e, "Failed to cache page image")
            }
            Err(e) => tracing::warn!(resource_id = %id, unit, error = %e, "Cache write task failed"),
        }
    }
}
