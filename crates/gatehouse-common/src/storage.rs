//! On-disk storage layout.
//!
//! One directory per resource or video identifier:
//!
//! ```text
//! {root}/resources/{id}/original.pdf
//! {root}/resources/{id}/unit_{n}.pdf
//! {root}/resources/{id}/.complete
//! {root}/resources/{id}/cache/page-{n:04}.jpg
//! {root}/videos/{id}/original.{ext}
//! {root}/videos/{id}/thumbnail.jpg
//! {root}/videos/{id}/package/{index.m3u8, segment_NNN.*, enc.key}
//! ```
//!
//! Raster cache files are always written in the zero-padded canonical form;
//! legacy non-padded names are only probed on read.

use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::ids::{ResourceId, VideoId};

/// Manifest file name inside a video package.
pub const MANIFEST_NAME: &str = "index.m3u8";

/// Encryption key file name inside a video package.
pub const KEY_NAME: &str = "enc.key";

/// File name of the backed-up original document.
pub const ORIGINAL_DOCUMENT: &str = "original.pdf";

/// Video thumbnail file name.
pub const THUMBNAIL_NAME: &str = "thumbnail.jpg";

/// Written last into a resource's staging directory; its presence means every
/// unit file was committed with it.
pub const READY_MARKER: &str = ".complete";

/// Path builder for the data directory.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the top-level `resources/` and `videos/` directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.resources_dir())?;
        std::fs::create_dir_all(self.videos_dir())
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    pub fn resources_dir(&self) -> PathBuf {
        self.root.join("resources")
    }

    pub fn resource_dir(&self, id: ResourceId) -> PathBuf {
        self.resources_dir().join(id.to_string())
    }

    /// Fresh staging directory for an upload in progress. Readers never look
    /// here; it is renamed onto [`resource_dir`](Self::resource_dir) on success.
    pub fn resource_staging_dir(&self) -> PathBuf {
        self.resources_dir()
            .join(format!(".staging-{}", Uuid::new_v4()))
    }

    pub fn original_document(&self, id: ResourceId) -> PathBuf {
        self.resource_dir(id).join(ORIGINAL_DOCUMENT)
    }

    pub fn unit_source(&self, id: ResourceId, unit: u32) -> PathBuf {
        self.resource_dir(id).join(unit_source_name(unit))
    }

    pub fn cache_dir(&self, id: ResourceId) -> PathBuf {
        self.resource_dir(id).join("cache")
    }

    /// Canonical raster cache path (`page-0007.jpg`).
    pub fn canonical_raster(&self, id: ResourceId, unit: u32) -> PathBuf {
        self.cache_dir(id).join(format!("page-{unit:04}.jpg"))
    }

    /// Ordered list of cache paths to probe for a unit: canonical first, then
    /// legacy spellings found in older deployments.
    pub fn raster_candidates(&self, id: ResourceId, unit: u32) -> Vec<PathBuf> {
        let cache = self.cache_dir(id);
        let mut candidates = vec![self.canonical_raster(id, unit)];
        for legacy in [format!("page-{unit}.jpg"), format!("page_{unit}.jpg")] {
            let path = cache.join(legacy);
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }
        candidates
    }

    /// First existing raster cache file for a unit, if any.
    pub fn find_cached_raster(&self, id: ResourceId, unit: u32) -> Option<PathBuf> {
        self.raster_candidates(id, unit)
            .into_iter()
            .find(|p| p.is_file())
    }

    pub fn ready_marker(&self, id: ResourceId) -> PathBuf {
        self.resource_dir(id).join(READY_MARKER)
    }

    /// Whether the resource directory was committed as a whole.
    pub fn is_committed(&self, id: ResourceId) -> bool {
        self.ready_marker(id).is_file()
    }

    /// Whether `unit` can be served: the directory is committed and the unit
    /// file is still there. Two stat calls regardless of the page count.
    pub fn unit_available(&self, id: ResourceId, unit: u32) -> bool {
        self.is_committed(id) && self.unit_source(id, unit).is_file()
    }

    // ------------------------------------------------------------------
    // Video
    // ------------------------------------------------------------------

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join("videos")
    }

    pub fn video_dir(&self, id: VideoId) -> PathBuf {
        self.videos_dir().join(id.to_string())
    }

    pub fn video_original(&self, id: VideoId, ext: &str) -> PathBuf {
        self.video_dir(id).join(format!("original.{ext}"))
    }

    pub fn thumbnail(&self, id: VideoId) -> PathBuf {
        self.video_dir(id).join(THUMBNAIL_NAME)
    }

    pub fn package_dir(&self, id: VideoId) -> PathBuf {
        self.video_dir(id).join("package")
    }

    /// Fresh staging directory for a package build.
    pub fn package_staging_dir(&self, id: VideoId) -> PathBuf {
        self.video_dir(id)
            .join(format!("package.staging-{}", Uuid::new_v4()))
    }
}

/// File name of a single-unit source document.
pub fn unit_source_name(unit: u32) -> String {
    format!("unit_{unit}.pdf")
}

/// File name of the `index`-th package segment.
pub fn segment_name(index: u32, ext: &str) -> String {
    format!("segment_{index:03}.{ext}")
}

/// Sibling temp path used for write-then-rename.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4()))
}

/// Write `data` to `path` atomically: write a sibling temp file, fsync it, and
/// rename it over the destination. Concurrent writers never produce a torn
/// file; the last rename wins with identical content.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

/// Swap a fully-built staging directory into place at `dest`.
///
/// If `dest` already exists it is first moved aside and removed after the new
/// directory is in place, so `dest` is only ever absent for the instant between
/// two renames and never half-written.
pub fn swap_dir_into_place(staging: &Path, dest: &Path) -> std::io::Result<()> {
    if dest.exists() {
        let retired = dest.with_file_name(format!(
            "{}.retired-{}",
            dest.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Uuid::new_v4()
        ));
        std::fs::rename(dest, &retired)?;
        if let Err(e) = std::fs::rename(staging, dest) {
            let _ = std::fs::rename(&retired, dest);
            return Err(e);
        }
        let _ = std::fs::remove_dir_all(&retired);
        Ok(())
    } else {
        std::fs::rename(staging, dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_raster_is_zero_padded() {
        let layout = StorageLayout::new("/data");
        let id = ResourceId::new();
        let path = layout.canonical_raster(id, 7);
        assert!(path.ends_with(format!("{id}/cache/page-0007.jpg")));
    }

    #[test]
    fn candidates_put_canonical_first() {
        let layout = StorageLayout::new("/data");
        let id = ResourceId::new();
        let names: Vec<String> = layout
            .raster_candidates(id, 3)
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["page-0003.jpg", "page-3.jpg", "page_3.jpg"]);
    }

    #[test]
    fn candidates_dedupe_four_digit_units() {
        let layout = StorageLayout::new("/data");
        let candidates = layout.raster_candidates(ResourceId::new(), 1234);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn lexicographic_order_matches_numeric() {
        let layout = StorageLayout::new("/data");
        let id = ResourceId::new();
        let mut paths: Vec<PathBuf> = [10, 2, 1, 100]
            .iter()
            .map(|n| layout.canonical_raster(id, *n))
            .collect();
        paths.sort();
        let expected: Vec<PathBuf> = [1, 2, 10, 100]
            .iter()
            .map(|n| layout.canonical_raster(id, *n))
            .collect();
        assert_eq!(paths, expected);
    }

    #[test]
    fn finds_legacy_raster() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let id = ResourceId::new();
        std::fs::create_dir_all(layout.cache_dir(id)).unwrap();
        std::fs::write(layout.cache_dir(id).join("page-5.jpg"), b"jpeg").unwrap();

        let found = layout.find_cached_raster(id, 5).unwrap();
        assert!(found.ends_with("page-5.jpg"));
        assert!(layout.find_cached_raster(id, 6).is_none());
    }

    #[test]
    fn units_need_the_marker_and_their_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let id = ResourceId::new();
        std::fs::create_dir_all(layout.resource_dir(id)).unwrap();
        for n in [1, 2, 4] {
            std::fs::write(layout.unit_source(id, n), b"%PDF").unwrap();
        }
        assert!(!layout.unit_available(id, 1));

        std::fs::write(layout.ready_marker(id), b"4").unwrap();
        assert!(layout.is_committed(id));
        assert!(layout.unit_available(id, 1));
        assert!(layout.unit_available(id, 4));
        assert!(!layout.unit_available(id, 3));
    }

    #[test]
    fn write_atomic_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cache").join("page-0001.jpg");
        write_atomic(&target, b"first").unwrap();
        write_atomic(&target, b"second").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"second");
        let entries: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn swap_replaces_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("package");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("old.txt"), b"old").unwrap();

        let staging = dir.path().join("package.staging-x");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("new.txt"), b"new").unwrap();

        swap_dir_into_place(&staging, &dest).unwrap();
        assert!(dest.join("new.txt").exists());
        assert!(!dest.join("old.txt").exists());
        assert!(!staging.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn segment_names_are_padded() {
        assert_eq!(segment_name(0, "ts"), "segment_000.ts");
        assert_eq!(segment_name(12, "mp4"), "segment_012.mp4");
    }
}
