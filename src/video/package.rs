//! Manifest-driven package lookup.
//!
//! Segmented and passthrough packages look the same from here: a directory
//! with `index.m3u8` naming its files. Only names the manifest references
//! (plus the manifest itself) resolve, so request paths never reach
//! arbitrary files.

use std::path::{Path, PathBuf};

use gatehouse_common::storage::{segment_name, MANIFEST_NAME};
use gatehouse_common::{Error, Result};
use gatehouse_media::{MediaPlaylist, Segment};

/// What a requested package name refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum PackageEntry<'a> {
    Manifest,
    Segment { index: usize, segment: &'a Segment },
    Key,
}

/// An opened package directory.
#[derive(Debug, Clone)]
pub struct Package {
    dir: PathBuf,
    playlist: MediaPlaylist,
}

impl Package {
    /// Read and parse the manifest in `dir`.
    pub async fn open(dir: &Path) -> Result<Self> {
        let manifest = dir.join(MANIFEST_NAME);
        let text = match tokio::fs::read_to_string(&manifest).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotReady("video package is not built".into()))
            }
            Err(e) => return Err(e.into()),
        };
        let playlist = MediaPlaylist::parse(&text)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            playlist,
        })
    }

    pub fn playlist(&self) -> &MediaPlaylist {
        &self.playlist
    }

    /// One segment holding the whole presentation.
    pub fn is_single_file(&self) -> bool {
        self.playlist.segments.len() == 1
    }

    pub fn segment_count(&self) -> usize {
        self.playlist.segments.len()
    }

    /// Resolve a request name against the manifest.
    pub fn resolve(&self, name: &str) -> Option<PackageEntry<'_>> {
        if name == MANIFEST_NAME {
            return Some(PackageEntry::Manifest);
        }
        if let Some(index) = self.playlist.segment_index(name) {
            return Some(PackageEntry::Segment {
                index,
                segment: &self.playlist.segments[index],
            });
        }
        let key_uri = self.playlist.key.as_ref().and_then(|k| k.uri.as_deref());
        if key_uri == Some(name) {
            return Some(PackageEntry::Key);
        }
        None
    }

    /// Filesystem path for a resolved name.
    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        self.resolve(name).map(|_| self.dir.join(name))
    }

    /// Fail unless every file the manifest references is on disk.
    pub async fn verify(&self) -> Result<()> {
        for uri in self.playlist.referenced_uris() {
            let present = match self.path_of(uri) {
                Some(path) => tokio::fs::try_exists(&path).await?,
                None => false,
            };
            if !present {
                return Err(Error::ConversionFailed(format!("package is missing {uri}")));
            }
        }
        Ok(())
    }
}

/// Build a passthrough package: the original copied as the only segment.
pub async fn build_passthrough(
    original: &Path,
    out_dir: &Path,
    extension: &str,
    duration: Option<f64>,
) -> Result<()> {
    tokio::fs::create_dir_all(out_dir).await?;

    let segment = segment_name(0, extension);
    tokio::fs::copy(original, out_dir.join(&segment)).await?;

    let playlist = MediaPlaylist::single_file(segment, duration.unwrap_or(0.0));
    let manifest = playlist.render(str::to_string);
    tokio::fs::write(out_dir.join(MANIFEST_NAME), manifest).await?;
    Ok(())
}
