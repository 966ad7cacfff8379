//! Preview time-box.
//!
//! [`PreviewClamp`] is the player-side state machine, mirrored to clients as
//! the `preview` block of the video metadata. [`PreviewWindow`] is the
//! server-side window applied to manifests, segments and byte ranges; it is
//! the one that actually holds.

use gatehouse_common::UpgradeRequired;
use gatehouse_media::{MediaPlaylist, Segment};
use serde::Serialize;

use crate::access::Access;

/// What the player should do after a time update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerAction {
    Continue,
    PauseAndUpsell,
}

/// Player-side clamp for a preview of `limit` seconds.
#[derive(Debug, Clone)]
pub struct PreviewClamp {
    limit: f64,
    fired: bool,
}

impl PreviewClamp {
    pub fn new(limit_seconds: f64) -> Self {
        Self {
            limit: limit_seconds.max(0.0),
            fired: false,
        }
    }

    /// Seeks past the boundary land on it.
    pub fn clamp_seek(&self, t: f64) -> f64 {
        t.clamp(0.0, self.limit)
    }

    /// Fires `PauseAndUpsell` once, the first time playback reaches the limit.
    pub fn on_time_update(&mut self, t: f64) -> PlayerAction {
        if t >= self.limit && !self.fired {
            self.fired = true;
            PlayerAction::PauseAndUpsell
        } else {
            PlayerAction::Continue
        }
    }
}

/// How much of a single-file segment a caller may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteWindow {
    Unlimited,
    /// Bytes `0..n` only.
    Prefix(u64),
    /// Nothing can be allowed safely.
    Closed,
}

/// Server-side preview window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewWindow {
    limit: Option<f64>,
}

impl PreviewWindow {
    pub fn full() -> Self {
        Self { limit: None }
    }

    pub fn limited(seconds: u32) -> Self {
        Self {
            limit: Some(f64::from(seconds)),
        }
    }

    /// Window for an access decision; `None` when denied.
    pub fn from_access(access: Access) -> Option<Self> {
        match access {
            Access::Full => Some(Self::full()),
            Access::PreviewOnly(seconds) => Some(Self::limited(seconds)),
            Access::Denied => None,
        }
    }

    pub fn limit_seconds(&self) -> Option<f64> {
        self.limit
    }

    /// The manifest as this caller may see it.
    pub fn manifest(&self, playlist: &MediaPlaylist) -> MediaPlaylist {
        match self.limit {
            Some(limit) => playlist.truncated(limit),
            None => playlist.clone(),
        }
    }

    /// A segment is visible when it starts before the boundary.
    pub fn allows(&self, segment: &Segment) -> bool {
        self.limit.map_or(true, |limit| segment.start < limit)
    }

    /// Byte window for a package whose only segment holds the whole video.
    ///
    /// The prefix is proportional to the preview share of the duration.
    /// Without a known duration there is no safe prefix.
    pub fn byte_window(&self, size: u64, duration: Option<f64>) -> ByteWindow {
        let Some(limit) = self.limit else {
            return ByteWindow::Unlimited;
        };
        let Some(duration) = duration.filter(|d| d.is_finite() && *d > 0.0) else {
            return ByteWindow::Closed;
        };
        if limit >= duration {
            return ByteWindow::Unlimited;
        }
        let prefix = (size as f64 * limit / duration).ceil() as u64;
        if prefix == 0 {
            ByteWindow::Closed
        } else {
            ByteWindow::Prefix(prefix.min(size))
        }
    }

    /// Upgrade payload for a denial against `playlist`.
    pub fn upgrade(
        &self,
        playlist: &MediaPlaylist,
        duration: Option<f64>,
    ) -> UpgradeRequired {
        let total = playlist.segments.len() as u32;
        let available = playlist.segments.iter().filter(|s| self.allows(s)).count() as u32;
        UpgradeRequired {
            available_units: available,
            total_units: total,
            preview_seconds: self.limit.map(|l| l as u32),
            duration_seconds: duration.or_else(|| Some(playlist.duration()).filter(|d| *d > 0.0)),
        }
    }

    /// Client-facing description of this window.
    pub fn info(&self, duration: Option<f64>) -> PreviewInfo {
        let limited = match (self.limit, duration) {
            (None, _) => false,
            (Some(limit), Some(d)) => limit < d,
            (Some(_), None) => true,
        };
        PreviewInfo {
            limit_seconds: if limited { self.limit } else { None },
            upgrade_required: limited,
        }
    }
}

/// `preview` block of the video metadata response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewInfo {
    /// Where the player must stop; absent for full access.
    pub limit_seconds: Option<f64>,
    pub upgrade_required: bool,
}
