//! Media playlist model: parse, cut, render.

use std::fmt::Write;

use crate::{Error, Result};

/// `#EXT-X-KEY` attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTag {
    pub method: String,
    pub uri: Option<String>,
    pub iv: Option<String>,
}

/// One media segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Duration from `#EXTINF`.
    pub duration: f64,
    /// URI as written in the manifest (a file name for local packages).
    pub uri: String,
    /// Presentation start, summed from earlier durations.
    pub start: f64,
}

impl Segment {
    /// End of this segment on the presentation timeline.
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// A VOD media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub version: u32,
    pub target_duration: u32,
    pub media_sequence: u64,
    /// Key applying to every segment. Packages use a single key.
    pub key: Option<KeyTag>,
    pub segments: Vec<Segment>,
    pub ended: bool,
}

impl MediaPlaylist {
    /// Playlist for a package made of one untouched file.
    pub fn single_file(uri: impl Into<String>, duration: f64) -> Self {
        Self {
            version: 3,
            target_duration: duration.ceil().max(1.0) as u32,
            media_sequence: 0,
            key: None,
            segments: vec![Segment {
                duration,
                uri: uri.into(),
                start: 0.0,
            }],
            ended: true,
        }
    }

    /// Parse manifest text.
    ///
    /// Tags not modelled here are dropped; rendering emits a canonical VOD
    /// header.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some("#EXTM3U") {
            return Err(Error::invalid_playlist("missing #EXTM3U header"));
        }

        let mut playlist = Self {
            version: 3,
            target_duration: 0,
            media_sequence: 0,
            key: None,
            segments: Vec::new(),
            ended: false,
        };
        let mut pending_duration: Option<f64> = None;
        let mut start = 0.0;

        for line in lines {
            if let Some(rest) = line.strip_prefix("#EXTINF:") {
                let value = rest.split(',').next().unwrap_or_default().trim();
                let duration = value
                    .parse::<f64>()
                    .ok()
                    .filter(|d| d.is_finite() && *d >= 0.0)
                    .ok_or_else(|| Error::invalid_playlist(format!("bad EXTINF: {line}")))?;
                pending_duration = Some(duration);
            } else if let Some(rest) = line.strip_prefix("#EXT-X-VERSION:") {
                playlist.version = parse_num(rest, line)?;
            } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                playlist.target_duration = parse_num(rest, line)?;
            } else if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                playlist.media_sequence = parse_num(rest, line)?;
            } else if let Some(rest) = line.strip_prefix("#EXT-X-KEY:") {
                let attrs = parse_attributes(rest);
                let method = attr(&attrs, "METHOD")
                    .ok_or_else(|| Error::invalid_playlist("EXT-X-KEY without METHOD"))?;
                if !playlist.segments.is_empty() && playlist.key.is_some() {
                    return Err(Error::invalid_playlist("key rotation is not supported"));
                }
                playlist.key = if method == "NONE" {
                    None
                } else {
                    Some(KeyTag {
                        method,
                        uri: attr(&attrs, "URI"),
                        iv: attr(&attrs, "IV"),
                    })
                };
            } else if line == "#EXT-X-ENDLIST" {
                playlist.ended = true;
            } else if line.starts_with('#') {
                continue;
            } else {
                let duration = pending_duration
                    .take()
                    .ok_or_else(|| Error::invalid_playlist(format!("URI without EXTINF: {line}")))?;
                playlist.segments.push(Segment {
                    duration,
                    uri: line.to_string(),
                    start,
                });
                start += duration;
            }
        }

        if playlist.target_duration == 0 {
            playlist.target_duration = playlist
                .segments
                .iter()
                .map(|s| s.duration.ceil() as u32)
                .max()
                .unwrap_or(1);
        }
        Ok(playlist)
    }

    /// Sum of all segment durations.
    pub fn duration(&self) -> f64 {
        self.segments.last().map(Segment::end).unwrap_or(0.0)
    }

    /// Index of the segment with this URI.
    pub fn segment_index(&self, uri: &str) -> Option<usize> {
        self.segments.iter().position(|s| s.uri == uri)
    }

    /// Every file name the manifest references: segments, then the key.
    pub fn referenced_uris(&self) -> impl Iterator<Item = &str> {
        self.segments
            .iter()
            .map(|s| s.uri.as_str())
            .chain(self.key.as_ref().and_then(|k| k.uri.as_deref()))
    }

    /// Copy keeping only segments that start before `limit_seconds`, ended.
    pub fn truncated(&self, limit_seconds: f64) -> Self {
        let mut cut = self.clone();
        cut.segments.retain(|s| s.start < limit_seconds);
        cut.ended = true;
        cut
    }

    /// Render manifest text, mapping every segment and key URI through
    /// `rewrite`.
    pub fn render<F>(&self, mut rewrite: F) -> String
    where
        F: FnMut(&str) -> String,
    {
        let mut out = String::new();
        let _ = writeln!(out, "#EXTM3U");
        let _ = writeln!(out, "#EXT-X-VERSION:{}", self.version);
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration);
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence);
        let _ = writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD");

        if let Some(key) = &self.key {
            let _ = write!(out, "#EXT-X-KEY:METHOD={}", key.method);
            if let Some(uri) = &key.uri {
                let _ = write!(out, ",URI=\"{}\"", rewrite(uri));
            }
            if let Some(iv) = &key.iv {
                let _ = write!(out, ",IV={iv}");
            }
            out.push('\n');
        }

        for segment in &self.segments {
            let _ = writeln!(out, "#EXTINF:{:.6},", segment.duration);
            let _ = writeln!(out, "{}", rewrite(&segment.uri));
        }

        if self.ended {
            let _ = writeln!(out, "#EXT-X-ENDLIST");
        }
        out
    }
}

fn parse_num<T: std::str::FromStr>(value: &str, line: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::invalid_playlist(format!("bad number: {line}")))
}

/// Split an attribute list, honouring quoted values.
fn parse_attributes(list: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = list;
    while !rest.is_empty() {
        let Some((name, after)) = rest.split_once('=') else {
            break;
        };
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.split_once('"') {
                Some((v, r)) => (v, r.trim_start_matches(',')),
                None => (quoted, ""),
            }
        } else {
            match after.split_once(',') {
                Some((v, r)) => (v, r),
                None => (after, ""),
            }
        };
        attrs.push((name.trim().to_string(), value.to_string()));
        rest = remaining;
    }
    attrs
}

fn attr(attrs: &[(String, String)], name: &str) -> Option<String> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FFMPEG_MANIFEST: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:0
#EXT-X-PLAYLIST-TYPE:VOD
#EXT-X-KEY:METHOD=AES-128,URI=\"enc.key\",IV=0x0123456789abcdef0123456789abcdef
#EXTINF:6.000000,
segment_000.ts
#EXTINF:6.000000,
segment_001.ts
#EXTINF:6.000000,
segment_002.ts
#EXTINF:2.500000,
segment_003.ts
#EXT-X-ENDLIST
";

    #[test]
    fn parses_ffmpeg_output() {
        let playlist = MediaPlaylist::parse(FFMPEG_MANIFEST).unwrap();
        assert_eq!(playlist.target_duration, 6);
        assert_eq!(playlist.segments.len(), 4);
        assert_eq!(playlist.segments[2].start, 12.0);
        assert_eq!(playlist.duration(), 20.5);
        assert!(playlist.ended);

        let key = playlist.key.as_ref().unwrap();
        assert_eq!(key.method, "AES-128");
        assert_eq!(key.uri.as_deref(), Some("enc.key"));
        assert!(key.iv.as_deref().unwrap().starts_with("0x"));

        let uris: Vec<&str> = playlist.referenced_uris().collect();
        assert_eq!(uris.last(), Some(&"enc.key"));
        assert_eq!(playlist.segment_index("segment_001.ts"), Some(1));
        assert_eq!(playlist.segment_index("segment_009.ts"), None);
    }

    #[test]
    fn rejects_non_playlists() {
        assert!(MediaPlaylist::parse("hello").is_err());
        assert!(MediaPlaylist::parse("#EXTM3U\nsegment.ts\n").is_err());
        assert!(MediaPlaylist::parse("#EXTM3U\n#EXTINF:abc,\nsegment.ts\n").is_err());
    }

    #[test]
    fn truncation_keeps_segments_starting_before_limit() {
        let playlist = MediaPlaylist::parse(FFMPEG_MANIFEST).unwrap();

        let cut = playlist.truncated(10.0);
        let names: Vec<&str> = cut.segments.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(names, vec!["segment_000.ts", "segment_001.ts"]);
        assert!(cut.ended);

        // A boundary exactly on a segment start excludes that segment.
        assert_eq!(playlist.truncated(12.0).segments.len(), 2);
        assert!(playlist.truncated(0.0).segments.is_empty());
    }

    #[test]
    fn render_rewrites_every_uri() {
        let playlist = MediaPlaylist::parse(FFMPEG_MANIFEST).unwrap();
        let text = playlist.render(|name| format!("/videos/v1/package/{name}?token=abc"));

        assert!(text.contains("URI=\"/videos/v1/package/enc.key?token=abc\""));
        assert!(text.contains("/videos/v1/package/segment_003.ts?token=abc"));
        assert!(!text.lines().any(|l| l == "segment_000.ts"));
        assert!(text.trim_end().ends_with("#EXT-X-ENDLIST"));

        // Re-parsing the rendered output preserves the timeline.
        let reparsed = MediaPlaylist::parse(&text).unwrap();
        assert_eq!(reparsed.segments.len(), 4);
        assert_eq!(reparsed.duration(), playlist.duration());
    }

    #[test]
    fn single_file_playlist() {
        let playlist = MediaPlaylist::single_file("segment_000.mp4", 93.4);
        assert_eq!(playlist.target_duration, 94);
        let text = playlist.render(str::to_string);
        assert!(text.contains("#EXTINF:93.400000,\nsegment_000.mp4\n"));

        let reparsed = MediaPlaylist::parse(&text).unwrap();
        assert_eq!(reparsed, playlist);
    }
}
