//! Video probing, HLS packaging and thumbnail extraction with ffmpeg.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;
use crate::{Error, Result};

/// Length of an AES-128 key in bytes.
pub const KEY_LEN: usize = 16;

/// Corner in which the watermark is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

impl FromStr for WatermarkPosition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "top-left" => Ok(Self::TopLeft),
            "top-right" => Ok(Self::TopRight),
            "bottom-left" => Ok(Self::BottomLeft),
            "bottom-right" => Ok(Self::BottomRight),
            _ => Err(format!("Invalid watermark position: {}", s)),
        }
    }
}

impl WatermarkPosition {
    /// `drawtext` x/y expressions with a 16px margin.
    fn coordinates(self) -> (&'static str, &'static str) {
        match self {
            Self::TopLeft => ("16", "16"),
            Self::TopRight => ("w-tw-16", "16"),
            Self::BottomLeft => ("16", "h-th-16"),
            Self::BottomRight => ("w-tw-16", "h-th-16"),
        }
    }
}

/// Text burned into every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    pub text: String,
    pub position: WatermarkPosition,
}

impl Watermark {
    /// The `-vf` filter expression for this watermark.
    pub fn drawtext_filter(&self) -> String {
        let (x, y) = self.position.coordinates();
        format!(
            "drawtext=text='{}':x={x}:y={y}:fontsize=24:fontcolor=white@0.6:box=1:boxcolor=black@0.3:boxborderw=6",
            escape_drawtext(&self.text)
        )
    }
}

/// Escape text for a single-quoted `drawtext` value inside a filtergraph.
fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | ':' | '%' => {
                out.push('\\');
                out.push(c);
            }
            '\'' => out.push_str("'\\''"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Settings for one HLS packaging run.
#[derive(Debug, Clone)]
pub struct HlsOptions {
    /// Target segment duration in seconds.
    pub segment_seconds: u32,
    /// AES-128 key; `None` leaves segments in the clear.
    pub key: Option<[u8; KEY_LEN]>,
    pub watermark: Option<Watermark>,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

/// Generate a fresh random AES-128 key.
pub fn generate_key() -> [u8; KEY_LEN] {
    rand::random()
}

/// Probe a file's duration in seconds with ffprobe.
///
/// Returns `Ok(None)` when ffprobe ran but reported no usable duration.
pub async fn probe_duration(
    tools: &ToolRegistry,
    input: &Path,
    timeout: Duration,
) -> Result<Option<f64>> {
    let ffprobe = tools.require("ffprobe")?;

    let output = ToolCommand::new(ffprobe)
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
        .path_arg(input)
        .timeout(timeout)
        .execute()
        .await?;

    parse_probe_duration(&output.stdout)
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
}

fn parse_probe_duration(json: &str) -> Result<Option<f64>> {
    let parsed: ProbeOutput = serde_json::from_str(json)?;
    let duration = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);
    Ok(duration)
}

/// Transcode `input` into an HLS VOD package in `out_dir`.
///
/// Produces `index.m3u8` and `segment_%03d.ts`. When a key is supplied it is
/// written to `enc.key`, referenced from the manifest by that relative name.
pub async fn transcode_hls(
    tools: &ToolRegistry,
    input: &Path,
    out_dir: &Path,
    options: &HlsOptions,
) -> Result<()> {
    let ffmpeg = tools.require("ffmpeg")?;
    tokio::fs::create_dir_all(out_dir).await?;

    let manifest = out_dir.join(gatehouse_common::storage::MANIFEST_NAME);
    let segment_pattern = out_dir.join("segment_%03d.ts");

    tracing::info!(
        input = %input.display(),
        out = %out_dir.display(),
        segment_seconds = options.segment_seconds,
        encrypted = options.key.is_some(),
        watermark = options.watermark.is_some(),
        "Transcoding to HLS"
    );

    let mut cmd = ToolCommand::new(ffmpeg);
    cmd.timeout(options.timeout)
        .cancel_on(options.cancel.clone())
        .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
        .path_arg(input);

    if let Some(watermark) = &options.watermark {
        cmd.args(["-vf", &watermark.drawtext_filter()]);
    }

    cmd.args(["-c:v", "libx264", "-preset", "veryfast", "-crf", "23"])
        .args(["-c:a", "aac", "-b:a", "128k"])
        .args(["-f", "hls", "-hls_playlist_type", "vod"])
        .args(["-hls_time", &options.segment_seconds.to_string()])
        .args(["-hls_segment_filename"])
        .path_arg(&segment_pattern);

    // The key info file lives outside the package so it is never served.
    let key_info_dir;
    if let Some(key) = &options.key {
        key_info_dir = tempfile::tempdir()?;
        let key_info = write_key_files(out_dir, key_info_dir.path(), key).await?;
        cmd.arg("-hls_key_info_file").path_arg(&key_info);
    }

    cmd.path_arg(&manifest);
    cmd.execute().await?;

    if !manifest.is_file() {
        return Err(Error::tool_failed("ffmpeg", "no manifest produced"));
    }
    Ok(())
}

/// Write `enc.key` into the package and the key info file into `scratch`.
///
/// Key info format: key URI as written in the manifest, key file path, IV.
async fn write_key_files(
    package_dir: &Path,
    scratch: &Path,
    key: &[u8; KEY_LEN],
) -> Result<std::path::PathBuf> {
    let key_path = package_dir.join(gatehouse_common::storage::KEY_NAME);
    tokio::fs::write(&key_path, key).await?;

    let iv: [u8; KEY_LEN] = rand::random();
    let info = format!(
        "{}\n{}\n{}\n",
        gatehouse_common::storage::KEY_NAME,
        key_path.display(),
        hex::encode(iv)
    );
    let info_path = scratch.join("key_info.txt");
    tokio::fs::write(&info_path, info).await?;
    Ok(info_path)
}

/// Grab a single frame at one second as a JPEG thumbnail.
pub async fn extract_thumbnail(
    tools: &ToolRegistry,
    input: &Path,
    output: &Path,
    timeout: Duration,
) -> Result<()> {
    let ffmpeg = tools.require("ffmpeg")?;

    ToolCommand::new(ffmpeg)
        .args(["-y", "-hide_banner", "-loglevel", "error", "-ss", "1", "-i"])
        .path_arg(input)
        .args(["-frames:v", "1", "-vf", "scale=480:-2", "-q:v", "4"])
        .path_arg(output)
        .timeout(timeout)
        .execute()
        .await?;

    if !output.is_file() {
        return Err(Error::tool_failed("ffmpeg", "no thumbnail produced"));
    }
    Ok(())
}
