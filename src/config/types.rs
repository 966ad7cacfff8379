use gatehouse_av::{ToolsConfig, WatermarkPosition};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub access: AccessConfig,

    #[serde(default)]
    pub raster: RasterConfig,

    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// SQLite database file inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.server.data_dir.join("gatehouse.db")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Root of the on-disk storage layout and the database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Largest accepted upload body, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Hex secret for signed video tokens (generate with `gatehouse generate-secret`).
    /// A random secret is used when unset, so tokens do not survive a restart.
    #[serde(default)]
    pub token_secret: Option<String>,

    /// Lifetime of a signed video token
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Login session lifetime in hours (default: 24)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_hours: u64,

    /// Login attempts allowed per minute across all clients
    #[serde(default = "default_login_per_minute")]
    pub login_per_minute: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_upload_bytes() -> usize {
    2 * 1024 * 1024 * 1024
}

fn default_token_ttl() -> u64 {
    3600
}

fn default_session_ttl() -> u64 {
    24
}

fn default_login_per_minute() -> u32 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            token_secret: None,
            token_ttl_secs: default_token_ttl(),
            session_ttl_hours: default_session_ttl(),
            login_per_minute: default_login_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessConfig {
    /// Pages an anonymous caller may open
    #[serde(default = "default_anonymous_units")]
    pub anonymous_preview_units: u32,

    /// Seconds of video an anonymous caller may watch
    #[serde(default = "default_anonymous_seconds")]
    pub anonymous_preview_seconds: u32,

    /// Violations per session before the user is logged out
    #[serde(default = "default_lockout_threshold")]
    pub lockout_threshold: u32,
}

fn default_anonymous_units() -> u32 {
    1
}

fn default_anonymous_seconds() -> u32 {
    30
}

fn default_lockout_threshold() -> u32 {
    3
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            anonymous_preview_units: default_anonymous_units(),
            anonymous_preview_seconds: default_anonymous_seconds(),
            lockout_threshold: default_lockout_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RasterConfig {
    /// Methods tried in order; `pdftoppm` (poppler) and `mutool` (MuPDF)
    #[serde(default = "default_raster_methods")]
    pub methods: Vec<String>,

    #[serde(default = "default_dpi")]
    pub dpi: u32,

    #[serde(default = "default_raster_timeout")]
    pub timeout_secs: u64,
}

fn default_raster_methods() -> Vec<String> {
    vec!["pdftoppm".to_string(), "mutool".to_string()]
}

fn default_dpi() -> u32 {
    150
}

fn default_raster_timeout() -> u64 {
    60
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            methods: default_raster_methods(),
            dpi: default_dpi(),
            timeout_secs: default_raster_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoConfig {
    /// Concurrent package builds
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Target HLS segment duration
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,

    /// AES-128 encrypt segmented packages
    #[serde(default = "default_encrypt")]
    pub encrypt: bool,

    #[serde(default)]
    pub watermark_position: WatermarkPosition,

    /// Deadline for one ffmpeg transcode
    #[serde(default = "default_video_timeout")]
    pub timeout_secs: u64,
}

fn default_workers() -> usize {
    (num_cpus::get() / 2).max(1)
}

fn default_segment_seconds() -> u32 {
    6
}

fn default_encrypt() -> bool {
    true
}

fn default_video_timeout() -> u64 {
    3600
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            segment_seconds: default_segment_seconds(),
            encrypt: default_encrypt(),
            watermark_position: WatermarkPosition::default(),
            timeout_secs: default_video_timeout(),
        }
    }
}
