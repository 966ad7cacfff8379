//! Page rasterization methods.
//!
//! Each method turns a single-page PDF into JPEG bytes. Methods are tried in
//! order by the caller; a method whose binary is missing fails with
//! [`Error::ToolNotFound`] so the caller can move on without treating it as
//! a conversion failure.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::ImageFormat;
use tokio_util::sync::CancellationToken;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;
use crate::{Error, Result};

/// JPEG quality for re-encoded renders.
pub const JPEG_QUALITY: u8 = 85;

/// Options shared by every raster invocation.
#[derive(Debug, Clone)]
pub struct RasterOptions {
    /// Render resolution.
    pub dpi: u32,
    /// Per-invocation deadline.
    pub timeout: Duration,
    /// Fires on shutdown.
    pub cancel: CancellationToken,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            dpi: 150,
            timeout: Duration::from_secs(60),
            cancel: CancellationToken::new(),
        }
    }
}

/// One way of turning a single-page PDF into a JPEG.
#[async_trait]
pub trait RasterMethod: Send + Sync {
    /// Short identifier, reported in the `X-Raster-Method` header.
    fn name(&self) -> &str;

    /// Render page 1 of `source` to JPEG bytes.
    async fn render(&self, source: &Path, options: &RasterOptions) -> Result<Vec<u8>>;
}

/// poppler's `pdftoppm`, which writes JPEG directly.
#[derive(Debug, Clone)]
pub struct Pdftoppm {
    path: PathBuf,
}

impl Pdftoppm {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RasterMethod for Pdftoppm {
    fn name(&self) -> &str {
        "pdftoppm"
    }

    async fn render(&self, source: &Path, options: &RasterOptions) -> Result<Vec<u8>> {
        let work = tempfile::tempdir()?;
        let prefix = work.path().join("page");

        let mut cmd = ToolCommand::new(&self.path);
        cmd.timeout(options.timeout)
            .cancel_on(options.cancel.clone())
            .args(["-jpeg", "-singlefile", "-f", "1", "-l", "1"])
            .args(["-r", &options.dpi.to_string()])
            .args(["-jpegopt", &format!("quality={JPEG_QUALITY}")])
            .path_arg(source)
            .path_arg(&prefix);
        cmd.execute().await?;

        let out = work.path().join("page.jpg");
        let bytes = tokio::fs::read(&out)
            .await
            .map_err(|e| Error::tool_failed("pdftoppm", format!("no output produced: {e}")))?;
        ensure_jpeg("pdftoppm", bytes)
    }
}

/// MuPDF's `mutool draw`. Renders PNG, which is re-encoded to JPEG.
#[derive(Debug, Clone)]
pub struct Mutool {
    path: PathBuf,
}

impl Mutool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RasterMethod for Mutool {
    fn name(&self) -> &str {
        "mutool"
    }

    async fn render(&self, source: &Path, options: &RasterOptions) -> Result<Vec<u8>> {
        let work = tempfile::tempdir()?;
        let out = work.path().join("page.png");

        let mut cmd = ToolCommand::new(&self.path);
        cmd.timeout(options.timeout)
            .cancel_on(options.cancel.clone())
            .args(["draw", "-q"])
            .args(["-r", &options.dpi.to_string()])
            .arg("-o")
            .path_arg(&out)
            .path_arg(source)
            .arg("1");
        cmd.execute().await?;

        let png = tokio::fs::read(&out)
            .await
            .map_err(|e| Error::tool_failed("mutool", format!("no output produced: {e}")))?;
        tokio::task::spawn_blocking(move || reencode_as_jpeg(&png))
            .await
            .map_err(|e| Error::tool_failed("mutool", format!("encoder task failed: {e}")))?
    }
}

/// Stand-in for a configured method whose binary was not found at startup.
/// Always fails with [`Error::ToolNotFound`].
#[derive(Debug, Clone)]
pub struct Unavailable {
    name: String,
}

#[async_trait]
impl RasterMethod for Unavailable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn render(&self, _source: &Path, _options: &RasterOptions) -> Result<Vec<u8>> {
        Err(Error::tool_not_found(&self.name))
    }
}

/// Build the method chain named in config, in order.
///
/// Unknown names are rejected; known names whose binary is missing become
/// [`Unavailable`] entries so the chain still reports them.
pub fn methods_from_names(
    registry: &ToolRegistry,
    names: &[String],
) -> Result<Vec<Arc<dyn RasterMethod>>> {
    names
        .iter()
        .map(|name| {
            let method: Arc<dyn RasterMethod> = match (name.as_str(), registry.require(name)) {
                ("pdftoppm", Ok(path)) => Arc::new(Pdftoppm::new(path)),
                ("mutool", Ok(path)) => Arc::new(Mutool::new(path)),
                ("pdftoppm" | "mutool", Err(_)) => Arc::new(Unavailable { name: name.clone() }),
                (other, _) => {
                    return Err(Error::InvalidInput(format!(
                        "unknown raster method '{other}' (expected pdftoppm or mutool)"
                    )))
                }
            };
            Ok(method)
        })
        .collect()
}

/// Decode any supported image and encode it as JPEG.
pub fn reencode_as_jpeg(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)?;
    Ok(out)
}

fn ensure_jpeg(tool: &str, bytes: Vec<u8>) -> Result<Vec<u8>> {
    match image::guess_format(&bytes) {
        Ok(ImageFormat::Jpeg) => Ok(bytes),
        Ok(_) => reencode_as_jpeg(&bytes),
        Err(_) => Err(Error::tool_failed(tool, "output is not an image")),
    }
}

/// Encode an RGB buffer as JPEG. Shared with placeholder generation.
pub fn encode_jpeg(img: &image::RgbImage) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageFormat::Jpeg)?;
    Ok(cursor.into_inner())
}
