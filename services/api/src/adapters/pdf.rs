//! services/api/src/adapters/pdf.rs
//!
//! First-page rasterization with pdfium, plus PNG encoding of the result.
//!
//! The pdfium bindings are owned by one dedicated thread; render requests are
//! queued to it and answered over a oneshot channel.

use async_trait::async_trait;
use bytes::Bytes;
use course_catalog_core::domain::{fit_height, RasterImage};
use course_catalog_core::ports::{PageRasterizer, PortError, PortResult};
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tokio::sync::oneshot;
use tracing::{error, info};

/// Widest thumbnail the rasterizer produces.
pub const MAX_TARGET_WIDTH: u32 = 4096;

struct RenderJob {
    document: Bytes,
    target_width: u32,
    reply: oneshot::Sender<PortResult<RasterImage>>,
}

pub struct PdfiumRasterizer {
    jobs: mpsc::Sender<RenderJob>,
}

impl PdfiumRasterizer {
    /// Binds pdfium (from `library_path`, a file or the directory holding it,
    /// or else the system library) on a new render thread.
    pub fn start(library_path: Option<PathBuf>) -> PortResult<Self> {
        let (jobs, queue) = mpsc::channel::<RenderJob>();
        let (ready_tx, ready_rx) = mpsc::channel::<PortResult<()>>();

        std::thread::Builder::new()
            .name("pdf-render".to_string())
            .spawn(move || {
                let pdfium = match bind(library_path.as_deref()) {
                    Ok(pdfium) => {
                        let _ = ready_tx.send(Ok(()));
                        pdfium
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok(job) = queue.recv() {
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        render_first_page(&pdfium, &job.document, job.target_width)
                    }))
                    .unwrap_or_else(|_| {
                        error!("pdfium panicked while rendering a document");
                        Err(PortError::Unexpected("the renderer crashed".to_string()))
                    });
                    let _ = job.reply.send(result);
                }
            })
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| PortError::Unexpected("render thread exited during startup".to_string()))??;
        info!("pdfium bound; thumbnails enabled");
        Ok(Self { jobs })
    }
}

fn bind(library_path: Option<&Path>) -> PortResult<Pdfium> {
    let bindings = match library_path {
        Some(path) if path.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
        }
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| PortError::Unexpected(format!("failed to bind pdfium: {}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn render_first_page(pdfium: &Pdfium, document: &[u8], target_width: u32) -> PortResult<RasterImage> {
    let rejected = |e: PdfiumError| PortError::Rejected(e.to_string());

    let doc = pdfium.load_pdf_from_byte_slice(document, None).map_err(rejected)?;
    let page = doc.pages().first().map_err(rejected)?;
    let height = fit_height(page.width().value, page.height().value, target_width);

    let config = PdfRenderConfig::new()
        .set_target_width(target_width as i32)
        .set_maximum_height(height as i32);
    let bitmap = page.render_with_config(&config).map_err(rejected)?;

    Ok(RasterImage {
        width: bitmap.width() as u32,
        height: bitmap.height() as u32,
        rgba: bitmap.as_rgba_bytes(),
    })
}

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn rasterize_first_page(
        &self,
        document: Bytes,
        target_width: u32,
    ) -> PortResult<RasterImage> {
        if target_width == 0 || target_width > MAX_TARGET_WIDTH {
            return Err(PortError::Rejected(format!(
                "width must be between 1 and {}",
                MAX_TARGET_WIDTH
            )));
        }

        let (reply, response) = oneshot::channel();
        self.jobs
            .send(RenderJob {
                document,
                target_width,
                reply,
            })
            .map_err(|_| PortError::Unexpected("render thread is gone".to_string()))?;
        response
            .await
            .map_err(|_| PortError::Unexpected("render thread dropped the request".to_string()))?
    }
}

//=========================================================================================
// PNG Encoding
//=========================================================================================

/// Encodes a rendered page as PNG.
pub fn to_png(image: &RasterImage) -> PortResult<Vec<u8>> {
    let buffer = image::RgbaImage::from_raw(image.width, image.height, image.rgba.clone())
        .ok_or_else(|| {
            PortError::Unexpected(format!(
                "{} bytes do not make a {}x{} RGBA image",
                image.rgba.len(),
                image.width,
                image.height
            ))
        })?;

    let mut png = Vec::new();
    buffer
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
    Ok(png)
}
