use base64::{engine::general_purpose::STANDARD, Engine};
use image::RgbaImage;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::window::OverlayWindow;

pub const THUMBNAIL_WIDTH: u32 = 1920;
pub const THUMBNAIL_HEIGHT: u32 = 1080;

/// Enumerates displays and grabs the first one.
pub trait ScreenSource: Send + Sync {
    fn capture_primary(&self) -> Result<RgbaImage>;
}

#[cfg(feature = "desktop")]
pub struct XcapSource;

#[cfg(feature = "desktop")]
impl ScreenSource for XcapSource {
    fn capture_primary(&self) -> Result<RgbaImage> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| AppError::Capture(format!("Failed to list monitors: {}", e)))?;
        let monitor = monitors.first().ok_or(AppError::NoDisplay)?;
        monitor
            .capture_image()
            .map_err(|e| AppError::Capture(format!("Failed to capture screen: {}", e)))
    }
}

/// Fits the frame within the thumbnail bounds, keeping the aspect ratio.
pub fn thumbnail(image: RgbaImage) -> RgbaImage {
    let (width, height) = image.dimensions();
    if width <= THUMBNAIL_WIDTH && height <= THUMBNAIL_HEIGHT {
        return image;
    }
    let scale = f64::min(
        THUMBNAIL_WIDTH as f64 / width as f64,
        THUMBNAIL_HEIGHT as f64 / height as f64,
    );
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    image::imageops::resize(
        &image,
        new_width,
        new_height,
        image::imageops::FilterType::Triangle,
    )
}

pub fn to_png_data_url(image: RgbaImage) -> Result<String> {
    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut buffer, image::ImageFormat::Png)
        .map_err(|e| AppError::Capture(format!("Failed to encode image: {}", e)))?;
    Ok(format!(
        "data:image/png;base64,{}",
        STANDARD.encode(buffer.into_inner())
    ))
}

/// Captures the screen without the overlay in it.
///
/// The overlay is made transparent, given `settle` to disappear, and then
/// restored to the opacity it had before, on every path. Nothing confirms
/// the compositor actually redrew within `settle`, so a slow redraw can
/// still leak the overlay into the frame.
pub async fn capture_screen(
    window: &dyn OverlayWindow,
    source: Arc<dyn ScreenSource>,
    settle: Duration,
) -> Result<String> {
    let prior = window.opacity();
    window.set_opacity(0.0)?;
    tokio::time::sleep(settle).await;

    let grabbed = tokio::task::spawn_blocking(move || {
        source.capture_primary().and_then(|frame| to_png_data_url(thumbnail(frame)))
    })
    .await
    .map_err(|e| AppError::Capture(format!("Capture task failed: {}", e)));

    if let Err(e) = window.set_opacity(prior) {
        log::error!("Failed to restore overlay opacity: {}", e);
    }

    let data_url = grabbed??;
    log::debug!("Screen captured ({} bytes)", data_url.len());
    Ok(data_url)
}
