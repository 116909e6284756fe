use std::io::{BufWriter, Cursor};

use anyhow::Result;
use bytes::Bytes;
use fast_image_resize::{images::Image, PixelType, Resizer};
use image::{codecs::jpeg, DynamicImage, ExtendedColorType, ImageEncoder, ImageReader};

use super::{data_url::to_data_url, SUPPORT_IMAGE_FORMATS};
use crate::error::GenerateError;

/// Models are trained around this size; larger uploads only cost bandwidth.
pub const DEFAULT_MAX_SIDE: u32 = 512;

pub const JPEG_QUALITY: u8 = 90;

/// Scales `(width, height)` so the longer side is at most `max_side`,
/// keeping the aspect ratio. Never returns a zero dimension.
pub fn fit_within(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let max_side = max_side.max(1);
    let longest = width.max(height);

    if longest <= max_side {
        return (width.max(1), height.max(1));
    }

    let scale = max_side as f64 / longest as f64;
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_side);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_side);
    (w, h)
}

/// Decodes an uploaded photo, bounds it to `max_side` and returns it as a
/// JPEG Data URL.
pub fn compress(blob: &[u8], max_side: u32) -> Result<String, GenerateError> {
    let reader = ImageReader::new(Cursor::new(blob))
        .with_guessed_format()
        .map_err(|_| GenerateError::InvalidImage)?;

    match reader.format() {
        Some(format) if SUPPORT_IMAGE_FORMATS.contains(&format) => {}
        _ => return Err(GenerateError::InvalidImage),
    }

    let src = reader.decode().map_err(|_| GenerateError::InvalidImage)?;

    let jpeg = resize_to_jpeg(&src, max_side)
        .map_err(|e| GenerateError::Internal(format!("image encoding failed: {e}")))?;

    Ok(to_data_url("image/jpeg", &jpeg))
}

fn resize_to_jpeg(src_image: &DynamicImage, max_side: u32) -> Result<Bytes> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(src_image.to_rgb8());
    let (target_width, target_height) = fit_within(rgb.width(), rgb.height(), max_side);

    let mut dst_image = Image::new(target_width, target_height, PixelType::U8x3);

    let mut resizer = Resizer::new();
    resizer.resize(&rgb, &mut dst_image, None)?;

    let mut writer = BufWriter::new(Vec::new());
    jpeg::JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).write_image(
        dst_image.buffer(),
        target_width,
        target_height,
        ExtendedColorType::Rgb8,
    )?;

    Ok(Bytes::from(writer.into_inner()?))
}
