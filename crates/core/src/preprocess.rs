//! Client-side image normalisation before upload.
//!
//! Every image is re-encoded to JPEG with its longest edge capped at
//! [`MAX_DIMENSION`]. Preprocessing never fails: on any decode or encode
//! error the original file is passed through unchanged.

use std::io::Cursor;

use futures::stream::{self, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::types::{SourceFile, MEDIA_TYPE_JPEG};

/// Longest edge allowed after preprocessing, in pixels.
pub const MAX_DIMENSION: u32 = 1600;

/// JPEG quality used for every re-encoded image (0-100).
pub const JPEG_QUALITY: u8 = 85;

/// Concurrent decodes when the core count cannot be determined.
const DEFAULT_DECODE_CONCURRENCY: usize = 4;

/// Target dimensions for an image of `width` x `height`.
///
/// Unchanged when the longest edge is already within [`MAX_DIMENSION`];
/// otherwise scaled uniformly so the longest edge is exactly
/// `MAX_DIMENSION` and the other edge is rounded (never below 1).
pub fn target_dimensions(width: u32, height: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= MAX_DIMENSION {
        return (width, height);
    }
    let scale = f64::from(MAX_DIMENSION) / f64::from(longest);
    let scaled = |edge: u32| ((f64::from(edge) * scale).round() as u32).clamp(1, MAX_DIMENSION);
    (scaled(width), scaled(height))
}

/// Normalise one file for upload.
///
/// Non-image files are returned as-is. Images are decoded, downscaled if
/// needed, and re-encoded as JPEG on the blocking pool.
pub async fn compress(file: SourceFile) -> SourceFile {
    if !file.is_image() {
        return file;
    }

    let bytes = file.bytes().clone();
    let name = file.name().to_string();
    match tokio::task::spawn_blocking(move || reencode(&bytes)).await {
        Ok(Ok(jpeg)) => {
            let renamed = format!("{}.jpg", file.stem());
            tracing::debug!(
                file = %name,
                before = file.size(),
                after = jpeg.len(),
                "Image preprocessed",
            );
            SourceFile::new(renamed, jpeg, MEDIA_TYPE_JPEG, file.modified())
        }
        Ok(Err(e)) => {
            tracing::warn!(file = %name, error = %e, "Image preprocessing failed, using original");
            file
        }
        Err(e) => {
            tracing::warn!(file = %name, error = %e, "Image preprocessing task failed, using original");
            file
        }
    }
}

/// Run [`compress`] over every file, at most one decode per available core
/// at a time. Output order matches input order.
pub async fn compress_images(files: Vec<SourceFile>) -> Vec<SourceFile> {
    let limit = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_DECODE_CONCURRENCY);
    compress_images_bounded(files, limit).await
}

/// [`compress_images`] with an explicit bound on concurrent decodes.
pub async fn compress_images_bounded(files: Vec<SourceFile>, limit: usize) -> Vec<SourceFile> {
    stream::iter(files)
        .map(compress)
        .buffered(limit.max(1))
        .collect()
        .await
}

/// Decode, resize, and JPEG-encode. All intermediate buffers are local.
fn reencode(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let (width, height) = target_dimensions(decoded.width(), decoded.height());
    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Lanczos3)
    };
    let rgb = resized.to_rgb8();
    drop(resized);

    let mut out = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use image::{ImageFormat, RgbImage, RgbaImage};

    use super::*;
    use crate::types::MEDIA_TYPE_PNG;

    fn png_file(name: &str, width: u32, height: u32) -> SourceFile {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        SourceFile::new(name, buf.into_inner(), MEDIA_TYPE_PNG, chrono::Utc::now())
    }

    fn decoded_dimensions(file: &SourceFile) -> (u32, u32) {
        let img = image::load_from_memory(file.bytes()).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn target_dimensions_caps_longest_edge() {
        assert_eq!(target_dimensions(3200, 1600), (1600, 800));
        assert_eq!(target_dimensions(1000, 4000), (400, 1600));
        assert_eq!(target_dimensions(1601, 1601), (1600, 1600));
        assert_eq!(target_dimensions(1600, 900), (1600, 900));
        assert_eq!(target_dimensions(20, 10), (20, 10));
    }

    #[test]
    fn target_dimensions_rounds_and_keeps_thin_edges() {
        // 1600 / 3000 * 1001 = 533.87
        assert_eq!(target_dimensions(3000, 1001), (1600, 534));
        assert_eq!(target_dimensions(10_000, 2), (1600, 1));
    }

    #[tokio::test]
    async fn non_image_is_returned_unchanged() {
        let file = SourceFile::new("rows.csv", b"label_id\nA1\n".to_vec(), "text/csv", chrono::Utc::now());
        let out = compress(file.clone()).await;
        assert_eq!(out, file);
    }

    #[tokio::test]
    async fn oversized_image_is_downscaled_and_reencoded() {
        let file = png_file("front.png", 2000, 1000);
        let modified = file.modified();

        let out = compress(file).await;

        assert_eq!(out.name(), "front.jpg");
        assert_eq!(out.media_type(), MEDIA_TYPE_JPEG);
        assert_eq!(out.modified(), modified);
        let format = image::guess_format(out.bytes()).unwrap();
        assert_eq!(format, ImageFormat::Jpeg);
        let (w, h) = decoded_dimensions(&out);
        assert_eq!((w, h), (1600, 800));
    }

    #[tokio::test]
    async fn small_image_keeps_dimensions() {
        let out = compress(png_file("small.png", 640, 480)).await;
        assert_eq!(out.media_type(), MEDIA_TYPE_JPEG);
        assert_eq!(decoded_dimensions(&out), (640, 480));
    }

    #[tokio::test]
    async fn alpha_channel_images_are_flattened() {
        let img = RgbaImage::from_pixel(32, 16, image::Rgba([10, 20, 30, 100]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        let file = SourceFile::new("alpha.png", buf.into_inner(), MEDIA_TYPE_PNG, chrono::Utc::now());

        let out = compress(file).await;
        assert_eq!(out.name(), "alpha.jpg");
        assert_eq!(decoded_dimensions(&out), (32, 16));
    }

    #[tokio::test]
    async fn undecodable_image_falls_back_to_original() {
        let file = SourceFile::new(
            "broken.png",
            b"definitely not a png".to_vec(),
            MEDIA_TYPE_PNG,
            chrono::Utc::now(),
        );
        let out = compress(file.clone()).await;
        assert_eq!(out, file);
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let files = vec![
            png_file("a.png", 1800, 100),
            SourceFile::new("b.txt", b"x".to_vec(), "text/plain", chrono::Utc::now()),
            png_file("c.png", 50, 50),
        ];

        let out = compress_images(files).await;

        let names: Vec<_> = out.iter().map(|f| f.name()).collect();
        assert_eq!(names, ["a.jpg", "b.txt", "c.jpg"]);
    }

    #[tokio::test]
    async fn bounded_batch_preserves_order_beyond_the_bound() {
        // Larger images first so later, cheaper ones would finish earlier
        // if ordering depended on completion.
        let files: Vec<_> = (0..6)
            .map(|i| png_file(&format!("f{i}.png"), 1800 - i * 250, 40))
            .collect();

        for limit in [0, 1, 2] {
            let out = compress_images_bounded(files.clone(), limit).await;
            let names: Vec<_> = out.iter().map(|f| f.name().to_string()).collect();
            assert_eq!(names, ["f0.jpg", "f1.jpg", "f2.jpg", "f3.jpg", "f4.jpg", "f5.jpg"]);
            assert_eq!(decoded_dimensions(&out[0]), (1600, 36));
        }
    }
}
