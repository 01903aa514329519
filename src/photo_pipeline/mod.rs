//! PhotoPipeline - raw capture to stored variants
//!
//! ## Responsibilities
//!
//! - Turn one raw captured file into "web" and "thumbnail" variants
//! - Compose the session photo strip
//! - Session photo file cleanup
//!
//! Processing runs under `spawn_blocking` so a burst can continue into the
//! next countdown while the previous photo is still being encoded. Output
//! bytes are deterministic for identical input bytes and flags.

use crate::error::{Error, Result};
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const WEB_QUALITY: u8 = 90;
const THUMBNAIL_QUALITY: u8 = 80;
const STRIP_QUALITY: u8 = 92;
const STRIP_WIDTH: u32 = 1080;

/// Storage locators for one processed photo, relative to the photos dir
#[derive(Debug, Clone)]
pub struct ProcessedPhoto {
    pub web_path: String,
    pub thumbnail_path: String,
}

/// Photo processing pipeline
pub struct PhotoProcessor {
    photos_dir: PathBuf,
    web_max_width: u32,
    thumbnail_max_width: u32,
}

impl PhotoProcessor {
    pub fn new(photos_dir: PathBuf, web_max_width: u32, thumbnail_max_width: u32) -> Self {
        Self {
            photos_dir,
            web_max_width,
            thumbnail_max_width,
        }
    }

    /// Process a captured photo into stored web + thumbnail variants.
    ///
    /// With `save_raw` the web variant is the source bytes verbatim;
    /// the thumbnail is always re-encoded.
    pub async fn process(
        &self,
        source: &Path,
        session_id: &str,
        sequence: i64,
        save_raw: bool,
    ) -> Result<ProcessedPhoto> {
        let data = tokio::fs::read(source).await?;

        let session_dir = self.photos_dir.join(session_id);
        tokio::fs::create_dir_all(&session_dir).await?;

        let tag = short_tag();
        let ext = if save_raw {
            source
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("jpg")
                .to_string()
        } else {
            "jpg".to_string()
        };
        let web_name = format!("web_{:03}_{}.{}", sequence, tag, ext);
        let thumb_name = format!("thumb_{:03}_{}.jpg", sequence, tag);

        let web_max = self.web_max_width;
        let thumb_max = self.thumbnail_max_width;
        let (web_bytes, thumb_bytes) =
            tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, Vec<u8>)> {
                let thumb = resize_and_encode(&data, thumb_max, THUMBNAIL_QUALITY)?;
                let web = if save_raw {
                    data
                } else {
                    resize_and_encode(&data, web_max, WEB_QUALITY)?
                };
                Ok((web, thumb))
            })
            .await
            .map_err(|e| Error::Internal(format!("processing task failed: {}", e)))??;

        let web_size = web_bytes.len();
        tokio::fs::write(session_dir.join(&web_name), &web_bytes).await?;
        tokio::fs::write(session_dir.join(&thumb_name), &thumb_bytes).await?;

        tracing::info!(
            session_id = %session_id,
            sequence = sequence,
            web_size = web_size,
            save_raw = save_raw,
            "Photo processed and stored"
        );

        Ok(ProcessedPhoto {
            web_path: format!("{}/{}", session_id, web_name),
            thumbnail_path: format!("{}/{}", session_id, thumb_name),
        })
    }

    /// Public URL for a stored photo locator
    pub fn photo_url(&self, rel_path: &str) -> String {
        format!("/photos/{}", rel_path)
    }

    /// Absolute filesystem path for a stored photo locator
    pub fn photo_path(&self, rel_path: &str) -> PathBuf {
        self.photos_dir.join(rel_path)
    }

    /// Delete all stored files for a session
    pub async fn delete_session_photos(&self, session_id: &str) -> Result<()> {
        let session_dir = self.photos_dir.join(session_id);
        if session_dir.exists() {
            tokio::fs::remove_dir_all(&session_dir).await?;
            tracing::info!(session_id = %session_id, "Deleted session photos");
        }
        Ok(())
    }

    /// Compose a vertical photo strip from stored web variants, ordered.
    pub async fn compose_strip(&self, rel_paths: &[String]) -> Result<Vec<u8>> {
        if rel_paths.is_empty() {
            return Err(Error::NotFound("no photos in session".to_string()));
        }

        let mut sources = Vec::with_capacity(rel_paths.len());
        for rel in rel_paths {
            sources.push(tokio::fs::read(self.photos_dir.join(rel)).await?);
        }

        tokio::task::spawn_blocking(move || compose_strip_blocking(&sources))
            .await
            .map_err(|e| Error::Internal(format!("strip task failed: {}", e)))?
    }
}

fn short_tag() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Decode, cap width, re-encode as JPEG at the given quality.
pub fn resize_and_encode(data: &[u8], max_width: u32, quality: u8) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)
        .map_err(|e| Error::ProcessingFailed(format!("image decode failed: {}", e)))?;

    let img = cap_width(img, max_width);
    encode_jpeg(&img.to_rgb8(), quality)
}

fn cap_width(img: DynamicImage, max_width: u32) -> DynamicImage {
    if img.width() <= max_width {
        return img;
    }
    let height = (img.height() as u64 * max_width as u64 / img.width() as u64).max(1) as u32;
    img.resize_exact(max_width, height, FilterType::Lanczos3)
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode_image(img)
        .map_err(|e| Error::ProcessingFailed(format!("jpeg encode failed: {}", e)))?;
    Ok(buf)
}

/// Strip layout: gradient background, film-strip holes, photos with white
/// borders stacked vertically.
fn compose_strip_blocking(sources: &[Vec<u8>]) -> Result<Vec<u8>> {
    let outer_padding: u32 = 54;
    let inner_padding: u32 = 27;
    let photo_border: u32 = 14;
    let header_height: u32 = 150;
    let footer_height: u32 = 108;

    let photo_area_width = STRIP_WIDTH - outer_padding * 2;
    let photo_width = photo_area_width - photo_border * 2;

    let mut photos = Vec::with_capacity(sources.len());
    for data in sources {
        let img = image::load_from_memory(data)
            .map_err(|e| Error::ProcessingFailed(format!("strip decode failed: {}", e)))?;
        let height = (img.height() as u64 * photo_width as u64 / img.width() as u64).max(1) as u32;
        photos.push(
            img.resize_exact(photo_width, height, FilterType::Lanczos3)
                .to_rgb8(),
        );
    }

    let total_photo_height: u32 = photos.iter().map(|p| p.height() + photo_border * 2).sum();
    let total_inner = inner_padding * (photos.len() as u32 - 1);
    let total_height =
        header_height + total_photo_height + total_inner + footer_height + outer_padding * 2;

    // Soft vertical gradient background
    let mut strip = RgbImage::from_fn(STRIP_WIDTH, total_height, |_, y| {
        let t = y as f32 / total_height as f32;
        Rgb([
            (250.0 + 5.0 * t) as u8,
            (245.0 - 5.0 * t) as u8,
            (255.0 - 5.0 * t) as u8,
        ])
    });

    // Film-strip holes down both edges
    let hole_radius: i64 = 12;
    let hole_spacing = 72;
    let hole_color = Rgb([220, 215, 230]);
    let mut y = (outer_padding + 36) as i64;
    while y < (total_height - outer_padding) as i64 {
        for cx in [18i64, STRIP_WIDTH as i64 - 18] {
            fill_circle(&mut strip, cx, y, hole_radius, hole_color);
        }
        y += hole_spacing;
    }

    // Paste photos with white borders
    let mut y_offset = outer_padding + header_height;
    for photo in &photos {
        let bordered_w = photo.width() + photo_border * 2;
        let bordered_h = photo.height() + photo_border * 2;
        let mut bordered = RgbImage::from_pixel(bordered_w, bordered_h, Rgb([255, 255, 255]));
        image::imageops::replace(&mut bordered, photo, photo_border as i64, photo_border as i64);
        image::imageops::replace(
            &mut strip,
            &bordered,
            outer_padding as i64,
            y_offset as i64,
        );
        y_offset += bordered_h + inner_padding;
    }

    encode_jpeg(&strip, STRIP_QUALITY)
}

fn fill_circle(img: &mut RgbImage, cx: i64, cy: i64, radius: i64, color: Rgb<u8>) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        encode_jpeg(&img, 90).unwrap()
    }

    #[tokio::test]
    async fn test_process_creates_both_variants() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.jpg");
        std::fs::write(&raw, sample_jpeg(1600, 1000)).unwrap();

        let processor = PhotoProcessor::new(dir.path().join("photos"), 800, 200);
        let processed = processor.process(&raw, "sess-1", 1, false).await.unwrap();

        let web = image::open(processor.photo_path(&processed.web_path)).unwrap();
        let thumb = image::open(processor.photo_path(&processed.thumbnail_path)).unwrap();
        assert_eq!(web.width(), 800);
        assert_eq!(thumb.width(), 200);
        assert!(processed.web_path.starts_with("sess-1/web_001_"));
        assert!(processed.thumbnail_path.starts_with("sess-1/thumb_001_"));
    }

    #[tokio::test]
    async fn test_process_save_raw_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.jpg");
        let source_bytes = sample_jpeg(640, 480);
        std::fs::write(&raw, &source_bytes).unwrap();

        let processor = PhotoProcessor::new(dir.path().join("photos"), 320, 100);
        let processed = processor.process(&raw, "sess-2", 4, true).await.unwrap();

        let stored = std::fs::read(processor.photo_path(&processed.web_path)).unwrap();
        assert_eq!(stored, source_bytes, "raw passthrough must not re-encode");
    }

    #[tokio::test]
    async fn test_process_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.jpg");
        std::fs::write(&raw, b"not an image at all").unwrap();

        let processor = PhotoProcessor::new(dir.path().join("photos"), 800, 200);
        let err = processor.process(&raw, "sess-3", 1, false).await.unwrap_err();
        assert!(matches!(err, Error::ProcessingFailed(_)));
    }

    #[test]
    fn test_resize_and_encode_deterministic() {
        let data = sample_jpeg(500, 300);
        let a = resize_and_encode(&data, 250, 85).unwrap();
        let b = resize_and_encode(&data, 250, 85).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_small_image_not_upscaled() {
        let data = sample_jpeg(100, 80);
        let out = resize_and_encode(&data, 400, 85).unwrap();
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!(img.width(), 100);
    }

    #[tokio::test]
    async fn test_compose_strip() {
        let dir = tempfile::tempdir().unwrap();
        let photos_dir = dir.path().join("photos");
        std::fs::create_dir_all(photos_dir.join("sess-4")).unwrap();
        std::fs::write(photos_dir.join("sess-4/a.jpg"), sample_jpeg(800, 500)).unwrap();
        std::fs::write(photos_dir.join("sess-4/b.jpg"), sample_jpeg(800, 500)).unwrap();

        let processor = PhotoProcessor::new(photos_dir, 800, 200);
        let strip = processor
            .compose_strip(&["sess-4/a.jpg".to_string(), "sess-4/b.jpg".to_string()])
            .await
            .unwrap();

        let img = image::load_from_memory(&strip).unwrap();
        assert_eq!(img.width(), STRIP_WIDTH);
        assert!(img.height() > 500);
    }

    #[tokio::test]
    async fn test_compose_strip_empty() {
        let dir = tempfile::tempdir().unwrap();
        let processor = PhotoProcessor::new(dir.path().to_path_buf(), 800, 200);
        let err = processor.compose_strip(&[]).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
