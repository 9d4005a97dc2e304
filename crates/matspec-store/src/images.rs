//! Image directory loading and transport encoding.
//!
//! Every accepted image is decoded (which doubles as validation), downscaled
//! so its longest edge fits the configured limit, and re-encoded as JPEG. The
//! raw bytes are dropped once the base64 form exists.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use matspec_core::ImageInput;
use tracing::{debug, info, warn};

use crate::StoreError;

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
const JPEG_QUALITY: u8 = 90;
const TRANSPORT_MEDIA_TYPE: &str = "image/jpeg";

/// A candidate file that could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedImage {
    pub name: String,
    pub reason: String,
}

/// Result of scanning an image directory.
#[derive(Debug)]
pub struct LoadReport {
    /// Valid images in file-name order.
    pub images: Vec<ImageInput>,
    pub skipped: Vec<SkippedImage>,
}

/// True when the file name carries a PNG or JPEG extension (any case).
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Decode, downscale and re-encode one image for transport.
pub fn encode_image(name: &str, bytes: &[u8], max_edge: u32) -> Result<ImageInput, StoreError> {
    let invalid = |message: String| StoreError::Image {
        name: name.to_string(),
        message,
    };

    if bytes.is_empty() {
        return Err(invalid("file is empty".into()));
    }
    let format = image::guess_format(bytes)
        .map_err(|_| invalid("not a recognisable PNG or JPEG image".into()))?;
    let mut img = image::load_from_memory(bytes)
        .map_err(|e| invalid(format!("corrupt or unreadable image ({e})")))?;

    let (width, height) = (img.width(), img.height());
    if width.max(height) > max_edge {
        img = img.resize(max_edge, max_edge, FilterType::Triangle);
        debug!(
            name,
            from = %format!("{width}x{height}"),
            to = %format!("{}x{}", img.width(), img.height()),
            "downscaled image"
        );
    }

    let rgb = img.to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| invalid(format!("could not re-encode image ({e})")))?;

    Ok(ImageInput {
        name: name.to_string(),
        path: None,
        source_media_type: format.to_mime_type().to_string(),
        media_type: TRANSPORT_MEDIA_TYPE.to_string(),
        encoded: STANDARD.encode(&jpeg),
        original_len: bytes.len(),
    })
}

/// Load every PNG/JPEG file in `dir`, skipping unreadable ones.
///
/// Subdirectories and other file types are ignored without a warning.
pub fn load_images(dir: &Path, max_edge: u32) -> Result<LoadReport, StoreError> {
    if !dir.is_dir() {
        return Err(StoreError::InvalidDirectory(dir.to_path_buf()));
    }

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_supported_image(p))
        .collect();
    candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut images = Vec::new();
    let mut skipped = Vec::new();
    for path in candidates {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let loaded = std::fs::read(&path)
            .map_err(|e| StoreError::Image {
                name: name.clone(),
                message: format!("could not read file ({e})"),
            })
            .and_then(|bytes| encode_image(&name, &bytes, max_edge));
        match loaded {
            Ok(mut input) => {
                input.path = Some(path);
                images.push(input);
            }
            Err(e) => {
                let reason = match e {
                    StoreError::Image { message, .. } => message,
                    other => other.to_string(),
                };
                warn!(image = %name, %reason, "skipping image");
                skipped.push(SkippedImage { name, reason });
            }
        }
    }

    if images.is_empty() {
        return Err(StoreError::NoImages(dir.to_path_buf()));
    }
    info!(
        loaded = images.len(),
        skipped = skipped.len(),
        dir = %dir.display(),
        "loaded images"
    );
    Ok(LoadReport { images, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 90, 60]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn decode(input: &ImageInput) -> image::DynamicImage {
        let bytes = STANDARD.decode(&input.encoded).unwrap();
        image::load_from_memory(&bytes).unwrap()
    }

    #[test]
    fn two_valid_one_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jpg"), image_bytes(8, 8, ImageFormat::Jpeg)).unwrap();
        std::fs::write(dir.path().join("a.png"), image_bytes(8, 8, ImageFormat::Png)).unwrap();
        std::fs::write(dir.path().join("c.png"), b"\x89PNG\r\n\x1a\nnot really").unwrap();

        let report = load_images(dir.path(), 1568).unwrap();
        let names: Vec<_> = report.images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.jpg"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "c.png");
        assert!(report.images.iter().all(|i| i.media_type == "image/jpeg"));
        assert_eq!(report.images[0].source_media_type, "image/png");
        assert_eq!(report.images[0].path, Some(dir.path().join("a.png")));
    }

    #[test]
    fn ignores_other_files_and_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();
        std::fs::write(dir.path().join("PHOTO.JPEG"), image_bytes(4, 4, ImageFormat::Jpeg))
            .unwrap();

        let report = load_images(dir.path(), 1568).unwrap();
        assert_eq!(report.images.len(), 1);
        assert_eq!(report.images[0].name, "PHOTO.JPEG");
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn missing_directory_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_images(&dir.path().join("missing"), 1568).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDirectory(_)));
    }

    #[test]
    fn directory_without_valid_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"").unwrap();
        let err = load_images(dir.path(), 1568).unwrap_err();
        assert!(matches!(err, StoreError::NoImages(_)));
    }

    #[test]
    fn large_images_are_downscaled() {
        let input = encode_image("wide.png", &image_bytes(400, 100, ImageFormat::Png), 200)
            .unwrap();
        let img = decode(&input);
        assert_eq!((img.width(), img.height()), (200, 50));
    }

    #[test]
    fn small_images_keep_their_size() {
        let input = encode_image("small.png", &image_bytes(30, 20, ImageFormat::Png), 200)
            .unwrap();
        let img = decode(&input);
        assert_eq!((img.width(), img.height()), (30, 20));
    }

    #[test]
    fn text_is_not_an_image() {
        let err = encode_image("x.png", b"hello world", 1568).unwrap_err();
        assert!(matches!(err, StoreError::Image { .. }));
    }
}
