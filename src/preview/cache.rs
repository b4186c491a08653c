//! Preview artifact cache
//!
//! Artifacts live in `.data/previews/` and are named by the MD5 hex digest of
//! the relative key, so the cache survives moving the dataset. A file that
//! exists is a finished preview; a missing file just means "not generated
//! yet" and will be retried on the next pass.

use std::fs;
use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbaImage};
use tracing::debug;

use super::extractor::{PreviewError, ThumbnailExtractor};
use crate::paths::RelKey;

/// Extension of cached preview files
pub const PREVIEW_EXTENSION: &str = "jpg";

/// Outcome of [`ensure`] when a preview is available
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Artifact was already on disk; no decoding happened
    Cached(PathBuf),
    /// Artifact was just written
    Generated(PathBuf),
}

impl EnsureOutcome {
    pub fn path(&self) -> &Path {
        match self {
            EnsureOutcome::Cached(path) | EnsureOutcome::Generated(path) => path,
        }
    }
}

/// `<md5 hex of key>.jpg`
pub fn artifact_name(key: &RelKey) -> String {
    format!("{:x}.{}", md5::compute(key.as_str().as_bytes()), PREVIEW_EXTENSION)
}

pub fn artifact_path(cache_dir: &Path, key: &RelKey) -> PathBuf {
    cache_dir.join(artifact_name(key))
}

/// Make sure a preview exists for `key`.
///
/// Skips all decoding when the artifact is already present. Otherwise the
/// extractor writes to a temporary file which is renamed into place only
/// once complete, so a half-written JPEG is never mistaken for a cached one.
pub fn ensure(
    key: &RelKey,
    source: &Path,
    cache_dir: &Path,
    extractor: &dyn ThumbnailExtractor,
) -> Result<EnsureOutcome, PreviewError> {
    let artifact = artifact_path(cache_dir, key);
    if artifact.is_file() {
        return Ok(EnsureOutcome::Cached(artifact));
    }

    if !extractor.is_available() {
        return Err(PreviewError::Unavailable);
    }
    if !source.is_file() {
        return Err(PreviewError::Open {
            path: source.to_path_buf(),
            reason: "file not found".into(),
        });
    }

    fs::create_dir_all(cache_dir)?;
    let tmp = artifact.with_extension(format!("{PREVIEW_EXTENSION}.tmp"));
    if let Err(e) = extractor.extract(source, &tmp).and_then(|_| Ok(fs::rename(&tmp, &artifact)?)) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    debug!("📸 Generated preview for {} ({})", key, extractor.name());
    Ok(EnsureOutcome::Generated(artifact))
}

/// Shrink `frame` to fit `max_width` x `max_height` and save it as JPEG.
///
/// Frames already inside the box are written unscaled.
pub fn write_jpeg(
    frame: DynamicImage,
    dest: &Path,
    max_width: u32,
    max_height: u32,
) -> Result<(), PreviewError> {
    let fitted = fit_within(frame, max_width, max_height);
    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(fitted.to_rgb8()).save_with_format(dest, ImageFormat::Jpeg)?;
    Ok(())
}

/// Decode a cached preview for display, fitted into the preview box
pub fn load_thumbnail(path: &Path, max_width: u32, max_height: u32) -> Result<RgbaImage, PreviewError> {
    let img = image::open(path)?;
    Ok(fit_within(img, max_width, max_height).to_rgba8())
}

fn fit_within(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    if img.width() <= max_width && img.height() <= max_height {
        img
    } else {
        img.resize(max_width, max_height, FilterType::Lanczos3)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Writes a solid-colour frame and counts how often it was asked to
    #[derive(Default)]
    pub(crate) struct CountingExtractor {
        pub calls: Arc<AtomicUsize>,
    }

    impl ThumbnailExtractor for CountingExtractor {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn extract(&self, source: &Path, dest: &Path) -> Result<(), PreviewError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if source.extension().is_some_and(|ext| ext == "avi") {
                return Err(PreviewError::NoFrame {
                    path: source.to_path_buf(),
                });
            }
            let frame = RgbImage::from_pixel(640, 360, Rgb([200, 30, 30]));
            write_jpeg(DynamicImage::ImageRgb8(frame), dest, 320, 240)
        }
    }

    fn key(raw: &str) -> RelKey {
        RelKey::parse(raw).unwrap()
    }

    #[test]
    fn test_artifact_name_is_md5_of_key() {
        // md5("a/1.mp4")
        let expected = format!("{:x}.jpg", md5::compute(b"a/1.mp4"));
        assert_eq!(artifact_name(&key("a/1.mp4")), expected);
        assert_eq!(artifact_name(&key("a\\1.mp4")), expected);
        assert_ne!(artifact_name(&key("a/2.mp4")), expected);
    }

    #[test]
    fn test_ensure_skips_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        fs::write(&source, b"not really a video").unwrap();
        let cache = dir.path().join("previews");
        let extractor = CountingExtractor::default();
        let k = key("clip.mp4");

        let first = ensure(&k, &source, &cache, &extractor).unwrap();
        assert!(matches!(first, EnsureOutcome::Generated(_)));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

        for _ in 0..2 {
            let again = ensure(&k, &source, &cache, &extractor).unwrap();
            assert_eq!(again, EnsureOutcome::Cached(first.path().to_path_buf()));
        }
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

        let img = load_thumbnail(first.path(), 320, 240).unwrap();
        assert_eq!((img.width(), img.height()), (320, 180));
    }

    #[test]
    fn test_failed_extraction_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.avi");
        fs::write(&source, b"junk").unwrap();
        let cache = dir.path().join("previews");
        let extractor = CountingExtractor::default();
        let k = key("broken.avi");

        assert!(ensure(&k, &source, &cache, &extractor).is_err());
        assert!(!artifact_path(&cache, &k).exists());
        assert_eq!(fs::read_dir(&cache).unwrap().count(), 0);

        // Not cached as a failure: the next call tries again
        assert!(ensure(&k, &source, &cache, &extractor).is_err());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unavailable_decoder_and_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("previews");
        let k = key("gone.mp4");

        let err = ensure(&k, &dir.path().join("gone.mp4"), &cache, &super::super::UnavailableExtractor)
            .unwrap_err();
        assert!(matches!(err, PreviewError::Unavailable));

        let err = ensure(&k, &dir.path().join("gone.mp4"), &cache, &CountingExtractor::default())
            .unwrap_err();
        assert!(matches!(err, PreviewError::Open { .. }));
    }
}
