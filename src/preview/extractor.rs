//! Frame extraction capability
//!
//! Decoding video is optional. The pipeline only ever talks to a
//! `ThumbnailExtractor`; which implementation it gets is decided once at
//! startup by [`detect`].

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use image::ImageFormat;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache::write_jpeg;
use crate::settings::PreviewSettings;

/// Why a preview could not be produced for one video
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("no video decoder available")]
    Unavailable,

    #[error("cannot open {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("no decodable frame in {}", path.display())]
    NoFrame { path: PathBuf },

    #[error("failed to encode preview: {0}")]
    Image(#[from] image::ImageError),

    #[error("preview cache I/O: {0}")]
    Io(#[from] io::Error),
}

/// Something that can turn a video into a still JPEG
pub trait ThumbnailExtractor: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool {
        true
    }

    /// Write a representative frame of `source` as a JPEG at `dest`
    fn extract(&self, source: &Path, dest: &Path) -> Result<(), PreviewError>;
}

/// Used when no decoder exists; every request reports `Unavailable`
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableExtractor;

impl ThumbnailExtractor for UnavailableExtractor {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn extract(&self, _source: &Path, _dest: &Path) -> Result<(), PreviewError> {
        Err(PreviewError::Unavailable)
    }
}

/// Grabs a frame by running the `ffmpeg` executable and reading a JPEG
/// from its stdout.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    settings: PreviewSettings,
}

impl CommandExtractor {
    /// Returns the extractor only if `ffmpeg -version` runs successfully
    pub fn find(settings: PreviewSettings) -> Option<Self> {
        let status = Command::new(&settings.ffmpeg_binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => Some(CommandExtractor { settings }),
            Ok(status) => {
                debug!("{} -version exited with {}", settings.ffmpeg_binary.display(), status);
                None
            }
            Err(e) => {
                debug!("{} not runnable: {}", settings.ffmpeg_binary.display(), e);
                None
            }
        }
    }

    /// Run ffmpeg once; `offset` of `None` takes the very first frame
    fn grab(&self, source: &Path, offset: Option<f64>) -> Result<Vec<u8>, PreviewError> {
        let mut command = Command::new(&self.settings.ffmpeg_binary);
        command.args(["-v", "error", "-nostdin"]);
        if let Some(secs) = offset {
            command.args(["-ss", &format!("{secs:.3}")]);
        }
        command
            .arg("-i")
            .arg(source)
            .args(["-frames:v", "1", "-f", "image2pipe", "-c:v", "mjpeg", "pipe:1"]);

        let output = command.stdin(Stdio::null()).output().map_err(|e| PreviewError::Open {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PreviewError::Open {
                path: source.to_path_buf(),
                reason: stderr.lines().last().unwrap_or("ffmpeg failed").to_string(),
            });
        }
        Ok(output.stdout)
    }
}

impl ThumbnailExtractor for CommandExtractor {
    fn name(&self) -> &'static str {
        "ffmpeg-cli"
    }

    fn extract(&self, source: &Path, dest: &Path) -> Result<(), PreviewError> {
        // Seeking past the end of a short clip yields nothing or fails,
        // depending on the container
        let jpeg = match self.grab(source, Some(self.settings.frame_offset().as_secs_f64())) {
            Ok(jpeg) if !jpeg.is_empty() => jpeg,
            Ok(_) => self.grab(source, None)?,
            Err(e) => {
                debug!("Seek failed for {}, using the first frame: {}", source.display(), e);
                self.grab(source, None)?
            }
        };
        if jpeg.is_empty() {
            return Err(PreviewError::NoFrame {
                path: source.to_path_buf(),
            });
        }

        let frame = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)?;
        write_jpeg(frame, dest, self.settings.max_width, self.settings.max_height)
    }
}

/// Pick the best available extractor for this machine
pub fn detect(settings: &PreviewSettings) -> Arc<dyn ThumbnailExtractor> {
    if !settings.enabled {
        info!("Preview generation disabled in settings");
        return Arc::new(UnavailableExtractor);
    }

    if let Some(extractor) = in_process(settings) {
        return extractor;
    }

    match CommandExtractor::find(settings.clone()) {
        Some(extractor) => {
            info!("🎞️  Previews extracted with {}", settings.ffmpeg_binary.display());
            Arc::new(extractor)
        }
        None => {
            warn!("⚠️  No video decoder found, previews are unavailable");
            Arc::new(UnavailableExtractor)
        }
    }
}

#[cfg(feature = "ffmpeg")]
fn in_process(settings: &PreviewSettings) -> Option<Arc<dyn ThumbnailExtractor>> {
    match super::ffmpeg::FfmpegExtractor::new(settings.clone()) {
        Ok(extractor) => {
            info!("🎞️  Previews decoded in-process with FFmpeg");
            Some(Arc::new(extractor))
        }
        Err(e) => {
            warn!("⚠️  FFmpeg init failed, trying the ffmpeg executable: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "ffmpeg"))]
fn in_process(_settings: &PreviewSettings) -> Option<Arc<dyn ThumbnailExtractor>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_extractor() {
        let extractor = UnavailableExtractor;
        assert!(!extractor.is_available());
        let err = extractor
            .extract(Path::new("a.mp4"), Path::new("a.jpg"))
            .unwrap_err();
        assert!(matches!(err, PreviewError::Unavailable));
    }

    #[test]
    fn test_detect_respects_disabled_setting() {
        let settings = PreviewSettings {
            enabled: false,
            ..PreviewSettings::default()
        };
        assert!(!detect(&settings).is_available());
    }

    #[test]
    fn test_missing_binary_is_not_used() {
        let settings = PreviewSettings {
            ffmpeg_binary: PathBuf::from("/definitely/not/here/ffmpeg"),
            ..PreviewSettings::default()
        };
        assert!(CommandExtractor::find(settings.clone()).is_none());
        #[cfg(not(feature = "ffmpeg"))]
        assert!(!detect(&settings).is_available());
    }

    /// Fake `ffmpeg` scripts; each writes `frame.jpg` to stdout unless told otherwise
    #[cfg(unix)]
    mod scripted {
        use super::*;
        use image::{DynamicImage, RgbImage};
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        const SEEK_EMPTY: &str = r#"case "$*" in *-ss*) exit 0 ;; esac"#;
        const SEEK_FAILS: &str = r#"case "$*" in *-ss*) echo "seek past end" >&2; exit 1 ;; esac"#;

        /// Writes a script that runs `prelude` and then prints a 640x480 JPEG
        fn fake_ffmpeg(dir: &Path, prelude: &str) -> PreviewSettings {
            let frame = dir.join("frame.jpg");
            DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 480, image::Rgb([40, 90, 160])))
                .save_with_format(&frame, ImageFormat::Jpeg)
                .unwrap();

            let script = dir.join("ffmpeg");
            fs::write(
                &script,
                format!("#!/bin/sh\n{prelude}\ncat '{}'\n", frame.display()),
            )
            .unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

            PreviewSettings {
                ffmpeg_binary: script,
                ..PreviewSettings::default()
            }
        }

        fn assert_preview_written(settings: PreviewSettings, dir: &Path) {
            let extractor = CommandExtractor::find(settings).expect("script runs");
            let dest = dir.join("out.jpg");
            extractor.extract(&dir.join("clip.mp4"), &dest).unwrap();

            let preview = image::open(&dest).unwrap();
            assert!(preview.width() <= 320 && preview.height() <= 240);
        }

        #[test]
        fn test_falls_back_when_seek_returns_nothing() {
            let dir = tempfile::tempdir().unwrap();
            let settings = fake_ffmpeg(dir.path(), SEEK_EMPTY);
            assert_preview_written(settings, dir.path());
        }

        #[test]
        fn test_falls_back_when_seek_fails() {
            let dir = tempfile::tempdir().unwrap();
            let settings = fake_ffmpeg(dir.path(), SEEK_FAILS);
            assert_preview_written(settings, dir.path());
        }

        #[test]
        fn test_frame_at_offset() {
            let dir = tempfile::tempdir().unwrap();
            let settings = fake_ffmpeg(dir.path(), "");
            assert_preview_written(settings, dir.path());
        }

        #[test]
        fn test_no_frame_at_all() {
            let dir = tempfile::tempdir().unwrap();
            let settings = fake_ffmpeg(dir.path(), "exit 0");
            let extractor = CommandExtractor::find(settings).unwrap();
            let err = extractor
                .extract(&dir.path().join("clip.mp4"), &dir.path().join("out.jpg"))
                .unwrap_err();
            assert!(matches!(err, PreviewError::NoFrame { .. }));
        }
    }
}
