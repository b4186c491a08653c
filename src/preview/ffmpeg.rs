//! In-process frame extraction with FFmpeg (cargo feature `ffmpeg`)

use std::path::Path;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::video::Video;
use image::{DynamicImage, RgbImage};

use super::cache::write_jpeg;
use super::extractor::{PreviewError, ThumbnailExtractor};
use crate::settings::PreviewSettings;

pub struct FfmpegExtractor {
    settings: PreviewSettings,
}

impl FfmpegExtractor {
    /// Initialise libav once; fails if the libraries cannot be loaded
    pub fn new(settings: PreviewSettings) -> Result<Self, ffmpeg::Error> {
        ffmpeg::init()?;
        Ok(FfmpegExtractor { settings })
    }
}

impl ThumbnailExtractor for FfmpegExtractor {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn extract(&self, source: &Path, dest: &Path) -> Result<(), PreviewError> {
        let offset = self.settings.frame_offset().as_secs_f64();
        let frame = match decode_frame(source, Some(offset))? {
            Some(frame) => frame,
            // Clip shorter than the offset: take whatever decodes first
            None => decode_frame(source, None)?.ok_or_else(|| PreviewError::NoFrame {
                path: source.to_path_buf(),
            })?,
        };
        write_jpeg(
            DynamicImage::ImageRgb8(frame),
            dest,
            self.settings.max_width,
            self.settings.max_height,
        )
    }
}

/// Decode the first frame at or after `at_secs` (or the very first frame).
///
/// `Ok(None)` means the stream ended before reaching the requested time.
fn decode_frame(source: &Path, at_secs: Option<f64>) -> Result<Option<RgbImage>, PreviewError> {
    let open_err = |e: ffmpeg::Error| PreviewError::Open {
        path: source.to_path_buf(),
        reason: e.to_string(),
    };
    let no_frame = || PreviewError::NoFrame {
        path: source.to_path_buf(),
    };

    let mut ictx = input(source).map_err(open_err)?;

    let (video_idx, target_pts) = {
        let stream = ictx.streams().best(Type::Video).ok_or_else(no_frame)?;
        let tb = stream.time_base();
        let target = at_secs
            .map(|t| (t * tb.denominator() as f64 / tb.numerator().max(1) as f64) as i64);
        (stream.index(), target)
    };

    if let Some(t) = at_secs {
        // Container duration and seek positions are in AV_TIME_BASE units
        let ts = (t * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
        let duration = ictx.duration();
        if duration > 0 && duration < ts {
            return Ok(None);
        }
        let _ = ictx.seek(ts, ..=ts);
    }

    // Second context for decoder params (avoids borrow conflict with ictx).
    let ictx2 = input(source).map_err(open_err)?;
    let stream2 = ictx2.stream(video_idx).ok_or_else(no_frame)?;
    let mut decoder = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())
        .map_err(open_err)?
        .decoder()
        .video()
        .map_err(open_err)?;

    let (width, height) = (decoder.width(), decoder.height());
    if width == 0 || height == 0 {
        return Err(no_frame());
    }
    let mut scaler = SwsContext::get(
        decoder.format(),
        width,
        height,
        Pixel::RGB24,
        width,
        height,
        Flags::BILINEAR,
    )
    .map_err(open_err)?;

    let wanted = |frame: &Video| match (target_pts, frame.pts()) {
        (Some(target), Some(pts)) => pts >= target,
        _ => true,
    };

    let mut decoded = Video::empty();
    for (stream, packet) in ictx.packets().flatten() {
        if stream.index() != video_idx {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        while decoder.receive_frame(&mut decoded).is_ok() {
            if wanted(&decoded) {
                return to_rgb(source, &mut scaler, &decoded, (width, height)).map(Some);
            }
        }
    }

    // Drain frames still buffered in the decoder
    let _ = decoder.send_eof();
    while decoder.receive_frame(&mut decoded).is_ok() {
        if wanted(&decoded) {
            return to_rgb(source, &mut scaler, &decoded, (width, height)).map(Some);
        }
    }
    Ok(None)
}

fn to_rgb(
    source: &Path,
    scaler: &mut SwsContext,
    frame: &Video,
    (width, height): (u32, u32),
) -> Result<RgbImage, PreviewError> {
    let mut rgb = Video::empty();
    scaler.run(frame, &mut rgb).map_err(|e| PreviewError::Open {
        path: source.to_path_buf(),
        reason: e.to_string(),
    })?;

    // Destripe: copy only visible pixels, not stride padding
    let stride = rgb.stride(0);
    let raw = rgb.data(0);
    let row_bytes = width as usize * 3;
    let data: Vec<u8> = (0..height as usize)
        .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
        .copied()
        .collect();

    RgbImage::from_raw(width, height, data).ok_or_else(|| PreviewError::NoFrame {
        path: source.to_path_buf(),
    })
}
