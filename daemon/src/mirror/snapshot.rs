use super::{FrameSnapshotter, SNAPSHOT_PREFIX};
use anyhow::{Context, Result};
use image::{DynamicImage, ImageBuffer, Rgb};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const FFMPEG_TIMEOUT: Duration = Duration::from_secs(5);
const JPEG_QUALITY: u8 = 85;

/// Frame extraction through the `ffmpeg` tool.
pub struct FfmpegSnapshotter {
    max_dimension: u32,
}

impl FfmpegSnapshotter {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }
}

impl FrameSnapshotter for FfmpegSnapshotter {
    fn snapshot(&self, video: &Path, time_ms: u64, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let frame = tempfile::Builder::new()
            .prefix("loopwall-frame-")
            .suffix(".png")
            .tempfile_in(dir)
            .context("Failed to create frame file")?;

        let seek = format!("{:.3}", time_ms as f64 / 1000.0);
        crate::process::stdout_of(
            Command::new("ffmpeg")
                .args(["-hide_banner", "-loglevel", "error", "-y", "-ss", &seek, "-i"])
                .arg(video)
                .args(["-frames:v", "1", "-an", "-sn"])
                .arg(frame.path()),
            FFMPEG_TIMEOUT,
        )
        .context("ffmpeg could not extract a frame")?;

        let decoded = image::open(frame.path()).context("Failed to decode extracted frame")?;
        let (width, height) =
            bounded_dimensions(decoded.width(), decoded.height(), self.max_dimension);
        let scaled = resize_rgb(&decoded, width, height)?;

        let mut output = tempfile::Builder::new()
            .prefix(SNAPSHOT_PREFIX)
            .suffix(".tmp")
            .tempfile_in(dir)
            .context("Failed to create snapshot file")?;
        {
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                BufWriter::new(output.as_file_mut()),
                JPEG_QUALITY,
            );
            scaled
                .write_with_encoder(encoder)
                .context("Failed to encode snapshot")?;
        }

        let name = format!(
            "{}{}.jpg",
            SNAPSHOT_PREFIX,
            chrono::Local::now().format("%Y%m%d-%H%M%S%3f")
        );
        let target = dir.join(name);
        output
            .persist(&target)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        Ok(target)
    }
}

/// Shrink `(width, height)` so the longer side is at most `max`, keeping the
/// aspect ratio. Smaller images are left alone.
pub fn bounded_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max || longest == 0 || max == 0 {
        return (width, height);
    }
    let scale = max as f64 / longest as f64;
    let scaled = |side: u32| ((side as f64 * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

fn resize_rgb(
    image: &DynamicImage,
    target_width: u32,
    target_height: u32,
) -> Result<ImageBuffer<Rgb<u8>, Vec<u8>>> {
    use fast_image_resize as fr;

    let src_image = image.to_rgb8();
    let (src_width, src_height) = src_image.dimensions();
    if (src_width, src_height) == (target_width, target_height) {
        return Ok(src_image);
    }

    let src = fr::images::Image::from_vec_u8(
        src_width,
        src_height,
        src_image.into_raw(),
        fr::PixelType::U8x3,
    )
    .context("Failed to create source image")?;
    let mut dst = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x3);

    fr::Resizer::new()
        .resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3)),
        )
        .context("Failed to resize frame")?;

    ImageBuffer::from_raw(target_width, target_height, dst.into_vec())
        .context("Failed to create output image buffer")
}
