//! Decodes still images and animations into RGB565 display frames.

use std::fs::File;
use std::io::{stdout, BufReader, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};

use image::codecs::gif::GifDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, ImageFormat, RgbaImage};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use thiserror::Error;
use tracing::debug;

use gmk87::image::{DISPLAY_HEIGHT, DISPLAY_WIDTH};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("animation has no frames")]
    EmptyAnimation,
}

/// Decoded display frames for one slot, plus the animation's own frame
/// delay when it carries one.
pub struct FrameSource {
    pub frames: Vec<Vec<u16>>,
    pub delay_ms: Option<u16>,
}

/// Decode `path` into display frames. Gifs yield one frame per animation
/// frame; everything else yields a single frame.
pub fn load(path: &Path, background: [u8; 3], nearest: bool) -> Result<FrameSource, MediaError> {
    let file = File::open(path).map_err(|source| MediaError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let reader = image::ImageReader::new(BufReader::new(file))
        .with_guessed_format()
        .map_err(|source| MediaError::Io {
            path: path.display().to_string(),
            source,
        })?;

    if reader.format() == Some(ImageFormat::Gif) {
        let mut inner = reader.into_inner();
        inner.seek(SeekFrom::Start(0)).map_err(|source| MediaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        decode_animation(GifDecoder::new(inner)?, background, nearest)
    } else {
        let image = reader.decode()?;
        Ok(FrameSource {
            frames: vec![encode_frame(image, background, nearest)],
            delay_ms: None,
        })
    }
}

fn decode_animation<'a>(
    decoder: impl AnimationDecoder<'a>,
    background: [u8; 3],
    nearest: bool,
) -> Result<FrameSource, MediaError> {
    let frames = decoder.into_frames().collect_frames()?;
    if frames.is_empty() {
        return Err(MediaError::EmptyAnimation);
    }
    let len = frames.len();

    // the device applies a single delay to the whole animation; take the
    // first frame's
    let (numer, denom) = frames[0].delay().numer_denom_ms();
    let delay_ms = (numer / denom.max(1)) as u16;
    debug!("decoded {len} animation frame(s), {delay_ms}ms delay");

    Ok(FrameSource {
        frames: encode_frames(&frames, background, nearest),
        delay_ms: Some(delay_ms),
    })
}

/// Re-encode animation frames in parallel, preserving their order.
fn encode_frames(frames: &[image::Frame], background: [u8; 3], nearest: bool) -> Vec<Vec<u16>> {
    let len = frames.len();
    let completed = AtomicU16::new(1);
    let encoded = frames
        .par_iter()
        .map(|frame| {
            let pixels = encode_rgba(frame.buffer().clone(), background, nearest);
            let i = completed.fetch_add(1, Ordering::Relaxed);
            print!("\rre-encoding frames ({i}/{len}) ... ");
            stdout().flush().ok();
            pixels
        })
        .collect::<Vec<_>>();
    println!("done");
    encoded
}

fn encode_frame(image: DynamicImage, background: [u8; 3], nearest: bool) -> Vec<u16> {
    encode_rgba(image.to_rgba8(), background, nearest)
}

/// Resize to fill the display and pack as RGB565, mixing alpha against the
/// background color.
fn encode_rgba(buf: RgbaImage, background: [u8; 3], nearest: bool) -> Vec<u16> {
    let [br, bg, bb] = background;
    let resized = DynamicImage::ImageRgba8(buf).resize_to_fill(
        DISPLAY_WIDTH,
        DISPLAY_HEIGHT,
        if nearest {
            FilterType::Nearest
        } else {
            FilterType::Lanczos3
        },
    );

    let pixels = resized
        .to_rgba8()
        .pixels()
        .map(|p| {
            let [mut r, mut g, mut b, a] = p.0;

            // Mix alpha values against the background
            let a = a as f64 / 255.0;
            let ba = 1. - a;
            r = ((br as f64 * ba) + (r as f64 * a)) as u8;
            g = ((bg as f64 * ba) + (g as f64 * a)) as u8;
            b = ((bb as f64 * ba) + (b as f64 * a)) as u8;

            let be = rgb565::Rgb565::from_rgb888_components(r, g, b).to_rgb565_be();
            u16::from_be_bytes(be)
        })
        .collect::<Vec<_>>();
    debug_assert_eq!(pixels.len(), (DISPLAY_WIDTH * DISPLAY_HEIGHT) as usize);
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn opaque_pixels_convert_to_rgb565() {
        let red = RgbaImage::from_pixel(DISPLAY_WIDTH, DISPLAY_HEIGHT, Rgba([255, 0, 0, 255]));
        let pixels = encode_rgba(red, [0, 0, 0], true);
        assert_eq!(pixels.len(), (DISPLAY_WIDTH * DISPLAY_HEIGHT) as usize);
        assert!(pixels.iter().all(|p| *p == 0xf800));
    }

    #[test]
    fn transparent_pixels_take_the_background() {
        let clear = RgbaImage::from_pixel(DISPLAY_WIDTH, DISPLAY_HEIGHT, Rgba([255, 255, 255, 0]));
        let pixels = encode_rgba(clear, [0, 255, 0], true);
        assert!(pixels.iter().all(|p| *p == 0x07e0));
    }

    #[test]
    fn animation_frames_keep_their_order() {
        let colors: [(Rgba<u8>, u16); 3] = [
            (Rgba([255, 0, 0, 255]), 0xf800),
            (Rgba([0, 255, 0, 255]), 0x07e0),
            (Rgba([0, 0, 255, 255]), 0x001f),
        ];
        let frames: Vec<image::Frame> = colors
            .iter()
            .map(|(c, _)| {
                image::Frame::new(RgbaImage::from_pixel(DISPLAY_WIDTH, DISPLAY_HEIGHT, *c))
            })
            .collect();
        let encoded = encode_frames(&frames, [0, 0, 0], true);
        assert_eq!(encoded.len(), colors.len());
        for ((_, expected), pixels) in colors.iter().zip(&encoded) {
            assert!(pixels.iter().all(|p| p == expected));
        }
    }

    #[test]
    fn frames_are_resized_to_the_display() {
        let tiny = RgbaImage::from_pixel(3, 3, Rgba([0, 0, 255, 255]));
        let pixels = encode_rgba(tiny, [0, 0, 0], true);
        assert_eq!(pixels.len(), (DISPLAY_WIDTH * DISPLAY_HEIGHT) as usize);
        assert!(pixels.iter().all(|p| *p == 0x001f));
    }
}
