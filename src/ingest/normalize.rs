use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;

/// Pixel layouts a webcam may hand back after format negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            _ => None,
        }
    }
}

/// Convert a captured buffer into an RGB `Frame`.
///
/// Drivers may pad buffers past the image payload; trailing bytes are ignored.
pub(crate) fn to_frame(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<Frame> {
    let w = width as usize;
    let h = height as usize;
    let pixel_count = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    match format {
        PixelFormat::Rgb24 => {
            let expected = pixel_count * 3;
            if pixels.len() < expected {
                return Err(anyhow!(
                    "RGB frame too short: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            Frame::new(pixels[..expected].to_vec(), width, height)
        }
        PixelFormat::Yuyv => {
            let expected = pixel_count * 2;
            if pixels.len() < expected {
                return Err(anyhow!(
                    "YUYV frame too short: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            Frame::new(yuyv_to_rgb(&pixels[..expected]), width, height)
        }
        PixelFormat::Mjpeg => {
            let image = image::load_from_memory(pixels).context("decode mjpeg frame")?;
            Ok(Frame::from_image(image.into_rgb8()))
        }
    }
}

fn yuyv_to_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() / 2 * 3);
    for chunk in pixels.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_neutral_chroma_produces_gray() -> Result<()> {
        let yuyv = vec![128u8, 128, 128, 128, 128, 128, 128, 128];
        let frame = to_frame(&yuyv, 2, 2, PixelFormat::Yuyv)?;
        assert_eq!(frame.data(), &[128u8; 12][..]);
        Ok(())
    }

    #[test]
    fn rgb_ignores_driver_padding() -> Result<()> {
        let mut pixels = vec![1u8; 9];
        pixels.extend_from_slice(&[0xAA; 4]);
        let frame = to_frame(&pixels, 1, 3, PixelFormat::Rgb24)?;
        assert_eq!(frame.data(), &[1u8; 9][..]);
        Ok(())
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(to_frame(&[0u8; 5], 2, 2, PixelFormat::Yuyv).is_err());
        assert!(to_frame(&[0u8; 5], 2, 2, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"NV12"), None);
    }
}
