use image::imageops::{self, FilterType};
use image::RgbaImage;

use super::super::errors::{DecodeError, DecoderSetupError};
use super::super::types::{DecodedFrame, OutputParams, PixelFormat};

/// Validates the requested output before any frame is converted.
pub fn check_output(params: &OutputParams) -> Result<(), DecoderSetupError> {
    if params.width == 0 || params.height == 0 {
        return Err(DecoderSetupError::OpenConversion(format!(
            "invalid output size {}x{}",
            params.width, params.height
        )));
    }
    Ok(())
}

/// Scales a tightly packed RGBA picture to the preview size (bicubic) and
/// lays it out in the negotiated pixel format.
pub fn rgba_to_frame(
    rgba: Vec<u8>,
    width: u32,
    height: u32,
    params: &OutputParams,
    sequence: u64,
) -> Result<DecodedFrame, DecodeError> {
    let picture = RgbaImage::from_raw(width, height, rgba).ok_or_else(|| {
        DecodeError(format!("picture buffer too small for {}x{}", width, height))
    })?;

    let scaled = if (width, height) == (params.width, params.height) {
        picture
    } else {
        imageops::resize(&picture, params.width, params.height, FilterType::CatmullRom)
    };

    let mut data = scaled.into_raw();
    if params.format == PixelFormat::Bgra8 {
        for px in data.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
    }

    Ok(DecodedFrame::new(
        data,
        params.width,
        params.height,
        params.format,
        sequence,
    ))
}
