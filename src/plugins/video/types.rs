use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Scale applied to the vehicle's native picture for the preview pane.
pub const PREVIEW_SCALE: f64 = 1.4125;

/// Default capacity of the recording buffer, in packets.
pub const DEFAULT_BUFFER_CAPACITY: usize = 5000;

/// One opaque fragment of the compressed video elementary stream.
///
/// Cloning shares the underlying bytes, so the decoder and the recording
/// buffer can both hold the same packet without copying it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoPacket {
    data: Bytes,
}

impl VideoPacket {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for VideoPacket {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static [u8]> for VideoPacket {
    fn from(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }
}

/// Raw pixel layouts the preview path can negotiate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit blue, green, red, alpha. Matches the toolkit's native 32-bit layout.
    #[default]
    Bgra8,
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

/// Preview geometry, following the vehicle's two camera modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoMode {
    /// 4:3 picture, 960x720 before scaling.
    #[default]
    Normal,
    /// 16:9 picture, 1280x720 before scaling.
    Wide,
}

impl VideoMode {
    pub fn from_wide(wide: bool) -> Self {
        if wide {
            VideoMode::Wide
        } else {
            VideoMode::Normal
        }
    }

    pub fn native_size(&self) -> (u32, u32) {
        match self {
            VideoMode::Normal => (960, 720),
            VideoMode::Wide => (1280, 720),
        }
    }

    /// Size of the preview pane, truncated like the integer conversion the
    /// display layout uses.
    pub fn preview_size(&self) -> (u32, u32) {
        let (w, h) = self.native_size();
        (
            (w as f64 * PREVIEW_SCALE) as u32,
            (h as f64 * PREVIEW_SCALE) as u32,
        )
    }
}

/// What the decoder should hand to the display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputParams {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl OutputParams {
    pub fn for_mode(mode: VideoMode, format: PixelFormat) -> Self {
        let (width, height) = mode.preview_size();
        Self {
            format,
            width,
            height,
        }
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn frame_len(&self) -> usize {
        self.stride() * self.height as usize
    }
}

/// Properties of the video stream found while opening the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
}

/// One fully decoded, displayable raster image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: PixelFormat,
    /// Position of this frame in the decoder's output, starting at 0.
    pub sequence: u64,
}

impl DecodedFrame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        Self {
            data: Arc::new(data),
            width,
            height,
            stride: width as usize * format.bytes_per_pixel(),
            format,
            sequence,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Check that the buffer holds at least `stride * height` bytes.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() >= self.stride * self.height as usize
    }
}
