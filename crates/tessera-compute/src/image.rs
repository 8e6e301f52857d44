//! Host-side image buffer.

use crate::{ComputeError, ComputeResult};

/// Flat row-major `f32` image, channel-interleaved (RGBA for the demos).
///
/// Element `(x, y, c)` lives at `(y * width + x) * channels + c`. Values are
/// conceptually in `[0, 1]` but nothing here enforces it.
#[derive(Clone, PartialEq)]
pub struct ImageBuffer {
    pub(crate) data: Vec<f32>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channels per pixel.
    pub channels: u32,
}

impl ImageBuffer {
    /// Create from f32 data.
    pub fn from_f32(data: Vec<f32>, width: u32, height: u32, channels: u32) -> ComputeResult<Self> {
        if width == 0 || height == 0 {
            return Err(ComputeError::InvalidDimensions(width, height));
        }
        if channels == 0 {
            return Err(ComputeError::InvalidParams("image needs at least one channel".into()));
        }
        let expected = (width as usize) * (height as usize) * (channels as usize);
        if data.len() != expected {
            return Err(ComputeError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height, channels })
    }

    /// Create from 8-bit samples, rescaled by `v / 255`.
    pub fn from_u8(data: &[u8], width: u32, height: u32, channels: u32) -> ComputeResult<Self> {
        let floats = data.iter().map(|&v| v as f32 / 255.0).collect();
        Self::from_f32(floats, width, height, channels)
    }

    /// Zero-filled image.
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        let size = (width as usize) * (height as usize) * (channels as usize);
        Self {
            data: vec![0.0; size],
            width,
            height,
            channels,
        }
    }

    /// Get pixel data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Image dimensions.
    pub fn dimensions(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.channels)
    }

    /// Flat index of `(x, y, c)`.
    #[inline]
    pub fn index(&self, x: u32, y: u32, c: u32) -> usize {
        ((y as usize) * (self.width as usize) + (x as usize)) * (self.channels as usize) + c as usize
    }

    /// Sample at `(x, y, c)`.
    pub fn get(&self, x: u32, y: u32, c: u32) -> f32 {
        self.data[self.index(x, y, c)]
    }

    /// Set sample at `(x, y, c)`.
    pub fn set(&mut self, x: u32, y: u32, c: u32, v: f32) {
        let i = self.index(x, y, c);
        self.data[i] = v;
    }

    /// Number of pixels.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * 4
    }

    /// Quantize to 8-bit with `round(clamp(v, 0, 1) * 255)`.
    ///
    /// This is the display-side conversion; kernels never apply it.
    pub fn to_u8(&self) -> Vec<u8> {
        self.data
            .iter()
            .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect()
    }

    /// Largest absolute per-sample difference against `other`.
    pub fn max_abs_diff(&self, other: &ImageBuffer) -> ComputeResult<f32> {
        if self.dimensions() != other.dimensions() {
            return Err(ComputeError::BufferSizeMismatch {
                expected: self.data.len(),
                actual: other.data.len(),
            });
        }
        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max))
    }
}

impl std::fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}
