//! Preprocessed image ready for a forward pass

use crate::errors::DomainError;

/// Number of color channels every model input carries (RGB)
pub const CHANNELS: usize = 3;

/// A channel-first (CHW) RGB image with values scaled to `[0, 1]`
///
/// Produced by the serving-side preprocessing (decode, resize, center crop)
/// and consumed by the model runtime. Normalization with dataset statistics
/// is part of the model, not of this value.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl ImageTensor {
    /// Build a tensor from CHW data, checking the buffer length
    pub fn new(height: usize, width: usize, data: Vec<f32>) -> Result<Self, DomainError> {
        let expected = CHANNELS * height * width;
        if data.len() != expected {
            return Err(DomainError::shape_mismatch(expected, data.len()));
        }
        Ok(Self {
            height,
            width,
            data,
        })
    }

    /// Image height in pixels
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Image width in pixels
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Raw CHW values
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// One channel plane (row-major `height × width`)
    pub fn channel(&self, c: usize) -> &[f32] {
        let plane = self.height * self.width;
        &self.data[c * plane..(c + 1) * plane]
    }
}
