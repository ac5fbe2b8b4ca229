//! Validation-time image preprocessing
//!
//! Decode → RGB → resize shorter side → center crop → CHW floats in `[0, 1]`.
//! There is no randomness here: identical bytes always produce an identical
//! tensor.

use std::io::Cursor;

use domain::value_objects::{CHANNELS, ImageTensor};
use image::{ImageReader, Limits, RgbImage, imageops::FilterType};

use crate::{config::InferenceConfig, error::VisionError};

/// Upper bound on decoder allocations
const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

/// Turns uploaded bytes into model input
#[derive(Debug, Clone)]
pub struct Preprocessor {
    resize_shorter_side: u32,
    crop_size: u32,
    max_dimension: u32,
}

impl Preprocessor {
    /// Create a preprocessor; the crop must fit inside the resized image
    pub fn new(
        resize_shorter_side: u32,
        crop_size: u32,
        max_dimension: u32,
    ) -> Result<Self, VisionError> {
        if crop_size == 0 || resize_shorter_side == 0 {
            return Err(VisionError::Preprocess(
                "resize and crop sizes must be positive".to_string(),
            ));
        }
        if crop_size > resize_shorter_side {
            return Err(VisionError::Preprocess(format!(
                "crop {crop_size} is larger than the resized side {resize_shorter_side}"
            )));
        }
        Ok(Self {
            resize_shorter_side,
            crop_size,
            max_dimension,
        })
    }

    /// Create a preprocessor from inference configuration
    pub fn from_config(config: &InferenceConfig) -> Result<Self, VisionError> {
        Self::new(
            config.resize_shorter_side,
            config.crop_size,
            config.max_image_dimension,
        )
    }

    /// Side length of the produced tensor
    pub const fn crop_size(&self) -> u32 {
        self.crop_size
    }

    /// Decode, resize, crop and convert
    pub fn prepare(&self, bytes: &[u8]) -> Result<ImageTensor, VisionError> {
        let rgb = self.decode(bytes)?;
        let resized = self.resize_shorter(&rgb);
        let cropped = self.center_crop(&resized);
        to_tensor(&cropped)
    }

    /// Decode any supported format into 8-bit RGB
    pub fn decode(&self, bytes: &[u8]) -> Result<RgbImage, VisionError> {
        if bytes.is_empty() {
            return Err(VisionError::Decode("empty upload".to_string()));
        }

        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| VisionError::Decode(e.to_string()))?;
        if reader.format().is_none() {
            return Err(VisionError::Decode("unrecognised image format".to_string()));
        }

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(MAX_DECODE_ALLOC);
        reader.limits(limits);

        let rgb = reader.decode()?.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(VisionError::Decode("image has no pixels".to_string()));
        }
        Ok(rgb)
    }

    /// Scale so the shorter side equals the target, keeping the aspect ratio
    fn resize_shorter(&self, img: &RgbImage) -> RgbImage {
        let (w, h) = img.dimensions();
        let target = self.resize_shorter_side;
        let (new_w, new_h) = if w <= h {
            (target, scaled_long_side(target, h, w))
        } else {
            (scaled_long_side(target, w, h), target)
        };
        if (new_w, new_h) == (w, h) {
            return img.clone();
        }
        image::imageops::resize(img, new_w, new_h, FilterType::Triangle)
    }

    /// Square crop from the middle of the image
    fn center_crop(&self, img: &RgbImage) -> RgbImage {
        let (w, h) = img.dimensions();
        let size = self.crop_size;
        let left = crop_offset(w, size);
        let top = crop_offset(h, size);
        image::imageops::crop_imm(img, left, top, size.min(w), size.min(h)).to_image()
    }
}

/// `int(target * long / short)`, never below `target`
fn scaled_long_side(target: u32, long: u32, short: u32) -> u32 {
    let scaled = u64::from(target) * u64::from(long) / u64::from(short.max(1));
    u32::try_from(scaled).unwrap_or(u32::MAX).max(target)
}

/// `(len - size) / 2` rounded half to even, zero when the crop does not fit
fn crop_offset(len: u32, size: u32) -> u32 {
    if len <= size {
        return 0;
    }
    (f64::from(len - size) / 2.0).round_ties_even() as u32
}

/// Interleaved HWC bytes to planar CHW floats
fn to_tensor(img: &RgbImage) -> Result<ImageTensor, VisionError> {
    let (w, h) = img.dimensions();
    let (w, h) = (w as usize, h as usize);
    let plane = w * h;
    let mut data = vec![0.0f32; CHANNELS * plane];

    for (i, pixel) in img.pixels().enumerate() {
        for c in 0..CHANNELS {
            data[c * plane + i] = f32::from(pixel[c]) / 255.0;
        }
    }

    ImageTensor::new(h, w, data).map_err(|e| VisionError::shape(CHANNELS * plane, e))
}

#[cfg(test)]
mod tests {
    use image::{ImageFormat, Rgb};

    use super::*;

    fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn default_pre() -> Preprocessor {
        Preprocessor::new(256, 224, 16_384).unwrap()
    }

    #[test]
    fn landscape_image_becomes_224_square() {
        let tensor = default_pre().prepare(&png(400, 300, [255, 0, 0])).unwrap();
        assert_eq!(tensor.height(), 224);
        assert_eq!(tensor.width(), 224);
        assert_eq!(tensor.data().len(), 3 * 224 * 224);
    }

    #[test]
    fn small_image_is_upscaled() {
        let tensor = default_pre().prepare(&png(10, 20, [0, 0, 255])).unwrap();
        assert_eq!((tensor.height(), tensor.width()), (224, 224));
    }

    #[test]
    fn values_are_scaled_channel_first() {
        let tensor = default_pre().prepare(&png(256, 256, [255, 0, 51])).unwrap();
        assert!((tensor.channel(0)[0] - 1.0).abs() < 1e-6);
        assert!(tensor.channel(1)[0].abs() < 1e-6);
        assert!((tensor.channel(2)[100] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn grayscale_is_expanded_to_rgb() {
        let gray = image::GrayImage::from_pixel(300, 300, image::Luma([128]));
        let mut out = Cursor::new(Vec::new());
        gray.write_to(&mut out, ImageFormat::Png).unwrap();
        let tensor = default_pre().prepare(out.get_ref()).unwrap();
        let v = tensor.channel(0)[0];
        assert!((tensor.channel(1)[0] - v).abs() < 1e-6);
        assert!((tensor.channel(2)[0] - v).abs() < 1e-6);
    }

    #[test]
    fn deterministic_for_identical_bytes() {
        let bytes = png(321, 123, [10, 20, 30]);
        let pre = default_pre();
        assert_eq!(pre.prepare(&bytes).unwrap(), pre.prepare(&bytes).unwrap());
    }

    #[test]
    fn text_bytes_are_decode_errors() {
        let err = default_pre().prepare(b"definitely not an image").unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn empty_bytes_are_decode_errors() {
        assert!(default_pre().prepare(&[]).unwrap_err().is_input_error());
    }

    #[test]
    fn truncated_png_is_decode_error() {
        let bytes = png(64, 64, [1, 2, 3]);
        let err = default_pre().prepare(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn oversized_dimensions_rejected() {
        let pre = Preprocessor::new(256, 224, 32).unwrap();
        assert!(pre.prepare(&png(64, 16, [0, 0, 0])).unwrap_err().is_input_error());
    }

    #[test]
    fn crop_larger_than_resize_rejected() {
        assert!(Preprocessor::new(200, 224, 100).is_err());
    }

    #[test]
    fn long_side_scaling_truncates() {
        assert_eq!(scaled_long_side(256, 400, 300), 341);
        assert_eq!(scaled_long_side(256, 256, 256), 256);
    }

    #[test]
    fn crop_offset_rounds_half_to_even() {
        assert_eq!(crop_offset(256, 224), 16);
        assert_eq!(crop_offset(341, 224), 58);
        assert_eq!(crop_offset(343, 224), 60);
        assert_eq!(crop_offset(100, 224), 0);
    }
}
