//! Image decoding and tensor preprocessing.
//!
//! All three pipeline stages share one preprocessing convention: exact resize
//! to the configured input resolution, scale to [0, 1], then per-channel
//! mean/std normalization.

use std::path::Path;

use burn::prelude::*;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{Array, Ix4};
use serde::Deserialize;

use crate::error::XrayError;

/// Per-channel normalization applied after scaling pixels to [0, 1].
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

impl Normalization {
    /// Normalized value of a raw [0, 255] channel sample.
    pub fn apply(&self, channel: usize, value: u8) -> f32 {
        ((value as f32) / 255.0 - self.mean[channel]) / self.std[channel]
    }

    /// Normalized value of a black pixel, used to hide superpixels during
    /// perturbation.
    pub fn hidden_value(&self, channel: usize) -> f32 {
        self.apply(channel, 0)
    }
}

/// Shared preprocessing front-end for every stage.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    input_size: u32,
    normalization: Normalization,
}

impl Preprocessor {
    pub fn new(input_size: u32, normalization: Normalization) -> Self {
        Self {
            input_size,
            normalization,
        }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn normalization(&self) -> &Normalization {
        &self.normalization
    }

    /// Decode an image file. Unreadable or corrupt bytes fail with
    /// [`XrayError::Decoding`].
    pub fn decode_path(&self, path: &Path) -> Result<DynamicImage, XrayError> {
        let reader = image::ImageReader::open(path)
            .map_err(image::ImageError::IoError)?
            .with_guessed_format()
            .map_err(image::ImageError::IoError)?;
        Ok(reader.decode()?)
    }

    /// Decode an in-memory byte buffer.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<DynamicImage, XrayError> {
        let reader = image::ImageReader::new(std::io::Cursor::new(bytes))
            .with_guessed_format()
            .map_err(image::ImageError::IoError)?;
        Ok(reader.decode()?)
    }

    /// Resize exactly to the model's input resolution.
    pub fn resize(&self, img: &DynamicImage) -> DynamicImage {
        img.resize_exact(self.input_size, self.input_size, FilterType::CatmullRom)
    }

    /// Convert a resized image to a normalized NCHW batch of one.
    pub fn to_array(&self, img: &DynamicImage) -> Array<f32, Ix4> {
        let size = self.input_size as usize;
        let mut input = Array::zeros((1, 3, size, size));
        for pixel in img.pixels() {
            let x = pixel.0 as usize;
            let y = pixel.1 as usize;
            let [r, g, b, _] = pixel.2 .0;
            input[[0, 0, y, x]] = self.normalization.apply(0, r);
            input[[0, 1, y, x]] = self.normalization.apply(1, g);
            input[[0, 2, y, x]] = self.normalization.apply(2, b);
        }
        input
    }
}

/// Move a preprocessed NCHW batch onto a backend.
pub fn tensor_from_batch<B: Backend>(batch: Array<f32, Ix4>, device: &B::Device) -> Tensor<B, 4> {
    let (n, c, h, w) = batch.dim();
    let (data, _) = batch.into_raw_vec_and_offset();
    Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([n, c, h, w])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuBackend;
    use image::{ImageBuffer, Rgb};

    fn preprocessor() -> Preprocessor {
        Preprocessor::new(64, Normalization::default())
    }

    #[test]
    fn test_to_array_shape_and_values() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 80, Rgb([255, 0, 127]));
        let img = DynamicImage::ImageRgb8(img);

        let pre = preprocessor();
        let resized = pre.resize(&img);
        assert_eq!(resized.dimensions(), (64, 64));

        let input = pre.to_array(&resized);
        assert_eq!(input.shape(), &[1, 3, 64, 64]);

        // (255/255 - 0.5) / 0.5 = 1.0 and (0/255 - 0.5) / 0.5 = -1.0
        assert!((input[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((input[[0, 1, 0, 0]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_hidden_value_is_black() {
        let norm = Normalization::default();
        assert!((norm.hidden_value(0) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let pre = preprocessor();
        let err = pre.decode_bytes(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, XrayError::Decoding(_)));
    }

    #[test]
    fn test_tensor_from_batch() {
        let pre = preprocessor();
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(64, 64, Rgb([10, 20, 30])));
        let batch = pre.to_array(&img);

        let device = Default::default();
        let tensor = tensor_from_batch::<CpuBackend>(batch, &device);
        assert_eq!(tensor.dims(), [1, 3, 64, 64]);
    }
}
