use std::path::Path;

use image::DynamicImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisionError};

/// Network input size, height first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub height: u32,
    pub width: u32,
}

impl Default for InputShape {
    fn default() -> Self {
        Self {
            height: 256,
            width: 128,
        }
    }
}

/// Per-channel RGB normalization applied after scaling pixels to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalization {
    fn default() -> Self {
        // ImageNet statistics
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

/// Read and decode an image file, keeping I/O and decode failures apart.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let bytes = std::fs::read(path).map_err(|source| VisionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image::load_from_memory(&bytes)?)
}

/// Resize to `shape` and lay the image out as a normalized (1, 3, H, W) tensor.
pub fn to_tensor(img: &DynamicImage, shape: InputShape, norm: &Normalization) -> Array4<f32> {
    let resized = img
        .resize_exact(shape.width, shape.height, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let (h, w) = (shape.height as usize, shape.width as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - norm.mean[c]) / norm.std[c];
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_tensor_layout() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 90, Rgb([255, 0, 128])));
        let tensor = to_tensor(&img, InputShape::default(), &Normalization::default());
        assert_eq!(tensor.shape(), &[1, 3, 256, 128]);

        let norm = Normalization::default();
        assert_abs_diff_eq!(
            tensor[[0, 0, 10, 10]],
            (1.0 - norm.mean[0]) / norm.std[0],
            epsilon = 1e-5
        );
        assert_abs_diff_eq!(
            tensor[[0, 1, 200, 100]],
            -norm.mean[1] / norm.std[1],
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_grayscale_input_is_expanded() {
        let img = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(8, 8, image::Luma([51])));
        let identity = Normalization {
            mean: [0.0; 3],
            std: [1.0; 3],
        };
        let tensor = to_tensor(&img, InputShape { height: 16, width: 8 }, &identity);
        for c in 0..3 {
            assert_abs_diff_eq!(tensor[[0, c, 3, 3]], 0.2, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_load_image_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.png");
        assert!(matches!(load_image(&missing), Err(VisionError::Read { .. })));

        let corrupt = dir.path().join("corrupt.jpg");
        std::fs::write(&corrupt, b"definitely not a jpeg").unwrap();
        assert!(matches!(load_image(&corrupt), Err(VisionError::Decode(_))));
    }
}
