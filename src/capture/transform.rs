//! Frame transform
//!
//! Mirror correction for front-facing cameras followed by a uniform rescale.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Flip + rescale applied to every captured frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransform {
    /// Horizontal mirror before scaling
    pub mirror: bool,

    /// Uniform scale factor (1.0 = native size)
    pub scale: f64,
}

impl Default for FrameTransform {
    fn default() -> Self {
        Self {
            mirror: true,
            scale: 1.0,
        }
    }
}

impl FrameTransform {
    pub fn new(mirror: bool, scale: f64) -> Self {
        Self { mirror, scale }
    }

    /// Apply the transform to `image`
    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        let flipped = if self.mirror {
            imageops::flip_horizontal(image)
        } else {
            image.clone()
        };
        rescale(flipped, self.scale)
    }

    /// Output size for an input of `width` x `height`
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        scaled_size(width, height, self.scale)
    }
}

/// Mirror `image` horizontally, then resize it by `scale`
pub fn apply(image: &RgbImage, scale: f64) -> RgbImage {
    FrameTransform::new(true, scale).apply(image)
}

fn scaled_size(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let w = (width as f64 * scale).round().max(1.0) as u32;
    let h = (height as f64 * scale).round().max(1.0) as u32;
    (w, h)
}

fn rescale(image: RgbImage, scale: f64) -> RgbImage {
    let (width, height) = image.dimensions();
    let (w, h) = scaled_size(width, height, scale);
    if (w, h) == (width, height) {
        return image;
    }
    imageops::resize(&image, w, h, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, (x + y) as u8]))
    }

    #[test]
    fn test_mirror_swaps_columns() {
        let image = gradient(4, 2);
        let out = apply(&image, 1.0);

        assert_eq!(out.dimensions(), (4, 2));
        assert_eq!(out.get_pixel(0, 0), image.get_pixel(3, 0));
        assert_eq!(out.get_pixel(3, 1), image.get_pixel(0, 1));
    }

    #[test]
    fn test_double_flip_restores_original() {
        let image = gradient(17, 9);
        let twice = apply(&apply(&image, 1.0), 1.0);

        assert_eq!(twice, image);
    }

    #[test]
    fn test_scale_preserves_aspect_ratio() {
        let image = gradient(640, 480);

        for scale in [0.5, 0.25, 0.33, 1.5] {
            let out = apply(&image, scale);
            let (w, h) = out.dimensions();
            let ratio = w as f64 / h as f64;
            assert!(
                (ratio - 640.0 / 480.0).abs() < 0.02,
                "scale {} gave {}x{}",
                scale,
                w,
                h
            );
        }
    }

    #[test]
    fn test_tiny_scale_clamps_to_one_pixel() {
        let out = apply(&gradient(10, 4), 0.01);
        assert_eq!(out.dimensions(), (1, 1));
    }

    #[test]
    fn test_mirror_disabled_is_identity_at_unit_scale() {
        let image = gradient(5, 3);
        let out = FrameTransform::new(false, 1.0).apply(&image);
        assert_eq!(out, image);
    }

    #[test]
    fn test_output_size_matches_apply() {
        let transform = FrameTransform::new(true, 0.5);
        let out = transform.apply(&gradient(101, 51));
        assert_eq!(out.dimensions(), transform.output_size(101, 51));
    }
}
