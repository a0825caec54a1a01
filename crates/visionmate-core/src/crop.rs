//! Grayscale conversion and face-crop extraction.

use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageError};

/// Edge length (pixels) of the square crops fed to the classifier.
pub const CANONICAL_FACE_SIZE: u32 = 200;

/// Decode an encoded image payload (PNG, JPEG, ...).
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    image::load_from_memory(bytes)
}

/// Convert to single-channel luma. Already-grayscale input is passed through.
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    match image {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        other => other.to_luma8(),
    }
}

/// Crop `face` out of `gray` and resize it to a `size`×`size` square.
///
/// The box is clamped to the frame first. Returns `None` when nothing of the
/// box remains inside the frame.
pub fn crop_face(gray: &GrayImage, face: &FaceBox, size: u32) -> Option<GrayImage> {
    if face.area() == 0 {
        return None;
    }
    let (width, height) = gray.dimensions();
    let left = face.left.clamp(0, width as i32) as u32;
    let right = face.right.clamp(0, width as i32) as u32;
    let top = face.top.clamp(0, height as i32) as u32;
    let bottom = face.bottom.clamp(0, height as i32) as u32;

    if right <= left || bottom <= top {
        return None;
    }

    let cropped = imageops::crop_imm(gray, left, top, right - left, bottom - top).to_image();
    Some(resize_canonical(cropped, size))
}

/// Resize a crop to `size`×`size`; crops that already match are returned as-is.
pub fn resize_canonical(crop: GrayImage, size: u32) -> GrayImage {
    if crop.dimensions() == (size, size) {
        crop
    } else {
        imageops::resize(&crop, size, size, FilterType::Triangle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]))
    }

    #[test]
    fn test_to_gray_passthrough() {
        let gray = gradient(8, 4);
        let out = to_gray(&DynamicImage::ImageLuma8(gray.clone()));
        assert_eq!(out, gray);
    }

    #[test]
    fn test_to_gray_from_rgb() {
        let rgb = RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]));
        let out = to_gray(&DynamicImage::ImageRgb8(rgb));
        assert_eq!(out.dimensions(), (4, 4));
        assert!(out.pixels().all(|p| p[0] == 200));
    }

    #[test]
    fn test_crop_inside_frame() {
        let gray = gradient(100, 80);
        let crop = crop_face(&gray, &FaceBox::new(10, 60, 50, 20), 32).unwrap();
        assert_eq!(crop.dimensions(), (32, 32));
    }

    #[test]
    fn test_crop_clamped_to_frame() {
        let gray = gradient(50, 50);
        let crop = crop_face(&gray, &FaceBox::new(-20, 70, 30, 40), 16).unwrap();
        assert_eq!(crop.dimensions(), (16, 16));
    }

    #[test]
    fn test_crop_outside_frame_is_degenerate() {
        let gray = gradient(50, 50);
        assert!(crop_face(&gray, &FaceBox::new(60, 120, 90, 70), 16).is_none());
        assert!(crop_face(&gray, &FaceBox::new(-40, -5, -10, -30), 16).is_none());
        assert!(crop_face(&gray, &FaceBox::new(10, 20, 10, 5), 16).is_none());
    }

    #[test]
    fn test_crop_exact_size_is_pixel_identical() {
        let gray = gradient(64, 64);
        let crop = crop_face(&gray, &FaceBox::new(0, 64, 64, 0), 64).unwrap();
        assert_eq!(crop, gray);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_image(b"not an image").is_err());
    }
}
