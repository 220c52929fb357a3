// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::HashSet;

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use imageproc::region_labelling::{connected_components, Connectivity};

// Masks are 255 (foreground) or 0. A 3x3 square element applied k times is
// the L-infinity ball of radius k.

pub fn dilate_mask(mask: &GrayImage, iterations: u8) -> GrayImage {
    if iterations == 0 {
        return mask.clone();
    }
    morphology::dilate(mask, Norm::LInf, iterations)
}

/// Dilation followed by erosion.
pub fn close_mask(mask: &GrayImage, iterations: u8) -> GrayImage {
    if iterations == 0 {
        return mask.clone();
    }
    morphology::close(mask, Norm::LInf, iterations)
}

/// Background regions that cannot reach the image border through
/// 4-connected background pixels become foreground.
pub fn fill_holes(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut background = GrayImage::new(width, height);
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] == 0 {
            background.put_pixel(x, y, Luma([255]));
        }
    }
    let labels = connected_components(&background, Connectivity::Four, Luma([0_u8]));
    let mut touches_border = HashSet::new();
    for (x, y, label) in labels.enumerate_pixels() {
        if label[0] != 0 && (x == 0 || y == 0 || x == width - 1 || y == height - 1) {
            touches_border.insert(label[0]);
        }
    }
    let mut filled = GrayImage::new(width, height);
    for (x, y, label) in labels.enumerate_pixels() {
        let l = label[0];
        if l == 0 || !touches_border.contains(&l) {
            filled.put_pixel(x, y, Luma([255]));
        }
    }
    filled
}

pub fn invert_gray(image: &GrayImage) -> GrayImage {
    let mut inverted = image.clone();
    for p in inverted.pixels_mut() {
        p[0] = 255 - p[0];
    }
    inverted
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::gray_image;

    #[test]
    fn test_dilate_mask() {
        let mask = gray_image!(
            0, 0,   0, 0, 0;
            0, 0,   0, 0, 0;
            0, 0, 255, 0, 0;
            0, 0,   0, 0, 0;
            0, 0,   0, 0, 0);
        let dilated = dilate_mask(&mask, 1);
        assert_eq!(dilated, gray_image!(
            0,   0,   0,   0, 0;
            0, 255, 255, 255, 0;
            0, 255, 255, 255, 0;
            0, 255, 255, 255, 0;
            0,   0,   0,   0, 0));
        assert_eq!(dilate_mask(&mask, 2).as_raw().iter().filter(|&&v| v > 0).count(), 25);
        assert_eq!(dilate_mask(&mask, 0), mask);
    }

    #[test]
    fn test_close_mask_bridges_gap() {
        let mask = gray_image!(
            0, 0,   0,   0, 0,   0,   0, 0, 0;
            0, 0,   0,   0, 0,   0,   0, 0, 0;
            0, 0, 255, 255, 0, 255, 255, 0, 0;
            0, 0, 255, 255, 0, 255, 255, 0, 0;
            0, 0,   0,   0, 0,   0,   0, 0, 0;
            0, 0,   0,   0, 0,   0,   0, 0, 0);
        let closed = close_mask(&mask, 1);
        assert_eq!(closed.get_pixel(4, 2)[0], 255);
        assert_eq!(closed.get_pixel(4, 3)[0], 255);
        assert_eq!(closed.get_pixel(2, 2)[0], 255);
        assert_eq!(closed.get_pixel(1, 1)[0], 0);
    }

    #[test]
    fn test_fill_holes() {
        let mask = gray_image!(
            0,   0,   0,   0,   0, 0;
            0, 255, 255, 255, 255, 0;
            0, 255,   0,   0, 255, 0;
            0, 255, 255, 255, 255, 0;
            0,   0,   0,   0,   0, 0);
        let filled = fill_holes(&mask);
        assert_eq!(filled, gray_image!(
            0,   0,   0,   0,   0, 0;
            0, 255, 255, 255, 255, 0;
            0, 255, 255, 255, 255, 0;
            0, 255, 255, 255, 255, 0;
            0,   0,   0,   0,   0, 0));
    }

    #[test]
    fn test_fill_holes_diagonal_leak_is_still_a_hole() {
        // The hole touches the outside only diagonally.
        let mask = gray_image!(
            0,   0,   0,   0;
            0, 255, 255,   0;
            0, 255,   0, 255;
            0, 255, 255, 255);
        let filled = fill_holes(&mask);
        assert_eq!(filled.get_pixel(2, 2)[0], 255);
        assert_eq!(filled.get_pixel(0, 0)[0], 0);
        // Touching the border is not a hole.
        let mask = gray_image!(
            255, 0, 255;
            255, 0, 255);
        assert_eq!(fill_holes(&mask), mask);
    }

    #[test]
    fn test_invert_gray() {
        let image = gray_image!(0, 10, 255);
        assert_eq!(invert_gray(&image), gray_image!(255, 245, 0));
    }
}  // mod tests.
