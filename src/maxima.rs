// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Find Maxima: local maxima of an 8-bit channel that rise above a noise
//! floor, with touching maxima pixels merged into a single maximum.

use std::time::Instant;

use image::{GrayImage, Luma};
use imageproc::rect::Rect;
use imageproc::region_labelling::{connected_components, Connectivity};
use log::{debug, info};

use crate::error::{QuantError, Result};
use crate::image_funcs::invert_gray;
use crate::image_tiff::Channel;
use crate::pixel_source::PixelSource;
use crate::tiling::{core_offset, TileGrid};

#[derive(Copy, Clone, Debug)]
pub struct MaximaParams {
    /// Maxima must be strictly brighter than this.
    pub noise_tolerance: u8,
    /// Side of the square neighborhood; odd.
    pub neighborhood_size: u32,
    /// Adjacency used to merge maxima pixels. Eight by default, so that
    /// diagonally touching plateau pixels make one maximum. For the
    /// four-connected merging of scipy's `ndimage.label` default, use
    /// `Connectivity::Four`.
    pub connectivity: Connectivity,
    /// Process in square tiles of this size rather than all at once.
    pub tile_size: Option<u32>,
    /// Dots are dark on a light background: [find_maxima()] searches the
    /// inverted channel.
    pub light_background: bool,
}

impl Default for MaximaParams {
    fn default() -> Self {
        MaximaParams{noise_tolerance: 20, neighborhood_size: 3,
                     connectivity: Connectivity::Eight, tile_size: None,
                     light_background: false}
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Maximum {
    /// Centroid of the merged maxima pixels.
    pub x: f64,
    pub y: f64,
    pub value: u8,
    /// Number of merged pixels.
    pub area: u32,
}

fn check_neighborhood(size: u32) -> Result<()> {
    if size == 0 || size % 2 == 0 {
        return Err(QuantError::InvalidNeighborhood(size));
    }
    Ok(())
}

// Max over a (2*radius+1) square window, done as a horizontal then a
// vertical pass. Pixels outside the image are skipped, which is the same as
// padding with zero.
fn max_filter(image: &GrayImage, radius: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    let (w, h, r) = (width as usize, height as usize, radius as usize);
    let src = image.as_raw();
    let mut horizontal = vec![0_u8; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let lo = x.saturating_sub(r);
            let hi = (x + r).min(w - 1);
            horizontal[y * w + x] = row[lo..=hi].iter().copied().max().unwrap_or(0);
        }
    }
    let mut out = vec![0_u8; w * h];
    for y in 0..h {
        let lo = y.saturating_sub(r);
        let hi = (y + r).min(h - 1);
        for x in 0..w {
            let mut m = 0;
            for yy in lo..=hi {
                m = m.max(horizontal[yy * w + x]);
            }
            out[y * w + x] = m;
        }
    }
    GrayImage::from_raw(width, height, out).unwrap()
}

/// Marks (255) each pixel that equals the maximum of its `size` x `size`
/// neighborhood and exceeds `tolerance`.
pub fn maxima_mask(image: &GrayImage, tolerance: u8, size: u32) -> Result<GrayImage> {
    check_neighborhood(size)?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Ok(GrayImage::new(width, height));
    }
    let filtered = max_filter(image, size / 2);
    let mask: Vec<u8> = image.as_raw().iter().zip(filtered.as_raw())
        .map(|(&v, &m)| if v == m && v > tolerance { 255 } else { 0 })
        .collect();
    Ok(GrayImage::from_raw(width, height, mask).unwrap())
}

/// Merges touching maxima pixels of `mask` and summarizes each group using
/// the pixel values of `image`.
fn merge_maxima(mask: &GrayImage, image: &GrayImage, connectivity: Connectivity)
                -> Vec<Maximum> {
    struct Accumulator {
        sum_x: f64,
        sum_y: f64,
        value: u8,
        area: u32,
    }
    let labels = connected_components(mask, connectivity, Luma([0_u8]));
    let mut groups: Vec<Accumulator> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if groups.len() < label {
            groups.resize_with(label, || Accumulator{sum_x: 0.0, sum_y: 0.0, value: 0, area: 0});
        }
        let g = &mut groups[label - 1];
        g.sum_x += x as f64;
        g.sum_y += y as f64;
        g.value = g.value.max(image.get_pixel(x, y)[0]);
        g.area += 1;
    }
    groups.into_iter()
        .filter(|g| g.area > 0)
        .map(|g| Maximum{x: g.sum_x / g.area as f64, y: g.sum_y / g.area as f64,
                         value: g.value, area: g.area})
        .collect()
}

/// Finds the maxima of `channel` of `source`.
pub fn find_maxima(source: &dyn PixelSource, channel: Channel, params: &MaximaParams)
                   -> Result<Vec<Maximum>> {
    let index = source.channel_index(channel)?;
    if params.light_background {
        find_maxima_with(|rect| Ok(invert_gray(&source.read_channel_region(index, rect)?)),
                         source.dimensions(), params)
    } else {
        find_maxima_with(|rect| source.read_channel_region(index, rect),
                         source.dimensions(), params)
    }
}

pub fn count_maxima(source: &dyn PixelSource, channel: Channel, params: &MaximaParams)
                    -> Result<usize> {
    Ok(find_maxima(source, channel, params)?.len())
}

/// Finds maxima of an image of size `dims` (width, height) whose pixels are
/// supplied by `reader`, one rectangle at a time. Use this for channels that
/// are derived rather than stored.
pub fn find_maxima_with<F>(reader: F, dims: (u32, u32), params: &MaximaParams)
                           -> Result<Vec<Maximum>>
where F: Fn(&Rect) -> Result<GrayImage>
{
    check_neighborhood(params.neighborhood_size)?;
    let start = Instant::now();
    let (width, height) = dims;
    if width == 0 || height == 0 {
        return Ok(Vec::new());
    }
    let grid = TileGrid::for_image(width, height, params.tile_size)?;
    let halo = params.neighborhood_size / 2;
    let mut mask = GrayImage::new(width, height);
    let mut values = GrayImage::new(width, height);
    let mut tile_count = 0;
    for tile in grid.tiles() {
        // The halo gives every pixel of the tile its full neighborhood.
        let outer = grid.expand(&tile, halo);
        let pixels = reader(&outer)?;
        let tile_mask = maxima_mask(&pixels, params.noise_tolerance,
                                    params.neighborhood_size)?;
        let (off_x, off_y) = core_offset(&outer, &tile);
        for y in 0..tile.height() {
            for x in 0..tile.width() {
                let gx = tile.left() as u32 + x;
                let gy = tile.top() as u32 + y;
                mask.put_pixel(gx, gy, *tile_mask.get_pixel(off_x + x, off_y + y));
                values.put_pixel(gx, gy, *pixels.get_pixel(off_x + x, off_y + y));
            }
        }
        tile_count += 1;
    }
    let maxima = merge_maxima(&mask, &values, params.connectivity);
    info!("Found {} maxima over {} tiles in {:?}",
          maxima.len(), tile_count, start.elapsed());
    debug!("Maxima parameters {:?}", params);
    Ok(maxima)
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use approx::assert_abs_diff_eq;
    use imageproc::gray_image;
    use super::*;
    use crate::image_tiff::{ChannelImage, ChannelOrder};

    fn gray_source(image: &GrayImage) -> ChannelImage {
        ChannelImage::from_raw(image.width(), image.height(), 1,
                               image.as_raw().clone(), ChannelOrder::Rgb).unwrap()
    }

    #[test]
    fn test_invalid_neighborhood() {
        let image = GrayImage::new(4, 4);
        assert!(maxima_mask(&image, 0, 0).is_err());
        assert!(maxima_mask(&image, 0, 4).is_err());
        assert!(maxima_mask(&image, 0, 5).is_ok());
    }

    #[test]
    fn test_maxima_mask() {
        let image = gray_image!(
            0,  0,  0,  0,  0;
            0, 50,  0,  0,  0;
            0,  0,  0, 30,  0;
            0,  0,  0,  0, 10;
            0,  0,  0,  0,  0);
        let mask = maxima_mask(&image, 20, 3).unwrap();
        assert_eq!(mask, gray_image!(
            0,   0, 0,   0, 0;
            0, 255, 0,   0, 0;
            0,   0, 0, 255, 0;
            0,   0, 0,   0, 0;
            0,   0, 0,   0, 0));
    }

    #[test]
    fn test_border_pixels_can_be_maxima() {
        let image = gray_image!(
            90, 0, 0;
             0, 0, 0;
             0, 0, 70);
        let mask = maxima_mask(&image, 20, 3).unwrap();
        assert_eq!(mask.get_pixel(0, 0)[0], 255);
        assert_eq!(mask.get_pixel(2, 2)[0], 255);
        assert_eq!(mask.as_raw().iter().filter(|&&v| v > 0).count(), 2);
    }

    #[test]
    fn test_plateau_is_one_maximum() {
        let image = gray_image!(
            0,  0,  0,  0;
            0, 80, 80,  0;
            0, 80, 80,  0;
            0,  0,  0,  0);
        let source = gray_source(&image);
        let maxima = find_maxima(&source, Channel::Index(0), &MaximaParams::default()).unwrap();
        assert_eq!(maxima.len(), 1);
        assert_eq!(maxima[0].area, 4);
        assert_eq!(maxima[0].value, 80);
        assert_abs_diff_eq!(maxima[0].x, 1.5);
        assert_abs_diff_eq!(maxima[0].y, 1.5);
    }

    #[test]
    fn test_connectivity() {
        // Diagonal neighbors with size 1: every bright pixel is a maximum.
        let image = gray_image!(
            50,  0;
             0, 50);
        let source = gray_source(&image);
        let mut params = MaximaParams{neighborhood_size: 1, ..Default::default()};
        assert_eq!(count_maxima(&source, Channel::Index(0), &params).unwrap(), 1);
        params.connectivity = Connectivity::Four;
        assert_eq!(count_maxima(&source, Channel::Index(0), &params).unwrap(), 2);
    }

    #[test]
    fn test_noise_tolerance() {
        let image = gray_image!(
            0,  0,  0,  0,  0;
            0, 20,  0, 21,  0;
            0,  0,  0,  0,  0);
        let source = gray_source(&image);
        let maxima = find_maxima(&source, Channel::Index(0), &MaximaParams::default()).unwrap();
        assert_eq!(maxima, vec![Maximum{x: 3.0, y: 1.0, value: 21, area: 1}]);
    }

    fn speckled(width: u32, height: u32) -> GrayImage {
        let mut image = GrayImage::new(width, height);
        let mut state: u32 = 12345;
        for p in image.pixels_mut() {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            p[0] = ((state >> 16) % 256) as u8;
        }
        image
    }

    #[test]
    fn test_tiled_matches_untiled() {
        let image = speckled(53, 37);
        let source = gray_source(&image);
        let whole = find_maxima(&source, Channel::Index(0), &MaximaParams::default()).unwrap();
        assert!(!whole.is_empty());
        for tile_size in [1, 7, 16, 100] {
            let params = MaximaParams{tile_size: Some(tile_size), ..Default::default()};
            let tiled = find_maxima(&source, Channel::Index(0), &params).unwrap();
            assert_eq!(tiled, whole, "tile size {}", tile_size);
        }
        let params = MaximaParams{neighborhood_size: 5, tile_size: Some(8),
                                  ..Default::default()};
        let tiled = find_maxima(&source, Channel::Index(0), &params).unwrap();
        let params = MaximaParams{neighborhood_size: 5, ..Default::default()};
        assert_eq!(tiled, find_maxima(&source, Channel::Index(0), &params).unwrap());
    }

    #[test]
    fn test_find_maxima_with_derived_channel() {
        let image = gray_image!(
            0,   0, 0;
            0, 200, 0;
            0,   0, 0);
        // Inverted image: the dark center is no longer a maximum.
        let mut inverted = image.clone();
        image::imageops::invert(&mut inverted);
        let maxima = find_maxima_with(|rect| {
            Ok(image::imageops::crop_imm(&inverted, rect.left() as u32, rect.top() as u32,
                                         rect.width(), rect.height()).to_image())
        }, (3, 3), &MaximaParams::default()).unwrap();
        assert_eq!(maxima.len(), 1);
        assert_eq!(maxima[0].area, 8);
        assert_eq!(maxima[0].value, 255);
    }

    #[test]
    fn test_light_background() {
        let source = gray_source(&gray_image!(
            255, 255, 255, 255;
            255,  40, 255, 255;
            255, 255, 255, 255));
        let maxima = find_maxima(&source, Channel::Index(0), &MaximaParams::default()).unwrap();
        assert_eq!(maxima.len(), 1);
        assert_eq!(maxima[0].area, 11);

        let params = MaximaParams{light_background: true, ..Default::default()};
        let maxima = find_maxima(&source, Channel::Index(0), &params).unwrap();
        assert_eq!(maxima, vec![Maximum{x: 1.0, y: 1.0, value: 215, area: 1}]);
    }
}  // mod tests.
