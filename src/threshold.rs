// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use image::GrayImage;
use imageproc::rect::Rect;
use log::debug;

use crate::error::{QuantError, Result};
use crate::histogram_funcs::{compute_threshold, histogram_for_image, is_degenerate,
                             stats_for_histogram, ThresholdMethod};
use crate::image_tiff::Channel;
use crate::pixel_source::PixelSource;
use crate::tiling::TileGrid;

/// Which side of the level counts as foreground.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Foreground {
    /// Bright objects on a dark background: `v > level`.
    Above,
    /// Dark objects on a white background: `v <= level`.
    Below,
}

impl Foreground {
    pub fn is_foreground(self, value: u8, level: u8) -> bool {
        match self {
            Foreground::Above => value > level,
            Foreground::Below => value <= level,
        }
    }
}

impl fmt::Display for Foreground {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Foreground::Above => write!(f, "above"),
            Foreground::Below => write!(f, "below"),
        }
    }
}

impl FromStr for Foreground {
    type Err = QuantError;

    fn from_str(s: &str) -> Result<Foreground> {
        match s.trim().to_ascii_lowercase().as_str() {
            "above" | "bright" => Ok(Foreground::Above),
            "below" | "dark" => Ok(Foreground::Below),
            _ => Err(QuantError::UnknownMethod(s.to_string())),
        }
    }
}

pub struct ThresholdResult {
    /// 255 for foreground, 0 elsewhere.
    pub mask: GrayImage,
    /// The level used for each tile (a single whole-image entry when not
    /// tiled).
    pub levels: Vec<(Rect, u8)>,
}

impl ThresholdResult {
    pub fn foreground_count(&self) -> u64 {
        self.mask.as_raw().iter().filter(|&&v| v > 0).count() as u64
    }
}

/// Thresholds `channel` of `source`. With `tile_size`, every tile is given
/// its own level.
pub fn threshold_channel(source: &dyn PixelSource, channel: Channel,
                         method: ThresholdMethod, foreground: Foreground,
                         tile_size: Option<u32>) -> Result<ThresholdResult> {
    let index = source.channel_index(channel)?;
    threshold_with(|rect| source.read_channel_region(index, rect),
                   source.dimensions(), method, foreground, tile_size)
}

/// As [threshold_channel()], with pixels supplied by `reader` for each tile
/// rectangle of a `dims` (width, height) image.
///
/// A tile whose histogram has a single populated bin (blank background, say)
/// has no level of its own and takes the level of the whole image instead.
/// With more than one tile every tile is read twice: once for the histograms,
/// once for the mask.
pub fn threshold_with<F>(reader: F, dims: (u32, u32), method: ThresholdMethod,
                         foreground: Foreground, tile_size: Option<u32>)
                         -> Result<ThresholdResult>
where F: Fn(&Rect) -> Result<GrayImage>
{
    let start = Instant::now();
    let (width, height) = dims;
    let grid = TileGrid::for_image(width, height, tile_size)?;
    let mut mask = GrayImage::new(width, height);
    let mut levels = Vec::new();
    if width == 0 || height == 0 {
        return Ok(ThresholdResult{mask, levels});
    }
    let tiles: Vec<Rect> = grid.tiles().collect();
    let mut cached = None;
    let mut histograms = Vec::with_capacity(tiles.len());
    let mut global = [0_u64; 256];
    for tile in &tiles {
        let pixels = reader(tile)?;
        let histogram = histogram_for_image(&pixels);
        for (g, h) in global.iter_mut().zip(&histogram) {
            *g += h;
        }
        histograms.push(histogram);
        if tiles.len() == 1 {
            cached = Some(pixels);
        }
    }
    let global_level = compute_threshold(&global, method);
    for (tile, histogram) in tiles.iter().zip(&histograms) {
        let level = if tiles.len() > 1 && is_degenerate(histogram) {
            global_level
        } else {
            compute_threshold(histogram, method)
        };
        debug!("Tile {:?}: {:?}, level {}", tile, stats_for_histogram(histogram), level);
        let pixels = match cached.take() {
            Some(pixels) => pixels,
            None => reader(tile)?,
        };
        for (x, y, p) in pixels.enumerate_pixels() {
            if foreground.is_foreground(p[0], level) {
                mask.put_pixel(tile.left() as u32 + x, tile.top() as u32 + y,
                               image::Luma([255]));
            }
        }
        levels.push((*tile, level));
    }
    debug!("{} threshold ({}) over {} tiles in {:?}; whole-image level {}",
           method, foreground, levels.len(), start.elapsed(), global_level);
    Ok(ThresholdResult{mask, levels})
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::gray_image;
    use crate::image_tiff::{ChannelImage, ChannelOrder};

    fn gray_source(image: &GrayImage) -> ChannelImage {
        ChannelImage::from_raw(image.width(), image.height(), 1,
                               image.as_raw().clone(), ChannelOrder::Rgb).unwrap()
    }

    #[test]
    fn test_foreground_sides() {
        assert!(Foreground::Above.is_foreground(11, 10));
        assert!(!Foreground::Above.is_foreground(10, 10));
        assert!(Foreground::Below.is_foreground(10, 10));
        assert!(!Foreground::Below.is_foreground(11, 10));
    }

    #[test]
    fn test_global_threshold() {
        let image = gray_image!(
            10, 10, 200, 200;
            10, 10, 200, 200);
        let source = gray_source(&image);
        let result = threshold_channel(&source, Channel::Index(0), ThresholdMethod::Otsu,
                                       Foreground::Above, None).unwrap();
        assert_eq!(result.levels, vec![(Rect::at(0, 0).of_size(4, 2), 10)]);
        assert_eq!(result.mask, gray_image!(
            0, 0, 255, 255;
            0, 0, 255, 255));
        assert_eq!(result.foreground_count(), 4);

        let result = threshold_channel(&source, Channel::Index(0), ThresholdMethod::Otsu,
                                       Foreground::Below, None).unwrap();
        assert_eq!(result.mask, gray_image!(
            255, 255, 0, 0;
            255, 255, 0, 0));
    }

    #[test]
    fn test_tiled_threshold_is_local() {
        // Left tile separates 10 from 50; right tile separates 100 from 200.
        let image = gray_image!(
            10, 50, 100, 200;
            50, 10, 200, 100);
        let source = gray_source(&image);
        let result = threshold_channel(&source, Channel::Index(0), ThresholdMethod::Otsu,
                                       Foreground::Above, Some(2)).unwrap();
        assert_eq!(result.levels.len(), 2);
        assert_eq!(result.levels[0], (Rect::at(0, 0).of_size(2, 2), 10));
        assert_eq!(result.levels[1], (Rect::at(2, 0).of_size(2, 2), 100));
        assert_eq!(result.mask, gray_image!(
            0, 255, 0, 255;
            255, 0, 255, 0));
    }

    #[test]
    fn test_blank_image_has_no_dark_foreground() {
        let mut white = GrayImage::new(8, 8);
        white.fill(255);
        let result = threshold_channel(&gray_source(&white), Channel::Index(0),
                                       ThresholdMethod::Huang, Foreground::Below,
                                       None).unwrap();
        assert_eq!(result.levels[0].1, 0);
        assert_eq!(result.foreground_count(), 0);
    }

    #[test]
    fn test_blank_tile_takes_whole_image_level() {
        // Tissue (dark) only in the left tile; the right tile is all white.
        let image = gray_image!(
            40, 200, 255, 255;
            40,  40, 255, 255);
        let source = gray_source(&image);
        for method in [ThresholdMethod::Huang, ThresholdMethod::Otsu] {
            let whole = threshold_channel(&source, Channel::Index(0), method,
                                          Foreground::Below, None).unwrap();
            let tiled = threshold_channel(&source, Channel::Index(0), method,
                                          Foreground::Below, Some(2)).unwrap();
            assert_eq!(tiled.levels.len(), 2);
            assert_eq!(tiled.levels[1].1, whole.levels[0].1);
            assert_eq!(tiled.mask, gray_image!(
                255,   0, 0, 0;
                255, 255, 0, 0));
        }
    }

    #[test]
    fn test_named_channel_needs_color() {
        let source = gray_source(&GrayImage::new(2, 2));
        assert!(threshold_channel(&source, Channel::Blue, ThresholdMethod::Huang,
                                  Foreground::Below, None).is_err());
    }
}  // mod tests.
