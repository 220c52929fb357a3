// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Pseudo-color "redness" classification of brightfield stains. A pixel is
//! reddish when its main channel is bright and dominates the other two, with
//! corrections for orange-ish (green-leaning) and magenta-ish (blue-leaning)
//! hues.

use std::time::Instant;

use image::GrayImage;
use imageproc::rect::Rect;
use log::info;

use crate::error::Result;
use crate::image_tiff::{Channel, ChannelImage};
use crate::pixel_source::PixelSource;

#[derive(Copy, Clone, Debug)]
pub struct RednessParams {
    /// Main channel must exceed this.
    pub cutoff: f32,
    pub green_red_factor: f32,
    pub green_blue_factor: f32,
    pub blue_correction_factor: f32,
    pub red_blue_offset_ratio: f32,
    pub red_factor: f32,
    pub red_offset_factor: f32,
    pub mean_offset_ratio: f32,
}

impl Default for RednessParams {
    fn default() -> Self {
        RednessParams{
            cutoff: 85.0,
            green_red_factor: 1.0,
            green_blue_factor: 1.15,
            blue_correction_factor: 1.1,
            red_blue_offset_ratio: 0.15,
            red_factor: 1.3,
            red_offset_factor: 1.15,
            mean_offset_ratio: 0.15,
        }
    }
}

/// Which channels play the red, green and blue roles.
#[derive(Copy, Clone, Debug)]
pub struct RednessChannels {
    pub main: Channel,
    pub second: Channel,
    pub third: Channel,
}

impl Default for RednessChannels {
    fn default() -> Self {
        RednessChannels{main: Channel::Red, second: Channel::Green, third: Channel::Blue}
    }
}

pub fn is_reddish(r: u8, g: u8, b: u8, params: &RednessParams) -> bool {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let cutoff = params.cutoff;
    if r <= cutoff {
        return false;
    }
    // Bright, green-leaning pixels are orange or yellow, not red.
    let green_corrected = g > cutoff && b > cutoff &&
        r > g * params.green_red_factor && g > b * params.green_blue_factor;
    if green_corrected {
        return false;
    }
    let red_blue_max = r.max(b);
    let blue_corrected =
        r > g * params.blue_correction_factor && r > b * params.blue_correction_factor &&
        1.0 - r / red_blue_max <= params.red_blue_offset_ratio &&
        1.0 - b / red_blue_max <= params.red_blue_offset_ratio;
    let mean = (g + b) / 2.0;
    let red = (r > g * params.red_factor && r > b * params.red_factor) ||
        ((g - mean).abs() < mean * params.mean_offset_ratio &&
         (b - mean).abs() < mean * params.mean_offset_ratio &&
         r > g * params.red_offset_factor && r > b * params.red_offset_factor);
    red || blue_corrected
}

/// Builds the replacement main channel: reddish pixels keep their main-channel
/// value (inverted on a white background), all others become 0.
pub fn redness_channel(r: &GrayImage, g: &GrayImage, b: &GrayImage,
                       white_background: bool, params: &RednessParams) -> GrayImage {
    assert_eq!(r.dimensions(), g.dimensions());
    assert_eq!(r.dimensions(), b.dimensions());
    let out: Vec<u8> = r.as_raw().iter().zip(g.as_raw()).zip(b.as_raw())
        .map(|((&rv, &gv), &bv)| {
            if !is_reddish(rv, gv, bv, params) {
                0
            } else if white_background {
                255 - rv
            } else {
                rv
            }
        })
        .collect();
    GrayImage::from_raw(r.width(), r.height(), out).unwrap()
}

/// The redness channel of `region` of `source`, without modifying `source`.
pub fn redness_region(source: &dyn PixelSource, channels: &RednessChannels,
                      region: &Rect, white_background: bool, params: &RednessParams)
                      -> Result<GrayImage> {
    let r = source.read_channel_region(source.channel_index(channels.main)?, region)?;
    let g = source.read_channel_region(source.channel_index(channels.second)?, region)?;
    let b = source.read_channel_region(source.channel_index(channels.third)?, region)?;
    Ok(redness_channel(&r, &g, &b, white_background, params))
}

/// Replaces the main channel of `image` with its redness channel. Returns the
/// number of reddish pixels.
pub fn threshold_redness(image: &mut ChannelImage, channels: &RednessChannels,
                         white_background: bool, params: &RednessParams) -> Result<u64> {
    let start = Instant::now();
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Ok(0);
    }
    let whole = Rect::at(0, 0).of_size(width, height);
    let main = image.channel_index(channels.main)?;
    let r = image.read_channel_region(main, &whole)?;
    let g = image.channel(channels.second)?;
    let b = image.channel(channels.third)?;
    let count = r.as_raw().iter().zip(g.as_raw()).zip(b.as_raw())
        .filter(|((&rv, &gv), &bv)| is_reddish(rv, gv, bv, params))
        .count() as u64;
    let result = redness_channel(&r, &g, &b, white_background, params);
    image.set_channel(main, &result)?;
    info!("Redness: {} of {} pixels reddish in {:?}",
          count, width as u64 * height as u64, start.elapsed());
    Ok(count)
}

// mod tests.
