// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Per-image RNAscope quantification: dots counted as maxima of the
//! (optionally redness-classified) dot channel, tissue area from a
//! thresholded and cleaned-up mask of the area channel.

use std::path::Path;
use std::time::Instant;

use log::{info, warn};
use serde::Serialize;

use crate::classify::{redness_region, RednessChannels, RednessParams};
use crate::error::Result;
use crate::histogram_funcs::ThresholdMethod;
use crate::image_funcs::{close_mask, dilate_mask, fill_holes};
use crate::image_tiff::{Channel, ChannelOrder};
use crate::maxima::{find_maxima, find_maxima_with, MaximaParams};
use crate::particles::{analyze_particles, total_area, ParticleParams};
use crate::pixel_source::{open_pixel_source, PixelSource};
use crate::threshold::{threshold_channel, Foreground};
use crate::units::{convert_pixel_to_area, pixels_per_micron, PixelScale};

#[derive(Clone, Debug)]
pub struct CountParams {
    /// `main` is the dot channel; the other two are used for redness.
    pub dot_channels: RednessChannels,
    /// Replace the dot channel with its redness channel before finding maxima.
    pub redness: Option<RednessParams>,
    pub white_background: bool,
    pub maxima: MaximaParams,
    pub area_channel: Channel,
    pub threshold_method: ThresholdMethod,
    pub foreground: Foreground,
    pub threshold_tile_size: Option<u32>,
    pub dilate_iterations: u8,
    pub close_iterations: u8,
    pub fill_holes: bool,
    pub particles: ParticleParams,
    /// Overrides the resolution tags of the images.
    pub pixel_scale: Option<PixelScale>,
    pub collapse_resolution: bool,
    pub channel_order: ChannelOrder,
}

impl Default for CountParams {
    fn default() -> Self {
        CountParams{
            dot_channels: RednessChannels::default(),
            redness: Some(RednessParams::default()),
            white_background: true,
            maxima: MaximaParams::default(),
            area_channel: Channel::Blue,
            threshold_method: ThresholdMethod::Huang,
            foreground: Foreground::Below,
            threshold_tile_size: None,
            dilate_iterations: 2,
            close_iterations: 3,
            fill_holes: true,
            particles: ParticleParams::default(),
            pixel_scale: None,
            collapse_resolution: true,
            channel_order: ChannelOrder::Rgb,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DotCountRecord {
    #[serde(rename = "Image Name")]
    pub image_name: String,
    #[serde(rename = "Directory Path")]
    pub directory: String,
    #[serde(rename = "Dot Maxima")]
    pub dot_maxima: u64,
    #[serde(rename = "Tissue Area (um^2)")]
    pub tissue_area_um2: f64,
    #[serde(rename = "Total Image Area (um^2)")]
    pub total_area_um2: f64,
    #[serde(rename = "Dots per um^2")]
    pub dots_per_um2: f64,
    #[serde(rename = "Identified area to image size ratio (for QC)")]
    pub area_ratio: f64,
}

pub fn count_dots(path: &Path, params: &CountParams) -> Result<DotCountRecord> {
    let start = Instant::now();
    let scale = match params.pixel_scale {
        Some(scale) => scale,
        None => pixels_per_micron(path, params.collapse_resolution)?,
    };
    let source = open_pixel_source(path, params.channel_order)?;
    let record = count_dots_in(source.as_ref(), path, &scale, params)?;
    info!("{}: {} dots over {:.1} um^2 in {:?}",
          record.image_name, record.dot_maxima, record.tissue_area_um2, start.elapsed());
    Ok(record)
}

/// As [count_dots()], for an already opened image.
pub fn count_dots_in(source: &dyn PixelSource, path: &Path, scale: &PixelScale,
                     params: &CountParams) -> Result<DotCountRecord> {
    let dims = source.dimensions();
    let maxima = match &params.redness {
        Some(redness) => find_maxima_with(
            |rect| redness_region(source, &params.dot_channels, rect,
                                  params.white_background, redness),
            dims, &params.maxima)?,
        None => find_maxima(source, params.dot_channels.main, &params.maxima)?,
    };
    let dot_maxima = maxima.len() as u64;

    let threshold = threshold_channel(source, params.area_channel, params.threshold_method,
                                      params.foreground, params.threshold_tile_size)?;
    let mut mask = dilate_mask(&threshold.mask, params.dilate_iterations);
    mask = close_mask(&mask, params.close_iterations);
    if params.fill_holes {
        mask = fill_holes(&mask);
    }
    let particles = analyze_particles(&mask, &params.particles);
    let tissue_pixels = total_area(&particles);

    let tissue_area_um2 = convert_pixel_to_area(tissue_pixels, scale);
    let total_area_um2 = convert_pixel_to_area(dims.0 as u64 * dims.1 as u64, scale);
    let image_name = path.file_name().map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dots_per_um2 = if tissue_area_um2 > 0.0 {
        dot_maxima as f64 / tissue_area_um2
    } else {
        warn!("{}: no tissue found; reporting 0 dots per um^2", image_name);
        0.0
    };
    let area_ratio = if total_area_um2 > 0.0 { tissue_area_um2 / total_area_um2 } else { 0.0 };
    Ok(DotCountRecord{
        image_name,
        directory: path.parent().map(|p| p.display().to_string()).unwrap_or_default(),
        dot_maxima,
        tissue_area_um2,
        total_area_um2,
        dots_per_um2,
        area_ratio,
    })
}

// mod tests.
