//! rnascope_quant quantifies RNAscope-style microscopy slides. For each image
//! it counts stained dots as local maxima of a (pseudo-color classified)
//! channel and measures tissue area from a thresholded mask, scaled to
//! square microns by the TIFF resolution tags.
//!
//! Large uncompressed whole-slide TIFFs are memory mapped and can be
//! processed in tiles; see [pixel_source::open_pixel_source()] and
//! [decompress::decompress()]. Independent images are processed in
//! parallel by [batch::run_pool()].
//!
//! Also provided: Huang/Otsu/IsoData thresholds, mask morphology, particle
//! analysis, and Costes colocalization statistics.

pub mod batch;
pub mod classify;
pub mod colocalization;
pub mod decompress;
pub mod dot_counts;
pub mod error;
pub mod histogram_funcs;
pub mod image_funcs;
pub mod image_tiff;
#[cfg(unix)]
pub mod mapped_tiff;
pub mod maxima;
pub mod particles;
pub mod pixel_source;
pub mod results;
pub mod stats_funcs;
pub mod threshold;
pub mod tiling;
pub mod units;
