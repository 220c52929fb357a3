// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Colocalization of two channels by Costes' method: automatic thresholds
//! from the regression line of the two channels, then Pearson and Manders
//! coefficients over the pixels above both thresholds.

use std::time::Instant;

use image::GrayImage;
use log::{debug, info};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{QuantError, Result};
use crate::histogram_funcs::JointHistogram;
use crate::stats_funcs::{pearson, pearson_p_value, Moments};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CostesThresholds {
    pub t1: u8,
    pub t2: u8,
    /// Regression of channel b on channel a.
    pub slope: f64,
    pub intercept: f64,
    /// Correlation of the pixels below both thresholds; None if undefined.
    pub r_below: Option<f64>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Colocalization {
    /// Pearson correlation over colocalized pixels; 0 if either channel is
    /// constant there.
    pub r: f64,
    pub p_value: f64,
    /// Fraction of channel a intensity that is colocalized.
    pub m1: f64,
    /// Fraction of channel b intensity that is colocalized.
    pub m2: f64,
    pub pixels: u64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Significance {
    pub observed_r: f64,
    pub mean_random_r: f64,
    pub stddev_random_r: f64,
    /// Fraction of randomized images whose correlation is below the observed
    /// one.
    pub certainty: f64,
}

fn check_dimensions(a: &GrayImage, b: &GrayImage) -> Result<()> {
    if a.dimensions() != b.dimensions() {
        return Err(QuantError::DimensionMismatch(a.dimensions(), b.dimensions()));
    }
    Ok(())
}

/// Least-squares fit of b = slope * a + intercept.
fn regression(m: &Moments) -> (f64, f64) {
    let var_a = m.sxx - m.sx * m.sx / m.n;
    let mean_a = m.sx / m.n;
    let mean_b = m.sy / m.n;
    if var_a <= 1e-9 {
        return (0.0, mean_b);
    }
    let slope = (m.sxy - m.sx * m.sy / m.n) / var_a;
    (slope, mean_b - slope * mean_a)
}

/// Finds Costes' thresholds: walking t1 down from the brightest value of
/// `a`, with t2 on the regression line, stop at the first pair for which
/// the pixels below both thresholds no longer correlate positively.
pub fn costes_thresholds(a: &GrayImage, b: &GrayImage) -> Result<CostesThresholds> {
    check_dimensions(a, b)?;
    let start = Instant::now();
    let joint = JointHistogram::new(a.as_raw(), b.as_raw());
    let total = joint.total();
    if total.n < 2.0 {
        return Err(QuantError::InsufficientPixels{needed: 2, found: total.n as u64});
    }
    let (slope, intercept) = regression(&total);
    let mut t1 = joint.max_x() as usize;
    let mut result;
    loop {
        let t2 = (slope * t1 as f64 + intercept).round().clamp(0.0, 255.0) as usize;
        let r_below = pearson(&joint.below(t1, t2));
        result = CostesThresholds{t1: t1 as u8, t2: t2 as u8, slope, intercept, r_below};
        match r_below {
            Some(r) if r > 0.0 && t1 > 0 => t1 -= 1,
            _ => break,
        }
    }
    debug!("Costes thresholds {:?} in {:?}", result, start.elapsed());
    Ok(result)
}

/// Statistics over pixels with `a >= t1` and `b >= t2`.
pub fn colocalization(a: &GrayImage, b: &GrayImage, t1: u8, t2: u8) -> Result<Colocalization> {
    check_dimensions(a, b)?;
    let joint = JointHistogram::new(a.as_raw(), b.as_raw());
    let coloc = joint.at_or_above(t1 as usize, t2 as usize);
    let pixels = coloc.n as u64;
    if pixels < 2 {
        return Err(QuantError::InsufficientPixels{needed: 2, found: pixels});
    }
    let total = joint.total();
    let (r, p_value) = match pearson(&coloc) {
        Some(r) => (r, pearson_p_value(r, pixels)),
        None => (0.0, 1.0),
    };
    let m1 = if total.sx > 0.0 { coloc.sx / total.sx } else { 0.0 };
    let m2 = if total.sy > 0.0 { coloc.sy / total.sy } else { 0.0 };
    info!("Colocalization over {} pixels: r={:.4} p={:.3e} M1={:.4} M2={:.4}",
          pixels, r, p_value, m1, m2);
    Ok(Colocalization{r, p_value, m1, m2, pixels})
}

// Rearranges the whole `block_size` squares of `image` in the given order.
// Pixels in partial blocks at the right and bottom edges stay put.
fn scramble_blocks(image: &GrayImage, block_size: u32, order: &[usize]) -> GrayImage {
    let cols = image.width() / block_size;
    let mut out = image.clone();
    for (dest, &src) in order.iter().enumerate() {
        let (dx, dy) = ((dest as u32 % cols) * block_size, (dest as u32 / cols) * block_size);
        let (sx, sy) = ((src as u32 % cols) * block_size, (src as u32 / cols) * block_size);
        for y in 0..block_size {
            for x in 0..block_size {
                out.put_pixel(dx + x, dy + y, *image.get_pixel(sx + x, sy + y));
            }
        }
    }
    out
}

/// Costes' randomization test: compares the correlation of `a` and `b` with
/// the correlations obtained after shuffling `block_size` blocks of `a`
/// `iterations` times. Deterministic for a given `seed`.
pub fn costes_significance(a: &GrayImage, b: &GrayImage, block_size: u32,
                           iterations: usize, seed: u64) -> Result<Significance> {
    check_dimensions(a, b)?;
    if block_size == 0 {
        return Err(QuantError::InvalidTileSize(block_size, block_size));
    }
    let start = Instant::now();
    let observed_r = pearson(&Moments::from_samples(a.as_raw(), b.as_raw())).unwrap_or(0.0);
    let cols = a.width() / block_size;
    let rows = a.height() / block_size;
    let mut order: Vec<usize> = (0..(cols * rows) as usize).collect();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut random_rs = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        order.shuffle(&mut rng);
        let scrambled = scramble_blocks(a, block_size, &order);
        random_rs.push(pearson(&Moments::from_samples(scrambled.as_raw(), b.as_raw()))
                       .unwrap_or(0.0));
    }
    let n = random_rs.len().max(1) as f64;
    let mean_random_r = random_rs.iter().sum::<f64>() / n;
    let stddev_random_r = (random_rs.iter()
                           .map(|r| (r - mean_random_r) * (r - mean_random_r))
                           .sum::<f64>() / n).sqrt();
    let below = random_rs.iter().filter(|&&r| r < observed_r).count();
    let certainty = below as f64 / n;
    info!("Costes randomization: {} iterations of {} blocks in {:?}; certainty {:.3}",
          iterations, order.len(), start.elapsed(), certainty);
    Ok(Significance{observed_r, mean_random_r, stddev_random_r, certainty})
}

// mod tests.
