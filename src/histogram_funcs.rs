// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::str::FromStr;

use image::GrayImage;

use crate::error::QuantError;
use crate::stats_funcs::Moments;

#[derive(Debug)]
pub struct HistogramStats {
    pub mean: f64,
    pub median: usize,
    pub stddev: f64,
}

pub fn histogram_for_image(image: &GrayImage) -> [u64; 256] {
    let mut histogram = [0_u64; 256];
    for &v in image.as_raw() {
        histogram[v as usize] += 1;
    }
    histogram
}

pub fn stats_for_histogram(histogram: &[u64]) -> HistogramStats {
    let mut count: u64 = 0;
    let mut first_moment: u64 = 0;
    for h in 0..histogram.len() {
        let bin_count = histogram[h];
        count += bin_count;
        first_moment += bin_count * h as u64;
    }
    if count == 0 {
        return HistogramStats{mean: 0.0, median: 0, stddev: 0.0};
    }
    let mean = first_moment as f64 / count as f64;
    let mut second_moment: f64 = 0.0;
    let mut sub_count = 0;
    let mut median = 0;
    for h in 0..histogram.len() {
        let bin_count = histogram[h];
        second_moment += bin_count as f64 * (h as f64 - mean) * (h as f64 - mean);
        if sub_count < count / 2 {
            sub_count += bin_count;
            if sub_count >= count / 2 {
                median = h;
            }
        }
    }
    let stddev = (second_moment / count as f64).sqrt();
    HistogramStats{mean, median, stddev}
}

/// Return the histogram bin number N such that the total number of bin entries
/// at or below N exceeds `fraction` * the total number of bin entries over the
/// entire histogram.
pub fn get_level_for_fraction(histogram: &[u64], fraction: f64) -> usize {
    assert!(fraction >= 0.0);
    assert!(fraction <= 1.0);
    let count: u64 = histogram.iter().sum();
    let goal = (fraction * count as f64) as u64;
    let mut so_far = 0;
    for h in 0..histogram.len() {
        so_far += histogram[h];
        if so_far >= goal {
            return h;
        }
    }
    unreachable!()  // Should not get here.
}

/// Histogram-based global threshold selection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ThresholdMethod {
    /// Huang & Wang's fuzzy-entropy method, as in ImageJ's "Huang".
    #[default]
    Huang,
    /// Maximizes between-class variance.
    Otsu,
    /// ImageJ's "Default": iterative intermeans (modified IsoData).
    IsoData,
}

impl fmt::Display for ThresholdMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdMethod::Huang => write!(f, "huang"),
            ThresholdMethod::Otsu => write!(f, "otsu"),
            ThresholdMethod::IsoData => write!(f, "isodata"),
        }
    }
}

impl FromStr for ThresholdMethod {
    type Err = QuantError;

    fn from_str(s: &str) -> Result<ThresholdMethod, QuantError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "huang" => Ok(ThresholdMethod::Huang),
            "otsu" => Ok(ThresholdMethod::Otsu),
            "isodata" | "default" => Ok(ThresholdMethod::IsoData),
            _ => Err(QuantError::UnknownMethod(s.to_string())),
        }
    }
}

/// Returns the threshold level for `histogram`. Pixels with values above the
/// level form one class, pixels at or below it the other.
pub fn compute_threshold(histogram: &[u64; 256], method: ThresholdMethod) -> u8 {
    match method {
        ThresholdMethod::Huang => huang_threshold(histogram),
        ThresholdMethod::Otsu => otsu_threshold(histogram),
        ThresholdMethod::IsoData => isodata_threshold(histogram),
    }
}

/// True when at most one bin is populated, so that no level separates two
/// classes.
pub fn is_degenerate(histogram: &[u64; 256]) -> bool {
    histogram.iter().filter(|&&c| c > 0).count() <= 1
}

fn populated_range(histogram: &[u64; 256]) -> Option<(usize, usize)> {
    let first = histogram.iter().position(|&c| c > 0)?;
    let last = histogram.iter().rposition(|&c| c > 0)?;
    Some((first, last))
}

// Each pixel gets a fuzzy membership to the mean of its class; the threshold
// minimizes the Shannon entropy of those memberships.
fn huang_threshold(histogram: &[u64; 256]) -> u8 {
    let (first, last) = match populated_range(histogram) {
        Some(range) => range,
        None => return 0,
    };
    if first == last {
        return 0;
    }
    let data: Vec<f64> = histogram.iter().map(|&c| c as f64).collect();
    // Cumulative and weighted cumulative counts.
    let mut s = vec![0.0_f64; last + 1];
    let mut w = vec![0.0_f64; last + 1];
    s[first] = data[first];
    w[first] = first as f64 * data[first];
    for i in first + 1..=last {
        s[i] = s[i - 1] + data[i];
        w[i] = w[i - 1] + i as f64 * data[i];
    }
    // Entropy summand for each distance from the class mean.
    let c = (last - first) as f64;
    let mut smu = vec![0.0_f64; last + 1 - first];
    for (i, v) in smu.iter_mut().enumerate().skip(1) {
        let mu = 1.0 / (1.0 + i as f64 / c);
        *v = -mu * mu.ln() - (1.0 - mu) * (1.0 - mu).ln();
    }
    let mut best_threshold = first;
    let mut best_entropy = f64::MAX;
    for threshold in first..=last {
        let mut entropy = 0.0;
        let mu = (w[threshold] / s[threshold]).round() as usize;
        for i in first..=threshold {
            entropy += smu[i.abs_diff(mu)] * data[i];
        }
        if threshold < last {
            let mu = ((w[last] - w[threshold]) / (s[last] - s[threshold])).round() as usize;
            for i in threshold + 1..=last {
                entropy += smu[i.abs_diff(mu)] * data[i];
            }
        }
        if best_entropy > entropy {
            best_entropy = entropy;
            best_threshold = threshold;
        }
    }
    best_threshold as u8
}

fn otsu_threshold(histogram: &[u64; 256]) -> u8 {
    let (first, _last) = match populated_range(histogram) {
        Some(range) => range,
        None => return 0,
    };
    let total: f64 = histogram.iter().map(|&c| c as f64).sum();
    let sum_all: f64 = histogram.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();
    let mut weight_below = 0.0;
    let mut sum_below = 0.0;
    let mut best_variance = -1.0;
    let mut best_threshold = first;
    for t in first..256 {
        weight_below += histogram[t] as f64;
        let weight_above = total - weight_below;
        if weight_above == 0.0 {
            break;
        }
        sum_below += t as f64 * histogram[t] as f64;
        let mean_below = sum_below / weight_below;
        let mean_above = (sum_all - sum_below) / weight_above;
        let variance = weight_below * weight_above *
            (mean_below - mean_above) * (mean_below - mean_above);
        if variance > best_variance {
            best_variance = variance;
            best_threshold = t;
        }
    }
    best_threshold as u8
}

// The end bins are ignored, so saturated or masked-out pixels do not pull
// the means.
fn isodata_threshold(histogram: &[u64; 256]) -> u8 {
    let mut data = *histogram;
    let max_value = data.len() - 1;
    data[0] = 0;
    data[max_value] = 0;
    let mut min = 0;
    while data[min] == 0 && min < max_value {
        min += 1;
    }
    let mut max = max_value;
    while data[max] == 0 && max > 0 {
        max -= 1;
    }
    if min >= max {
        return (data.len() / 2) as u8;
    }
    let mut moving_index = min;
    let mut result;
    loop {
        let (mut sum1, mut sum2, mut sum3, mut sum4) = (0.0, 0.0, 0.0, 0.0);
        for i in min..=moving_index {
            sum1 += i as f64 * data[i] as f64;
            sum2 += data[i] as f64;
        }
        for i in moving_index + 1..=max {
            sum3 += i as f64 * data[i] as f64;
            sum4 += data[i] as f64;
        }
        result = (sum1 / sum2 + sum3 / sum4) / 2.0;
        moving_index += 1;
        if !((moving_index + 1) as f64 <= result && moving_index < max - 1) {
            break;
        }
    }
    result.round().clamp(0.0, 255.0) as u8
}

/// Two-dimensional histogram of paired 8-bit samples, with prefix sums of the
/// Pearson moments so that statistics over rectangular value ranges can be
/// had without revisiting pixels.
pub struct JointHistogram {
    // prefix[i * 257 + j] holds moments of all pairs with x < i and y < j.
    prefix: Vec<Moments>,
    max_x: u8,
    max_y: u8,
}

impl JointHistogram {
    pub fn new(xs: &[u8], ys: &[u8]) -> JointHistogram {
        assert_eq!(xs.len(), ys.len());
        let mut counts = vec![0_u64; 256 * 256];
        let mut max_x = 0;
        let mut max_y = 0;
        for (&x, &y) in xs.iter().zip(ys) {
            counts[x as usize * 256 + y as usize] += 1;
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        let mut prefix = vec![Moments::default(); 257 * 257];
        for i in 0..256 {
            let mut row = Moments::default();
            for j in 0..256 {
                let c = counts[i * 256 + j];
                if c > 0 {
                    row = row + Moments::of_pair(i as f64, j as f64, c as f64);
                }
                prefix[(i + 1) * 257 + j + 1] = prefix[i * 257 + j + 1] + row;
            }
        }
        JointHistogram{prefix, max_x, max_y}
    }

    pub fn max_x(&self) -> u8 {
        self.max_x
    }

    pub fn max_y(&self) -> u8 {
        self.max_y
    }

    fn prefix_at(&self, i: usize, j: usize) -> Moments {
        self.prefix[i * 257 + j]
    }

    pub fn total(&self) -> Moments {
        self.prefix_at(256, 256)
    }

    /// Moments of pairs with x < t1 and y < t2 (t1, t2 in 0..=256).
    pub fn below(&self, t1: usize, t2: usize) -> Moments {
        self.prefix_at(t1.min(256), t2.min(256))
    }

    /// Moments of pairs with x >= t1 and y >= t2.
    pub fn at_or_above(&self, t1: usize, t2: usize) -> Moments {
        let (t1, t2) = (t1.min(256), t2.min(256));
        self.total() - self.prefix_at(t1, 256) - self.prefix_at(256, t2) +
            self.prefix_at(t1, t2)
    }
}

// mod tests.
