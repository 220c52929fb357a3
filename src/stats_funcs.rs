// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::ops::{Add, Sub};

/// Sums needed for the Pearson correlation of paired samples (x, y).
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Moments {
    pub n: f64,
    pub sx: f64,
    pub sy: f64,
    pub sxx: f64,
    pub syy: f64,
    pub sxy: f64,
}

impl Moments {
    /// Moments of `count` copies of the pair (x, y).
    pub fn of_pair(x: f64, y: f64, count: f64) -> Moments {
        Moments{n: count, sx: count * x, sy: count * y,
                sxx: count * x * x, syy: count * y * y, sxy: count * x * y}
    }

    pub fn from_samples(xs: &[u8], ys: &[u8]) -> Moments {
        assert_eq!(xs.len(), ys.len());
        let mut m = Moments::default();
        for (&x, &y) in xs.iter().zip(ys) {
            m = m + Moments::of_pair(x as f64, y as f64, 1.0);
        }
        m
    }
}

impl Add for Moments {
    type Output = Moments;
    fn add(self, o: Moments) -> Moments {
        Moments{n: self.n + o.n, sx: self.sx + o.sx, sy: self.sy + o.sy,
                sxx: self.sxx + o.sxx, syy: self.syy + o.syy, sxy: self.sxy + o.sxy}
    }
}

impl Sub for Moments {
    type Output = Moments;
    fn sub(self, o: Moments) -> Moments {
        Moments{n: self.n - o.n, sx: self.sx - o.sx, sy: self.sy - o.sy,
                sxx: self.sxx - o.sxx, syy: self.syy - o.syy, sxy: self.sxy - o.sxy}
    }
}

/// Pearson correlation coefficient. None if there are fewer than two samples
/// or either variable is constant.
pub fn pearson(m: &Moments) -> Option<f64> {
    if m.n < 2.0 {
        return None;
    }
    let cov = m.sxy - m.sx * m.sy / m.n;
    let var_x = m.sxx - m.sx * m.sx / m.n;
    let var_y = m.syy - m.sy * m.sy / m.n;
    if var_x <= 1e-9 || var_y <= 1e-9 {
        return None;
    }
    Some((cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0))
}

/// Two-tailed p-value of correlation `r` over `n` samples, from Student's t
/// distribution with n-2 degrees of freedom.
pub fn pearson_p_value(r: f64, n: u64) -> f64 {
    if n <= 2 {
        return 1.0;
    }
    if r.abs() >= 1.0 {
        return 0.0;
    }
    let df = (n - 2) as f64;
    let t_squared = r * r * df / (1.0 - r * r);
    incomplete_beta(df / 2.0, 0.5, df / (df + t_squared))
}

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFICIENTS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection formula.
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut a = LANCZOS_COEFFICIENTS[0];
    let t = x + LANCZOS_G + 0.5;
    for (i, c) in LANCZOS_COEFFICIENTS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Regularized incomplete beta function I_x(a, b).
pub fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let front = (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) +
                 a * x.ln() + b * (1.0 - x).ln()).exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

// Modified Lentz evaluation of the continued fraction for I_x(a, b).
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITERATIONS: usize = 300;
    const EPSILON: f64 = 3.0e-16;
    const TINY: f64 = 1.0e-300;
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;
    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use approx::assert_abs_diff_eq;
    use super::*;

    #[test]
    fn test_ln_gamma() {
        assert_abs_diff_eq!(ln_gamma(1.0), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ln_gamma(5.0), 24.0_f64.ln(), epsilon = 1e-10);
        assert_abs_diff_eq!(ln_gamma(0.5), std::f64::consts::PI.sqrt().ln(), epsilon = 1e-10);
    }

    #[test]
    fn test_incomplete_beta() {
        // I_x(1, 1) is the identity.
        assert_abs_diff_eq!(incomplete_beta(1.0, 1.0, 0.3), 0.3, epsilon = 1e-12);
        // I_x(a, 1) = x^a.
        assert_abs_diff_eq!(incomplete_beta(3.0, 1.0, 0.5), 0.125, epsilon = 1e-12);
        assert_eq!(incomplete_beta(2.0, 2.0, 0.0), 0.0);
        assert_eq!(incomplete_beta(2.0, 2.0, 1.0), 1.0);
    }

    #[test]
    fn test_pearson() {
        let m = Moments::from_samples(&[1, 2, 3, 4], &[2, 4, 6, 8]);
        assert_abs_diff_eq!(pearson(&m).unwrap(), 1.0, epsilon = 1e-12);
        let m = Moments::from_samples(&[1, 2, 3, 4], &[8, 6, 4, 2]);
        assert_abs_diff_eq!(pearson(&m).unwrap(), -1.0, epsilon = 1e-12);
        let m = Moments::from_samples(&[1, 2, 3], &[5, 5, 5]);
        assert_eq!(pearson(&m), None);
        let m = Moments::from_samples(&[1], &[5]);
        assert_eq!(pearson(&m), None);
    }

    #[test]
    fn test_moments_arithmetic() {
        let a = Moments::of_pair(2.0, 3.0, 2.0);
        let b = Moments::of_pair(1.0, 1.0, 1.0);
        let sum = a + b;
        assert_eq!(sum.n, 3.0);
        assert_eq!(sum.sxy, 13.0);
        assert_eq!(sum - b, a);
    }

    #[test]
    fn test_pearson_p_value() {
        // t = 1.633 with 8 degrees of freedom.
        assert_abs_diff_eq!(pearson_p_value(0.5, 10), 0.1411, epsilon = 1e-3);
        assert_abs_diff_eq!(pearson_p_value(0.0, 10), 1.0, epsilon = 1e-12);
        assert_eq!(pearson_p_value(0.9, 2), 1.0);
        assert_eq!(pearson_p_value(1.0, 50), 0.0);
    }
}  // mod tests.
