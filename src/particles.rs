// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::HashMap;
use std::f64::consts::{PI, SQRT_2};

use image::{GrayImage, Luma};
use imageproc::rect::Rect;
use imageproc::region_labelling::{connected_components, Connectivity};
use log::debug;

/// Size and shape limits for [analyze_particles()]; bounds are inclusive.
#[derive(Copy, Clone, Debug)]
pub struct ParticleParams {
    pub min_area: u32,
    pub max_area: u32,
    pub min_circularity: f64,
    pub max_circularity: f64,
    pub connectivity: Connectivity,
}

impl Default for ParticleParams {
    fn default() -> Self {
        ParticleParams{min_area: 0, max_area: u32::MAX,
                       min_circularity: 0.0, max_circularity: 1.0,
                       connectivity: Connectivity::Eight}
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    pub label: u32,
    /// Pixel count.
    pub area: u32,
    pub bounding_box: Rect,
    pub centroid_x: f64,
    pub centroid_y: f64,
    /// Length of the traced outer boundary with ImageJ's corner correction.
    /// Holes do not contribute.
    pub perimeter: f64,
    /// 4πA/P², capped at 1.
    pub circularity: f64,
}

const EAST: u8 = 0;
const SOUTH: u8 = 1;
const WEST: u8 = 2;
const NORTH: u8 = 3;
const STEPS: [(i64, i64); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

struct Accumulator {
    area: u32,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    sum_x: f64,
    sum_y: f64,
    // Top-left corner of the first pixel in raster order; its top edge is on
    // the outer boundary.
    start: (i64, i64),
    outgoing: HashMap<(i64, i64), u8>,
}

/// Labels the foreground (non-zero) components of `mask` and returns those
/// passing `params`, ordered by label.
pub fn analyze_particles(mask: &GrayImage, params: &ParticleParams) -> Vec<Particle> {
    let (width, height) = mask.dimensions();
    let labels = connected_components(mask, params.connectivity, Luma([0_u8]));
    let mut groups: Vec<Option<Accumulator>> = Vec::new();
    let label_at = |x: i64, y: i64| -> u32 {
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            0
        } else {
            labels.get_pixel(x as u32, y as u32)[0]
        }
    };
    for (x, y, l) in labels.enumerate_pixels() {
        let label = l[0];
        if label == 0 {
            continue;
        }
        let index = label as usize - 1;
        if groups.len() <= index {
            groups.resize_with(index + 1, || None);
        }
        let g = groups[index].get_or_insert(Accumulator{
            area: 0, min_x: x, min_y: y, max_x: x, max_y: y,
            sum_x: 0.0, sum_y: 0.0, start: (x as i64, y as i64),
            outgoing: HashMap::new()});
        g.area += 1;
        g.min_x = g.min_x.min(x);
        g.min_y = g.min_y.min(y);
        g.max_x = g.max_x.max(x);
        g.max_y = g.max_y.max(y);
        g.sum_x += x as f64;
        g.sum_y += y as f64;
        let (x, y) = (x as i64, y as i64);
        for (dir, (nx, ny), corner) in [(EAST, (x, y - 1), (x, y)),
                                        (SOUTH, (x + 1, y), (x + 1, y)),
                                        (WEST, (x, y + 1), (x + 1, y + 1)),
                                        (NORTH, (x - 1, y), (x, y + 1))] {
            if label_at(nx, ny) != label {
                *g.outgoing.entry(corner).or_insert(0) |= 1 << dir;
            }
        }
    }
    let particles: Vec<Particle> = groups.into_iter().enumerate()
        .filter_map(|(i, g)| g.map(|g| (i as u32 + 1, g)))
        .map(|(label, g)| {
            let bounding_box = Rect::at(g.min_x as i32, g.min_y as i32)
                .of_size(g.max_x - g.min_x + 1, g.max_y - g.min_y + 1);
            let perimeter = traced_perimeter(&g.outgoing, g.start, params.connectivity);
            let circularity = (4.0 * PI * g.area as f64 / (perimeter * perimeter)).min(1.0);
            Particle{
                label,
                area: g.area,
                bounding_box,
                centroid_x: g.sum_x / g.area as f64,
                centroid_y: g.sum_y / g.area as f64,
                perimeter,
                circularity,
            }
        })
        .filter(|p| p.area >= params.min_area && p.area <= params.max_area &&
                p.circularity >= params.min_circularity &&
                p.circularity <= params.max_circularity)
        .collect();
    debug!("{} particles pass size/shape limits", particles.len());
    particles
}

// Returns the length of a particle's outer boundary, given the boundary
// steps leaving each pixel corner (one bit per direction, particle on the
// right of every step) and the top-left corner of its first pixel in raster
// order. Measured as ImageJ measures traced outlines: the step count, less
// 2-√2 for each counted corner. Of consecutive corners joined by unit-length
// sides only every other one counts, so staircases approximate their
// diagonal.
fn traced_perimeter(outgoing: &HashMap<(i64, i64), u8>, start: (i64, i64),
                    connectivity: Connectivity) -> f64 {
    // Where two pixels touch only at a corner, eight-connected particles turn
    // left (around both), four-connected ones right.
    let turns: [u8; 3] = match connectivity {
        Connectivity::Eight => [3, 0, 1],
        Connectivity::Four => [1, 0, 3],
    };
    let mut sides: Vec<u32> = Vec::new();
    let mut run = 0;
    let mut steps = 0_u64;
    let (mut x, mut y) = start;
    let mut dir = EAST;
    loop {
        x += STEPS[dir as usize].0;
        y += STEPS[dir as usize].1;
        steps += 1;
        run += 1;
        if (x, y) == start {
            sides.push(run);
            break;
        }
        let bits = outgoing.get(&(x, y)).copied().unwrap_or(0);
        let next = match turns.iter().map(|t| (dir + t) % 4).find(|&d| bits & (1_u8 << d) != 0) {
            Some(d) => d,
            None => {
                sides.push(run);
                break;
            }
        };
        if next != dir {
            sides.push(run);
            run = 0;
        }
        dir = next;
    }

    let mut corners = 0;
    let mut counted = false;
    let mut arriving = sides[sides.len() - 1];
    for &side in &sides {
        if arriving > 1 || !counted {
            counted = true;
            corners += 1;
        } else {
            counted = false;
        }
        arriving = side;
    }
    steps as f64 - corners as f64 * (2.0 - SQRT_2)
}

pub fn total_area(particles: &[Particle]) -> u64 {
    particles.iter().map(|p| p.area as u64).sum()
}

// mod tests.
