// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Physical pixel size from TIFF resolution tags.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::debug;
use tiff::decoder::{ifd::Value, Decoder};
use tiff::tags::Tag;

use crate::error::{QuantError, Result};

/// Value of the ResolutionUnit tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResolutionUnit {
    None,
    Inch,
    Centimeter,
    Other(u16),
}

impl ResolutionUnit {
    pub fn from_tag(code: u16) -> ResolutionUnit {
        match code {
            1 => ResolutionUnit::None,
            2 => ResolutionUnit::Inch,
            3 => ResolutionUnit::Centimeter,
            other => ResolutionUnit::Other(other),
        }
    }

    /// Unrecognized units are taken to be meters.
    pub fn microns_per_unit(self) -> f64 {
        match self {
            ResolutionUnit::Inch => 25_400.0,
            ResolutionUnit::Centimeter => 10_000.0,
            _ => 1_000_000.0,
        }
    }
}

/// Raw resolution tags: pixels per unit as (numerator, denominator).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub x: (u32, u32),
    pub y: (u32, u32),
    pub unit: ResolutionUnit,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PixelScale {
    pub x_ppm: f64,
    pub y_ppm: f64,
}

impl PixelScale {
    pub fn uniform(ppm: f64) -> PixelScale {
        PixelScale{x_ppm: ppm, y_ppm: ppm}
    }
}

impl Resolution {
    /// Pixels per micron along each axis.
    pub fn scale(&self) -> PixelScale {
        let mpu = self.unit.microns_per_unit();
        PixelScale{x_ppm: ratio(self.x) / mpu, y_ppm: ratio(self.y) / mpu}
    }

    /// One pixels-per-micron value for both axes, from the pooled rationals.
    pub fn collapsed(&self) -> PixelScale {
        let mpu = self.unit.microns_per_unit();
        let n = self.x.0 as f64 + self.y.0 as f64;
        let d = self.x.1 as f64 + self.y.1 as f64;
        PixelScale::uniform(n / d / mpu)
    }
}

fn ratio((n, d): (u32, u32)) -> f64 {
    n as f64 / d as f64
}

fn rational(value: Value) -> Option<(u32, u32)> {
    match value {
        Value::Rational(n, d) => Some((n, d)),
        Value::RationalBig(n, d) => Some((u32::try_from(n).ok()?, u32::try_from(d).ok()?)),
        Value::List(mut items) if items.len() == 1 => rational(items.remove(0)),
        _ => None,
    }
}

pub(crate) fn resolution_from_decoder<R>(decoder: &mut Decoder<R>, path: &Path)
                                         -> Result<Resolution>
where R: std::io::Read + std::io::Seek
{
    let x = decoder.find_tag(Tag::XResolution)?.and_then(rational);
    let y = decoder.find_tag(Tag::YResolution)?.and_then(rational);
    let unit = decoder.find_tag(Tag::ResolutionUnit)?
        .map(|v| v.into_u16()).transpose()?
        .map(ResolutionUnit::from_tag)
        .unwrap_or(ResolutionUnit::Inch);
    match (x, y) {
        (Some(x), Some(y)) if x.1 != 0 && y.1 != 0 => Ok(Resolution{x, y, unit}),
        _ => Err(QuantError::MissingResolution(path.to_path_buf())),
    }
}

pub fn read_resolution(path: &Path) -> Result<Resolution> {
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    let resolution = resolution_from_decoder(&mut decoder, path)?;
    debug!("{:?} resolution {:?}", path, resolution);
    Ok(resolution)
}

pub fn pixels_per_micron(path: &Path, collapse: bool) -> Result<PixelScale> {
    let resolution = read_resolution(path)?;
    Ok(if collapse { resolution.collapsed() } else { resolution.scale() })
}

/// (height, width) of the image in microns.
pub fn image_size_microns(path: &Path, collapse: bool) -> Result<(f64, f64)> {
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    let (width, height) = decoder.dimensions()?;
    let resolution = resolution_from_decoder(&mut decoder, path)?;
    let scale = if collapse { resolution.collapsed() } else { resolution.scale() };
    Ok((height as f64 / scale.y_ppm, width as f64 / scale.x_ppm))
}

/// Square microns covered by `pixels` pixels.
pub fn convert_pixel_to_area(pixels: u64, scale: &PixelScale) -> f64 {
    pixels as f64 / (scale.x_ppm * scale.y_ppm)
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use approx::assert_abs_diff_eq;
    use super::*;
    use std::io::BufWriter;
    use tiff::encoder::{colortype, Rational, TiffEncoder};

    fn write_with_resolution(path: &Path, width: u32, height: u32,
                             unit: tiff::tags::ResolutionUnit,
                             x: Rational, y: Rational) {
        let mut writer = BufWriter::new(File::create(path).unwrap());
        let mut encoder = TiffEncoder::new(&mut writer).unwrap();
        let mut image = encoder.new_image::<colortype::Gray8>(width, height).unwrap();
        image.resolution_unit(unit);
        image.x_resolution(x);
        image.y_resolution(y);
        image.write_data(&vec![0_u8; (width * height) as usize]).unwrap();
    }

    // Little-endian baseline TIFF of one gray pixel with no resolution tags.
    fn write_bare_tiff(path: &Path) {
        let mut bytes = vec![b'I', b'I', 42, 0, 8, 0, 0, 0];
        let entries: [(u16, u16, u32); 8] = [
            (256, 3, 1), (257, 3, 1), (258, 3, 8), (259, 3, 1),
            (262, 3, 1), (273, 4, 110), (278, 3, 1), (279, 4, 1)];
        bytes.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (tag, kind, value) in entries {
            bytes.extend_from_slice(&tag.to_le_bytes());
            bytes.extend_from_slice(&kind.to_le_bytes());
            bytes.extend_from_slice(&1_u32.to_le_bytes());
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&0_u32.to_le_bytes());
        assert_eq!(bytes.len(), 110);
        bytes.push(77);
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_microns_per_unit() {
        assert_eq!(ResolutionUnit::from_tag(2).microns_per_unit(), 25_400.0);
        assert_eq!(ResolutionUnit::from_tag(3).microns_per_unit(), 10_000.0);
        assert_eq!(ResolutionUnit::from_tag(1).microns_per_unit(), 1_000_000.0);
        assert_eq!(ResolutionUnit::from_tag(9), ResolutionUnit::Other(9));
    }

    #[test]
    fn test_scale_and_collapsed() {
        let resolution = Resolution{x: (40_000, 1), y: (20_000, 1),
                                    unit: ResolutionUnit::Centimeter};
        assert_eq!(resolution.scale(), PixelScale{x_ppm: 4.0, y_ppm: 2.0});
        assert_eq!(resolution.collapsed(), PixelScale::uniform(3.0));
        let resolution = Resolution{x: (3, 1), y: (1, 3), unit: ResolutionUnit::Other(7)};
        // Pooled rationals, not the mean of the ratios.
        assert_abs_diff_eq!(resolution.collapsed().x_ppm, 1e-6, epsilon = 1e-15);
    }

    #[test]
    fn test_pixels_per_micron_axes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaled.tif");
        write_with_resolution(&path, 8, 4, tiff::tags::ResolutionUnit::Centimeter,
                              Rational{n: 40_000, d: 1}, Rational{n: 20_000, d: 1});
        let scale = pixels_per_micron(&path, false).unwrap();
        assert_abs_diff_eq!(scale.x_ppm, 4.0);
        assert_abs_diff_eq!(scale.y_ppm, 2.0);
        let (h, w) = image_size_microns(&path, false).unwrap();
        assert_abs_diff_eq!(h, 2.0);
        assert_abs_diff_eq!(w, 2.0);
        let (h, w) = image_size_microns(&path, true).unwrap();
        assert_abs_diff_eq!(h, 4.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w, 8.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inch_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inch.tif");
        write_with_resolution(&path, 2, 2, tiff::tags::ResolutionUnit::Inch,
                              Rational{n: 254_000, d: 10}, Rational{n: 254_000, d: 10});
        let scale = pixels_per_micron(&path, true).unwrap();
        assert_abs_diff_eq!(scale.x_ppm, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(convert_pixel_to_area(50, &scale), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.tif");
        write_bare_tiff(&path);
        assert!(matches!(pixels_per_micron(&path, true),
                         Err(QuantError::MissingResolution(_))));
    }

    #[test]
    fn test_convert_pixel_to_area() {
        let scale = PixelScale{x_ppm: 2.0, y_ppm: 4.0};
        assert_eq!(convert_pixel_to_area(80, &scale), 10.0);
    }
}  // mod tests.
