// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Rewrites compressed TIFFs uncompressed, so they can be memory-mapped.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{info, warn};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{self, ColorType as EncoderColor};
use tiff::encoder::{Rational, TiffEncoder, TiffKind, TiffValue};
use tiff::ColorType;

use crate::error::{QuantError, Result};
use crate::units::{resolution_from_decoder, Resolution, ResolutionUnit};

/// `<output_dir>/<stem>_UNCOMPRESSED.tif`.
pub fn uncompressed_path(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{}_UNCOMPRESSED.tif", stem))
}

/// Writes an uncompressed copy of the TIFF `input` into `output_dir` and
/// returns its path. An existing copy is kept as is.
pub fn decompress(input: &Path, output_dir: &Path) -> Result<PathBuf> {
    let output = uncompressed_path(input, output_dir);
    if output.exists() {
        info!("{:?} already exists", output);
        return Ok(output);
    }
    let start = Instant::now();
    let mut decoder = Decoder::new(BufReader::new(File::open(input)?))?
        .with_limits(tiff::decoder::Limits::unlimited());
    let (width, height) = decoder.dimensions()?;
    let color = decoder.colortype()?;
    let resolution = match resolution_from_decoder(&mut decoder, input) {
        Ok(resolution) => Some(resolution),
        Err(QuantError::MissingResolution(_)) => None,
        Err(e) => return Err(e),
    };
    let pixels = decoder.read_image()?;
    let payload = match &pixels {
        DecodingResult::U8(buf) => buf.len() as u64,
        DecodingResult::U16(buf) => 2 * buf.len() as u64,
        _ => 0,
    };
    info!("Decoded {:?} ({}x{} {:?}) in {:?}", input, width, height, color, start.elapsed());

    fs::create_dir_all(output_dir)?;
    // Written under a temporary name so that an interrupted run does not
    // leave a truncated file that would later be taken as done.
    let partial = output.with_extension("tif.partial");
    let mut writer = BufWriter::new(File::create(&partial)?);
    let written = if payload > u32::MAX as u64 {
        info!("Writing BigTIFF for {} bytes of pixels", payload);
        TiffEncoder::new_big(&mut writer).map_err(QuantError::from).and_then(|mut encoder| {
            write_decoded(&mut encoder, width, height, color, &pixels, resolution.as_ref())
        })
    } else {
        TiffEncoder::new(&mut writer).map_err(QuantError::from).and_then(|mut encoder| {
            write_decoded(&mut encoder, width, height, color, &pixels, resolution.as_ref())
        })
    };
    if let Err(e) = written.and_then(|_| Ok(writer.flush()?)) {
        drop(writer);
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    drop(writer);
    fs::rename(&partial, &output)?;
    info!("Wrote {:?} in {:?}", output, start.elapsed());
    Ok(output)
}

fn write_decoded<W, K>(encoder: &mut TiffEncoder<W, K>, width: u32, height: u32,
                       color: ColorType, pixels: &DecodingResult,
                       resolution: Option<&Resolution>) -> Result<()>
where W: Write + Seek, K: TiffKind
{
    match (color, pixels) {
        (ColorType::Gray(8), DecodingResult::U8(buf)) =>
            write_image::<_, _, colortype::Gray8>(encoder, width, height, buf, resolution),
        (ColorType::RGB(8), DecodingResult::U8(buf)) =>
            write_image::<_, _, colortype::RGB8>(encoder, width, height, buf, resolution),
        (ColorType::RGBA(8), DecodingResult::U8(buf)) =>
            write_image::<_, _, colortype::RGBA8>(encoder, width, height, buf, resolution),
        (ColorType::Gray(16), DecodingResult::U16(buf)) =>
            write_image::<_, _, colortype::Gray16>(encoder, width, height, buf, resolution),
        (ColorType::RGB(16), DecodingResult::U16(buf)) =>
            write_image::<_, _, colortype::RGB16>(encoder, width, height, buf, resolution),
        (other, _) => Err(QuantError::UnsupportedLayout(format!("color type {:?}", other))),
    }
}

fn write_image<W, K, C>(encoder: &mut TiffEncoder<W, K>, width: u32, height: u32,
                        data: &[C::Inner], resolution: Option<&Resolution>) -> Result<()>
where W: Write + Seek, K: TiffKind, C: EncoderColor, [C::Inner]: TiffValue
{
    let mut image = encoder.new_image::<C>(width, height)?;
    if let Some(resolution) = resolution {
        let unit = match resolution.unit {
            ResolutionUnit::None => tiff::tags::ResolutionUnit::None,
            ResolutionUnit::Inch => tiff::tags::ResolutionUnit::Inch,
            ResolutionUnit::Centimeter => tiff::tags::ResolutionUnit::Centimeter,
            ResolutionUnit::Other(code) => {
                warn!("Resolution unit {} cannot be written; using none", code);
                tiff::tags::ResolutionUnit::None
            }
        };
        image.resolution_unit(unit);
        image.x_resolution(Rational{n: resolution.x.0, d: resolution.x.1});
        image.y_resolution(Rational{n: resolution.y.0, d: resolution.y.1});
    }
    image.write_data(data)?;
    Ok(())
}

// mod tests.
