// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use env_logger;
use image::{ImageReader, Rgb};
use imageproc::drawing;
use log::{info, warn};

use rnascope_quant::classify::{redness_region, RednessChannels, RednessParams};
use rnascope_quant::image_tiff::{Channel, ChannelImage, ChannelOrder};
use rnascope_quant::maxima::{find_maxima, find_maxima_with, MaximaParams};
use rnascope_quant::pixel_source::PixelSource;

/// Debugging program that runs Find Maxima on test image(s) and writes
/// copies with each maximum circled.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Path of the file or directory to process.
    #[arg(short, long)]
    input: PathBuf,

    /// Directory where output file(s) are written.
    #[arg(short, long)]
    output: PathBuf,

    /// Channel to search: red, green, blue or an index.
    #[arg(short, long, default_value = "red")]
    channel: String,

    /// Maxima must be brighter than this.
    #[arg(short, long, default_value_t = 20)]
    tolerance: u8,

    /// Neighborhood size (odd).
    #[arg(short, long, default_value_t = 3)]
    size: u32,

    /// Search the redness channel derived from the image instead.
    #[arg(short, long, default_value_t = false)]
    redness: std::primitive::bool,

    /// Output list of maxima centroids.
    #[arg(long, default_value_t = false)]
    coords: std::primitive::bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let input_metadata = fs::metadata(&args.input).map_err(|e| {
        format!("Input file/dir {:?} does not exist? {:?}", args.input, e)
    })?;
    if !fs::metadata(&args.output).map(|m| m.is_dir()).unwrap_or(false) {
        return Err(format!("Output {:?} must be a directory", args.output).into());
    }
    let channel: Channel = args.channel.parse()?;
    if input_metadata.is_dir() {
        for entry in fs::read_dir(&args.input)? {
            let path = entry?.path();
            if path.is_file() {
                process_file(&path, channel, &args);
            }
        }
    } else {
        process_file(&args.input, channel, &args);
    }
    Ok(())
}

fn process_file(input_path: &Path, channel: Channel, args: &Args) {
    info!("Processing {:?}", input_path);
    let mut output_path = args.output.clone();
    output_path.push(input_path.file_name().unwrap_or_default());
    output_path.set_extension("png");

    let img = match ImageReader::open(input_path).and_then(|r| r.with_guessed_format()) {
        Ok(reader) => match reader.decode() {
            Ok(img) => img,
            Err(e) => {
                warn!("Skipping {:?} due to: {:?}", input_path, e);
                return;
            }
        },
        Err(e) => {
            warn!("Skipping {:?} due to: {:?}", input_path, e);
            return;
        }
    };
    let image = ChannelImage::from_dynamic(img.clone(), ChannelOrder::Rgb);
    let (width, height) = image.dimensions();
    let params = MaximaParams{noise_tolerance: args.tolerance,
                              neighborhood_size: args.size,
                              ..Default::default()};

    let search_start = Instant::now();
    let result = if args.redness {
        let channels = RednessChannels{main: channel, ..Default::default()};
        let redness = RednessParams::default();
        find_maxima_with(|rect| redness_region(&image, &channels, rect, true, &redness),
                         (width, height), &params)
    } else {
        find_maxima(&image, channel, &params)
    };
    let maxima = match result {
        Ok(maxima) => maxima,
        Err(e) => {
            warn!("Skipping {:?} due to: {}", input_path, e);
            return;
        }
    };
    let elapsed = search_start.elapsed();
    info!("WxH: {}x{}; found {} maxima in {:?}", width, height, maxima.len(), elapsed);
    info!("{}ms per megapixel\n",
          elapsed.as_secs_f64() * 1000.0 / ((width * height) as f64 / 1000000.0));

    // Circle each maximum; brighter peaks get brighter circles.
    let mut img_color = img.into_rgb8();
    for maximum in &maxima {
        let brightness = 100 + (maximum.value as f64 / 255.0 * 155.0) as u8;
        drawing::draw_hollow_circle_mut(
            &mut img_color,
            (maximum.x.round() as i32, maximum.y.round() as i32),
            4,
            Rgb::<u8>([0, brightness, 0]));
    }
    if let Err(e) = img_color.save(&output_path) {
        warn!("Could not write {:?}: {}", output_path, e);
    }
    if args.coords {
        let mut coords_str = String::new();
        coords_str.push_str(format!("# WxH {}x{}\n", width, height).as_str());
        coords_str.push_str("# (y, x, value, area)\n");
        for m in &maxima {
            coords_str.push_str(format!(
                "({}, {}, {}, {}),\n", m.y, m.x, m.value, m.area).as_str());
        }
        info!("{}", coords_str);
    }
}
