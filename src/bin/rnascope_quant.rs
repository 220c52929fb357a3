// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use env_logger;
use log::info;

use rnascope_quant::batch::{count_images, process_images, BatchOptions};
use rnascope_quant::classify::{threshold_redness, RednessChannels, RednessParams};
use rnascope_quant::colocalization::{colocalization, costes_significance, costes_thresholds};
use rnascope_quant::decompress::decompress;
use rnascope_quant::dot_counts::CountParams;
use rnascope_quant::histogram_funcs::{get_level_for_fraction, histogram_for_image,
                                      stats_for_histogram, ThresholdMethod};
use rnascope_quant::image_tiff::{Channel, ChannelImage, ChannelOrder};
use rnascope_quant::maxima::{find_maxima, MaximaParams};
use rnascope_quant::pixel_source::open_pixel_source;
use rnascope_quant::results::write_dot_counts;
use rnascope_quant::threshold::{threshold_channel, Foreground};
use rnascope_quant::units::{image_size_microns, pixels_per_micron, PixelScale};

/// Quantification of RNAscope-stained slide images.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Pixels are stored blue, green, red.
    #[arg(long, global = true, default_value_t = false)]
    bgr: std::primitive::bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count dots and tissue area for every image in a directory tree and
    /// write the results as CSV.
    Count {
        /// Directory searched recursively for TIFF images.
        #[arg(short, long)]
        input: PathBuf,

        /// Directory where the Counts_<time>.csv file is written.
        #[arg(short, long)]
        output: PathBuf,

        /// Number of images processed concurrently; defaults to the CPU count.
        #[arg(short, long)]
        workers: Option<usize>,

        /// Channel holding the dots.
        #[arg(long, default_value = "red")]
        dot_channel: String,

        /// Channel thresholded for tissue area.
        #[arg(long, default_value = "blue")]
        area_channel: String,

        /// Find maxima on the raw dot channel, without redness classification.
        #[arg(long, default_value_t = false)]
        no_redness: std::primitive::bool,

        /// Signal is brighter than the background (fluorescence).
        #[arg(long, default_value_t = false)]
        dark_background: std::primitive::bool,

        /// Maxima must be brighter than this.
        #[arg(short, long, default_value_t = 20)]
        tolerance: u8,

        /// Maxima neighborhood size (odd).
        #[arg(short, long, default_value_t = 3)]
        size: u32,

        /// Tissue threshold method: huang, otsu or isodata.
        #[arg(short, long, default_value = "huang")]
        method: String,

        /// Find maxima in square tiles of this size.
        #[arg(long)]
        tile_size: Option<u32>,

        /// Threshold the area channel with a separate level for each square
        /// tile of this size.
        #[arg(long)]
        threshold_tile_size: Option<u32>,

        /// Pixels per micron, overriding the TIFF resolution tags.
        #[arg(long)]
        ppm: Option<f64>,

        /// File to which failed images are appended.
        #[arg(long)]
        error_log: Option<PathBuf>,

        /// Field delimiter of the CSV output.
        #[arg(long, default_value_t = '\t')]
        delimiter: char,
    },

    /// Replace the main channel of every image with its redness channel and
    /// save the results as <name>_Processed.tif.
    Redness {
        #[arg(short, long)]
        input: PathBuf,

        /// Root of the mirrored output hierarchy.
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long)]
        workers: Option<usize>,

        #[arg(long, default_value = "red")]
        main_channel: String,

        #[arg(long, default_value = "green")]
        second_channel: String,

        #[arg(long, default_value = "blue")]
        third_channel: String,

        /// Keep reddish values as is rather than inverting them.
        #[arg(long, default_value_t = false)]
        dark_background: std::primitive::bool,

        #[arg(long)]
        error_log: Option<PathBuf>,
    },

    /// Find maxima in one image.
    Maxima {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "red")]
        channel: String,

        #[arg(short, long, default_value_t = 20)]
        tolerance: u8,

        #[arg(short, long, default_value_t = 3)]
        size: u32,

        #[arg(long)]
        tile_size: Option<u32>,

        /// Search for dark dots on a light background.
        #[arg(long, default_value_t = false)]
        light_background: std::primitive::bool,

        /// Print each maximum.
        #[arg(long, default_value_t = false)]
        coords: std::primitive::bool,
    },

    /// Threshold one channel of an image.
    Threshold {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "blue")]
        channel: String,

        /// huang, otsu or isodata.
        #[arg(short, long, default_value = "huang")]
        method: String,

        /// above (bright foreground) or below (dark foreground).
        #[arg(short, long, default_value = "below")]
        foreground: String,

        #[arg(long)]
        tile_size: Option<u32>,

        /// Where to write the mask.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Costes colocalization of two channels.
    Coloc {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long, default_value = "red")]
        channel1: String,

        #[arg(long, default_value = "green")]
        channel2: String,

        /// Run the randomization test with this many scrambled images.
        #[arg(long)]
        randomize: Option<usize>,

        /// Side of the scrambled blocks.
        #[arg(long, default_value_t = 8)]
        block_size: u32,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Report pixel size and image size from TIFF resolution tags.
    Units {
        #[arg(short, long)]
        input: PathBuf,

        /// Report x and y resolutions separately.
        #[arg(long, default_value_t = false)]
        no_collapse: std::primitive::bool,
    },

    /// Write an uncompressed copy of a TIFF.
    Decompress {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },
}

fn batch_options(workers: Option<usize>, order: ChannelOrder, error_log: Option<PathBuf>)
                 -> BatchOptions {
    let defaults = BatchOptions::default();
    BatchOptions{workers: workers.unwrap_or(defaults.workers),
                 channel_order: order,
                 error_log,
                 ..defaults}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let order = if args.bgr { ChannelOrder::Bgr } else { ChannelOrder::Rgb };
    match args.command {
        Command::Count{input, output, workers, dot_channel, area_channel, no_redness,
                       dark_background, tolerance, size, method, tile_size,
                       threshold_tile_size, ppm, error_log, delimiter} => {
            let dot_channel: Channel = dot_channel.parse()?;
            let params = CountParams{
                dot_channels: RednessChannels{main: dot_channel, ..Default::default()},
                redness: if no_redness { None } else { Some(RednessParams::default()) },
                white_background: !dark_background,
                maxima: MaximaParams{noise_tolerance: tolerance, neighborhood_size: size,
                                     tile_size, ..Default::default()},
                area_channel: area_channel.parse()?,
                threshold_method: method.parse()?,
                foreground: if dark_background { Foreground::Above } else { Foreground::Below },
                threshold_tile_size,
                pixel_scale: ppm.map(PixelScale::uniform),
                ..Default::default()
            };
            if !delimiter.is_ascii() {
                return Err(format!("delimiter {:?} must be ASCII", delimiter).into());
            }
            let options = batch_options(workers, order, error_log);
            let (records, failures) = count_images(&input, &options, &params).await?;
            let path = write_dot_counts(&records, &output, delimiter as u8)?;
            info!("{} images counted, {} failed; results in {:?}",
                  records.len(), failures.len(), path);
        }
        Command::Redness{input, output, workers, main_channel, second_channel,
                         third_channel, dark_background, error_log} => {
            let channels = RednessChannels{main: main_channel.parse()?,
                                           second: second_channel.parse()?,
                                           third: third_channel.parse()?};
            let options = batch_options(workers, order, error_log);
            let report = process_images(&input, &output, &options,
                                        move |image: &mut ChannelImage| {
                threshold_redness(image, &channels, !dark_background,
                                  &RednessParams::default())?;
                Ok(())
            }).await?;
            info!("{} processed, {} skipped, {} failed",
                  report.processed.len(), report.skipped.len(), report.failed.len());
        }
        Command::Maxima{input, channel, tolerance, size, tile_size, light_background,
                        coords} => {
            let source = open_pixel_source(&input, order)?;
            let params = MaximaParams{noise_tolerance: tolerance, neighborhood_size: size,
                                      tile_size, light_background, ..Default::default()};
            let maxima = find_maxima(source.as_ref(), channel.parse()?, &params)?;
            println!("{}\t{}", input.display(), maxima.len());
            if coords {
                for m in &maxima {
                    println!("{:.2}\t{:.2}\t{}\t{}", m.x, m.y, m.value, m.area);
                }
            }
        }
        Command::Threshold{input, channel, method, foreground, tile_size, output} => {
            let source = open_pixel_source(&input, order)?;
            let method: ThresholdMethod = method.parse()?;
            let foreground: Foreground = foreground.parse()?;
            let channel: Channel = channel.parse()?;
            let histogram = histogram_for_image(
                &source.read_channel(source.channel_index(channel)?)?);
            let stats = stats_for_histogram(&histogram);
            info!("Channel {}: mean {:.2} median {} stddev {:.2}; 1%/99% levels {}/{}",
                  channel, stats.mean, stats.median, stats.stddev,
                  get_level_for_fraction(&histogram, 0.01),
                  get_level_for_fraction(&histogram, 0.99));
            let result = threshold_channel(source.as_ref(), channel, method,
                                           foreground, tile_size)?;
            for (rect, level) in &result.levels {
                info!("Tile at ({}, {}) {}x{}: level {}",
                      rect.left(), rect.top(), rect.width(), rect.height(), level);
            }
            println!("{}\t{}", input.display(), result.foreground_count());
            if let Some(output) = output {
                result.mask.save(&output)?;
            }
        }
        Command::Coloc{input, channel1, channel2, randomize, block_size, seed} => {
            let source = open_pixel_source(&input, order)?;
            let a = source.read_channel(source.channel_index(channel1.parse()?)?)?;
            let b = source.read_channel(source.channel_index(channel2.parse()?)?)?;
            let thresholds = costes_thresholds(&a, &b)?;
            let coloc = colocalization(&a, &b, thresholds.t1, thresholds.t2)?;
            println!("t1\tt2\tr\tp\tM1\tM2\tpixels");
            println!("{}\t{}\t{:.6}\t{:.3e}\t{:.6}\t{:.6}\t{}",
                     thresholds.t1, thresholds.t2, coloc.r, coloc.p_value,
                     coloc.m1, coloc.m2, coloc.pixels);
            if let Some(iterations) = randomize {
                let s = costes_significance(&a, &b, block_size, iterations, seed)?;
                println!("observed r {:.6}; randomized r {:.6} +/- {:.6}; certainty {:.4}",
                         s.observed_r, s.mean_random_r, s.stddev_random_r, s.certainty);
            }
        }
        Command::Units{input, no_collapse} => {
            let scale = pixels_per_micron(&input, !no_collapse)?;
            let (height, width) = image_size_microns(&input, !no_collapse)?;
            println!("pixels per micron: x {:.6} y {:.6}", scale.x_ppm, scale.y_ppm);
            println!("size (um): height {:.3} width {:.3}", height, width);
        }
        Command::Decompress{input, output} => {
            let path = decompress(&input, &output)?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
