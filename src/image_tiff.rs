// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use image::{ColorType, DynamicImage, GrayImage, ImageFormat, ImageReader};
use imageproc::rect::Rect;
use log::debug;

use crate::error::{QuantError, Result};
use crate::pixel_source::{check_region, extract_region, PixelSource};

/// Names a color channel, either by color or by raw index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Channel {
    Red,
    Green,
    Blue,
    Index(usize),
}

impl Channel {
    /// Maps this channel to a sample index for an image with `channels`
    /// samples per pixel stored in `order`.
    pub fn resolve(self, order: ChannelOrder, channels: usize) -> Result<usize> {
        let index = match self {
            Channel::Index(i) => i,
            named => {
                if channels < 3 {
                    return Err(QuantError::InvalidChannel(format!(
                        "{} requested from a {}-channel image", named, channels)));
                }
                order.index_of(named)
            }
        };
        if index >= channels {
            return Err(QuantError::InvalidChannel(format!(
                "index {} out of range for {} channels", index, channels)));
        }
        Ok(index)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Red => write!(f, "red"),
            Channel::Green => write!(f, "green"),
            Channel::Blue => write!(f, "blue"),
            Channel::Index(i) => write!(f, "{}", i),
        }
    }
}

impl FromStr for Channel {
    type Err = QuantError;

    fn from_str(s: &str) -> Result<Channel> {
        match s.trim().to_ascii_lowercase().as_str() {
            "red" | "r" => Ok(Channel::Red),
            "green" | "g" => Ok(Channel::Green),
            "blue" | "b" => Ok(Channel::Blue),
            other => other.parse::<usize>()
                .map(Channel::Index)
                .map_err(|_| QuantError::InvalidChannel(s.to_string())),
        }
    }
}

/// Order of the color samples within a pixel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

impl ChannelOrder {
    fn index_of(self, channel: Channel) -> usize {
        match (self, channel) {
            (_, Channel::Index(i)) => i,
            (_, Channel::Green) => 1,
            (ChannelOrder::Rgb, Channel::Red) | (ChannelOrder::Bgr, Channel::Blue) => 0,
            (ChannelOrder::Rgb, Channel::Blue) | (ChannelOrder::Bgr, Channel::Red) => 2,
        }
    }
}

/// What [ChannelImage::save()] writes.
#[derive(Copy, Clone, Debug)]
pub enum SaveChannels {
    All,
    Only(Channel),
}

/// An 8-bit image held in memory, interleaved (height x width x channels),
/// with the channel order needed to resolve color names.
#[derive(Clone, Debug)]
pub struct ChannelImage {
    width: u32,
    height: u32,
    channels: usize,
    data: Vec<u8>,
    order: ChannelOrder,
}

impl ChannelImage {
    pub fn from_raw(width: u32, height: u32, channels: usize, data: Vec<u8>,
                    order: ChannelOrder) -> Result<ChannelImage> {
        if channels != 1 && channels != 3 {
            return Err(QuantError::UnsupportedLayout(format!(
                "{} channels per pixel", channels)));
        }
        if data.len() != width as usize * height as usize * channels {
            return Err(QuantError::BufferSize{actual: data.len(), width, height, channels});
        }
        Ok(ChannelImage{width, height, channels, data, order})
    }

    pub fn from_dynamic(img: DynamicImage, order: ChannelOrder) -> ChannelImage {
        let (width, height) = (img.width(), img.height());
        let gray = matches!(img.color(),
                            ColorType::L8 | ColorType::L16 | ColorType::La8 |
                            ColorType::La16);
        if gray {
            ChannelImage{width, height, channels: 1, data: img.into_luma8().into_raw(), order}
        } else {
            ChannelImage{width, height, channels: 3, data: img.into_rgb8().into_raw(), order}
        }
    }

    /// Decodes a TIFF/PNG (or any format the `image` crate reads). Higher bit
    /// depths are reduced to 8 bits; alpha is dropped.
    pub fn load(path: &Path, order: ChannelOrder) -> Result<ChannelImage> {
        let load_start = Instant::now();
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        let image = ChannelImage::from_dynamic(img, order);
        debug!("Loaded {:?} ({}x{}x{}) in {:?}", path, image.width, image.height,
               image.channels, load_start.elapsed());
        Ok(image)
    }

    /// (height, width, channels).
    pub fn shape(&self) -> (u32, u32, usize) {
        (self.height, self.width, self.channels)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn max_value(&self) -> u8 {
        self.data.iter().copied().max().unwrap_or(0)
    }

    pub fn channel(&self, channel: Channel) -> Result<GrayImage> {
        let index = self.channel_index(channel)?;
        self.read_channel(index)
    }

    /// Overwrites sample `index` of every pixel with `values`.
    pub fn set_channel(&mut self, index: usize, values: &GrayImage) -> Result<()> {
        if values.dimensions() != (self.width, self.height) {
            return Err(QuantError::DimensionMismatch(
                values.dimensions(), (self.width, self.height)));
        }
        if index >= self.channels {
            return Err(QuantError::InvalidChannel(format!(
                "index {} out of range for {} channels", index, self.channels)));
        }
        let channels = self.channels;
        for (pixel, &v) in self.data.chunks_exact_mut(channels).zip(values.as_raw()) {
            pixel[index] = v;
        }
        Ok(())
    }

    pub fn invert(&mut self) {
        for v in self.data.iter_mut() {
            *v = 255 - *v;
        }
    }

    /// Writes the image (or a single channel of it); the format follows the
    /// file extension.
    pub fn save(&self, path: &Path, which: SaveChannels) -> Result<()> {
        self.save_as(path, which, ImageFormat::from_path(path)?)
    }

    /// As [ChannelImage::save()], in `format` whatever the extension of `path`.
    pub fn save_as(&self, path: &Path, which: SaveChannels, format: ImageFormat) -> Result<()> {
        match which {
            SaveChannels::All => {
                let color = if self.channels == 1 { ColorType::L8 } else { ColorType::Rgb8 };
                image::save_buffer_with_format(path, &self.data, self.width, self.height,
                                               color, format)?;
            }
            SaveChannels::Only(channel) => {
                self.channel(channel)?.save_with_format(path, format)?;
            }
        }
        Ok(())
    }
}

impl PixelSource for ChannelImage {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn channel_count(&self) -> usize {
        self.channels
    }

    fn channel_order(&self) -> ChannelOrder {
        self.order
    }

    fn read_channel_region(&self, channel: usize, region: &Rect) -> Result<GrayImage> {
        check_region(region, self.width, self.height)?;
        if channel >= self.channels {
            return Err(QuantError::InvalidChannel(format!(
                "index {} out of range for {} channels", channel, self.channels)));
        }
        Ok(extract_region(&self.data, self.width, self.channels, channel, region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn rgb_2x2() -> ChannelImage {
        ChannelImage::from_raw(2, 2, 3,
                               vec![10, 20, 30,   11, 21, 31,
                                    12, 22, 32,   13, 23, 255],
                               ChannelOrder::Rgb).unwrap()
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!("Red".parse::<Channel>().unwrap(), Channel::Red);
        assert_eq!(" g ".parse::<Channel>().unwrap(), Channel::Green);
        assert_eq!("blue".parse::<Channel>().unwrap(), Channel::Blue);
        assert_eq!("2".parse::<Channel>().unwrap(), Channel::Index(2));
        assert!("magenta".parse::<Channel>().is_err());
    }

    #[test]
    fn test_channel_resolve() {
        assert_eq!(Channel::Red.resolve(ChannelOrder::Rgb, 3).unwrap(), 0);
        assert_eq!(Channel::Red.resolve(ChannelOrder::Bgr, 3).unwrap(), 2);
        assert_eq!(Channel::Blue.resolve(ChannelOrder::Bgr, 3).unwrap(), 0);
        assert_eq!(Channel::Green.resolve(ChannelOrder::Bgr, 3).unwrap(), 1);
        assert_eq!(Channel::Index(0).resolve(ChannelOrder::Rgb, 1).unwrap(), 0);
        assert!(Channel::Index(3).resolve(ChannelOrder::Rgb, 3).is_err());
        // Named channels need a color image.
        assert!(Channel::Red.resolve(ChannelOrder::Rgb, 1).is_err());
    }

    #[test]
    fn test_from_raw_validates() {
        assert!(ChannelImage::from_raw(2, 2, 3, vec![0; 11], ChannelOrder::Rgb).is_err());
        assert!(ChannelImage::from_raw(2, 2, 2, vec![0; 8], ChannelOrder::Rgb).is_err());
        assert!(ChannelImage::from_raw(2, 2, 1, vec![0; 4], ChannelOrder::Rgb).is_ok());
    }

    #[test]
    fn test_channel_access() {
        let img = rgb_2x2();
        assert_eq!(img.shape(), (2, 2, 3));
        assert_eq!(img.max_value(), 255);
        assert_eq!(img.channel(Channel::Green).unwrap().as_raw(), &vec![20, 21, 22, 23]);
        let bgr = ChannelImage::from_raw(2, 2, 3, img.as_raw().to_vec(),
                                         ChannelOrder::Bgr).unwrap();
        assert_eq!(bgr.channel(Channel::Red).unwrap().as_raw(), &vec![30, 31, 32, 255]);
    }

    #[test]
    fn test_set_channel_and_invert() {
        let mut img = rgb_2x2();
        let zeros = GrayImage::new(2, 2);
        img.set_channel(0, &zeros).unwrap();
        assert_eq!(img.channel(Channel::Red).unwrap().as_raw(), &vec![0, 0, 0, 0]);
        assert!(img.set_channel(0, &GrayImage::new(3, 2)).is_err());
        img.invert();
        assert_eq!(img.channel(Channel::Red).unwrap().as_raw(), &vec![255; 4]);
        assert_eq!(img.channel(Channel::Blue).unwrap().as_raw(), &vec![225, 224, 223, 0]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let img = rgb_2x2();
        let all = dir.path().join("all.tif");
        img.save(&all, SaveChannels::All).unwrap();
        let loaded = ChannelImage::load(&all, ChannelOrder::Rgb).unwrap();
        assert_eq!(loaded.as_raw(), img.as_raw());

        let blue = dir.path().join("blue.png");
        img.save(&blue, SaveChannels::Only(Channel::Blue)).unwrap();
        let loaded = ChannelImage::load(&blue, ChannelOrder::Rgb).unwrap();
        assert_eq!(loaded.shape(), (2, 2, 1));
        assert_eq!(loaded.as_raw(), &[30, 31, 32, 255]);
    }

    #[test]
    fn test_from_dynamic_rgb() {
        let mut rgb = RgbImage::new(3, 1);
        rgb.put_pixel(2, 0, Rgb([1, 2, 3]));
        let img = ChannelImage::from_dynamic(DynamicImage::ImageRgb8(rgb), ChannelOrder::Rgb);
        assert_eq!(img.shape(), (1, 3, 3));
        assert_eq!(&img.as_raw()[6..9], &[1, 2, 3]);
    }
}  // mod tests.
