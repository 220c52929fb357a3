// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::Path;

use image::GrayImage;
use imageproc::rect::Rect;
use log::{debug, info};

use crate::error::{QuantError, Result};
use crate::image_tiff::{Channel, ChannelImage, ChannelOrder};

/// Read access to the channels of an 8-bit interleaved image, regardless of
/// whether the pixels live in memory or in a memory-mapped file.
pub trait PixelSource: Send + Sync {
    /// (width, height).
    fn dimensions(&self) -> (u32, u32);

    fn channel_count(&self) -> usize;

    fn channel_order(&self) -> ChannelOrder;

    /// Copies one channel of `region` out as a grayscale image.
    fn read_channel_region(&self, channel: usize, region: &Rect) -> Result<GrayImage>;

    fn channel_index(&self, channel: Channel) -> Result<usize> {
        channel.resolve(self.channel_order(), self.channel_count())
    }

    fn read_channel(&self, channel: usize) -> Result<GrayImage> {
        let (width, height) = self.dimensions();
        self.read_channel_region(channel, &Rect::at(0, 0).of_size(width, height))
    }
}

/// Checks that `region` lies within a `width` x `height` image.
pub fn check_region(region: &Rect, width: u32, height: u32) -> Result<()> {
    if region.left() < 0 || region.top() < 0 ||
        region.right() >= width as i32 || region.bottom() >= height as i32
    {
        return Err(QuantError::RegionOutOfBounds{region: *region, width, height});
    }
    Ok(())
}

/// Copies channel `channel` of `region` out of an interleaved buffer.
pub(crate) fn extract_region(pixels: &[u8], width: u32, channels: usize,
                             channel: usize, region: &Rect) -> GrayImage {
    let mut out = Vec::with_capacity((region.width() * region.height()) as usize);
    let row_stride = width as usize * channels;
    for y in region.top()..=region.bottom() {
        let row_start = y as usize * row_stride;
        let row = &pixels[row_start + region.left() as usize * channels ..
                          row_start + (region.right() as usize + 1) * channels];
        out.extend(row.iter().skip(channel).step_by(channels));
    }
    GrayImage::from_raw(region.width(), region.height(), out).unwrap()
}

/// Opens `path` memory-mapped when its layout allows it, otherwise decodes
/// it into memory.
pub fn open_pixel_source(path: &Path, order: ChannelOrder)
                         -> Result<Box<dyn PixelSource>> {
    #[cfg(unix)]
    {
        match crate::mapped_tiff::MappedTiff::open(path, order) {
            Ok(mapped) => {
                info!("Memory-mapped {:?}", path);
                return Ok(Box::new(mapped));
            }
            Err(e) => debug!("Not memory-mapping {:?}: {}", path, e),
        }
    }
    Ok(Box::new(ChannelImage::load(path, order)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_region() {
        assert!(check_region(&Rect::at(0, 0).of_size(4, 3), 4, 3).is_ok());
        assert!(check_region(&Rect::at(1, 0).of_size(4, 3), 4, 3).is_err());
        assert!(check_region(&Rect::at(-1, 0).of_size(2, 2), 4, 3).is_err());
        assert!(check_region(&Rect::at(0, 2).of_size(1, 2), 4, 3).is_err());
    }

    #[test]
    fn test_extract_region() {
        // 3x2 image, two channels.
        let pixels: Vec<u8> = vec![ 1, 10,  2, 20,  3, 30,
                                    4, 40,  5, 50,  6, 60];
        let region = extract_region(&pixels, 3, 2, 1, &Rect::at(1, 0).of_size(2, 2));
        assert_eq!(region.as_raw(), &vec![20, 30, 50, 60]);
        let region = extract_region(&pixels, 3, 2, 0, &Rect::at(0, 1).of_size(1, 1));
        assert_eq!(region.as_raw(), &vec![4]);
    }
}  // mod tests.
