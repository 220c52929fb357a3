// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Read-only memory mapping of uncompressed whole-slide TIFFs. Only the
//! regions that are actually read get paged in, so images much larger than
//! RAM can be tiled.

use std::fs::File;
use std::io::Error;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use image::GrayImage;
use imageproc::rect::Rect;
use libc::{c_void, mmap, munmap, MAP_FAILED, MAP_PRIVATE, PROT_READ};
use log::{debug, warn};
use tiff::decoder::Decoder;
use tiff::tags::Tag;
use tiff::ColorType;

use crate::error::{QuantError, Result};
use crate::image_tiff::ChannelOrder;
use crate::pixel_source::{check_region, extract_region, PixelSource};

pub struct MappedTiff {
    addr: *mut c_void,
    map_len: usize,
    // Byte offset of the first pixel within the mapping.
    data_offset: usize,
    width: u32,
    height: u32,
    channels: usize,
    order: ChannelOrder,
}

// The mapping is PROT_READ and never mutated after construction.
unsafe impl Send for MappedTiff {}
unsafe impl Sync for MappedTiff {}

/// Where the pixel payload of a TIFF lives, if it is a single contiguous run
/// of chunky 8-bit samples.
#[derive(Debug, PartialEq)]
pub(crate) struct ContiguousLayout {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    pub data_offset: u64,
}

pub(crate) fn contiguous_layout(file: &File) -> Result<ContiguousLayout> {
    let mut decoder = Decoder::new(file)?;
    let (width, height) = decoder.dimensions()?;
    let channels = match decoder.colortype()? {
        ColorType::Gray(8) => 1,
        ColorType::RGB(8) => 3,
        other => {
            return Err(QuantError::UnsupportedLayout(format!("color type {:?}", other)));
        }
    };
    let compression = decoder.find_tag(Tag::Compression)?
        .map(|v| v.into_u16()).transpose()?.unwrap_or(1);
    if compression != 1 {
        return Err(QuantError::UnsupportedLayout(format!("compression {}", compression)));
    }
    let planar = decoder.find_tag(Tag::PlanarConfiguration)?
        .map(|v| v.into_u16()).transpose()?.unwrap_or(1);
    if planar != 1 {
        return Err(QuantError::UnsupportedLayout("planar samples".to_string()));
    }
    if decoder.find_tag(Tag::TileOffsets)?.is_some() {
        return Err(QuantError::UnsupportedLayout("tiled organization".to_string()));
    }
    let offsets = decoder.get_tag_u64_vec(Tag::StripOffsets)?;
    let byte_counts = decoder.get_tag_u64_vec(Tag::StripByteCounts)?;
    if offsets.is_empty() || offsets.len() != byte_counts.len() {
        return Err(QuantError::UnsupportedLayout("malformed strip tags".to_string()));
    }
    for i in 1..offsets.len() {
        if offsets[i] != offsets[i - 1] + byte_counts[i - 1] {
            return Err(QuantError::UnsupportedLayout("strips are not contiguous".to_string()));
        }
    }
    let payload: u64 = byte_counts.iter().sum();
    let expected = width as u64 * height as u64 * channels as u64;
    if payload < expected {
        return Err(QuantError::UnsupportedLayout(format!(
            "strips hold {} bytes, expected {}", payload, expected)));
    }
    Ok(ContiguousLayout{width, height, channels, data_offset: offsets[0]})
}

impl MappedTiff {
    pub fn open(path: &Path, order: ChannelOrder) -> Result<MappedTiff> {
        let file = File::open(path)?;
        let layout = contiguous_layout(&file)?;
        let map_len = file.metadata()?.len() as usize;
        let data_offset = layout.data_offset as usize;
        let payload = layout.width as usize * layout.height as usize * layout.channels;
        if data_offset + payload > map_len {
            return Err(QuantError::UnsupportedLayout(format!(
                "pixel data runs past end of {:?}", path)));
        }
        let addr = unsafe {
            mmap(std::ptr::null_mut(), map_len, PROT_READ, MAP_PRIVATE,
                 file.as_raw_fd(), 0)
        };
        if addr == MAP_FAILED {
            return Err(QuantError::Io(Error::last_os_error()));
        }
        // The mapping stays valid after `file` is closed.
        debug!("Mapped {} bytes of {:?}; pixels at offset {}", map_len, path, data_offset);
        Ok(MappedTiff{addr, map_len, data_offset,
                      width: layout.width, height: layout.height,
                      channels: layout.channels, order})
    }

    fn pixels(&self) -> &[u8] {
        let len = self.width as usize * self.height as usize * self.channels;
        unsafe {
            std::slice::from_raw_parts((self.addr as *const u8).add(self.data_offset), len)
        }
    }
}

impl Drop for MappedTiff {
    fn drop(&mut self) {
        unsafe {
            if munmap(self.addr, self.map_len) == -1 {
                warn!("Could not munmap TIFF: errno {}",
                      Error::last_os_error().raw_os_error().unwrap_or(0));
            }
        }
    }
}

impl PixelSource for MappedTiff {
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
        Ok(extract_region(self.pixels(), self.width, self.channels, channel, region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufWriter;
    use tiff::encoder::compression::Packbits;
    use tiff::encoder::{colortype, TiffEncoder};
    use crate::image_tiff::{Channel, ChannelImage};
    use crate::pixel_source::open_pixel_source;

    fn pattern(width: u32, height: u32) -> Vec<u8> {
        (0..width * height * 3).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_mapped_matches_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slide.tif");
        let (width, height) = (40, 300);
        let data = pattern(width, height);
        {
            let mut writer = BufWriter::new(File::create(&path).unwrap());
            let mut encoder = TiffEncoder::new(&mut writer).unwrap();
            encoder.write_image::<colortype::RGB8>(width, height, &data).unwrap();
        }
        let mapped = MappedTiff::open(&path, ChannelOrder::Rgb).unwrap();
        let decoded = ChannelImage::from_raw(width, height, 3, data, ChannelOrder::Rgb).unwrap();
        assert_eq!(mapped.dimensions(), (40, 300));
        let region = Rect::at(5, 100).of_size(20, 150);
        for c in 0..3 {
            assert_eq!(mapped.read_channel_region(c, &region).unwrap(),
                       decoded.read_channel_region(c, &region).unwrap());
        }
        assert_eq!(mapped.channel_index(Channel::Blue).unwrap(), 2);
        assert!(mapped.read_channel_region(0, &Rect::at(30, 0).of_size(20, 1)).is_err());
    }

    #[test]
    fn test_compressed_is_not_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packed.tif");
        let data = pattern(16, 16);
        {
            let mut writer = BufWriter::new(File::create(&path).unwrap());
            let mut encoder = TiffEncoder::new(&mut writer).unwrap();
            encoder.write_image_with_compression::<colortype::RGB8, _>(
                16, 16, Packbits, &data).unwrap();
        }
        assert!(MappedTiff::open(&path, ChannelOrder::Rgb).is_err());
        // Falls back to decoding.
        let source = open_pixel_source(&path, ChannelOrder::Rgb).unwrap();
        assert_eq!(source.dimensions(), (16, 16));
        assert_eq!(source.read_channel(0).unwrap().get_pixel(1, 0)[0], 3);
    }
}  // mod tests.
