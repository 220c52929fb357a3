// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;

use imageproc::rect::Rect;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuantError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    #[error("tile size must be positive, got {0}x{1}")]
    InvalidTileSize(u32, u32),

    #[error("neighborhood size must be odd and positive, got {0}")]
    InvalidNeighborhood(u32),

    #[error("region {region:?} exceeds image bounds {width}x{height}")]
    RegionOutOfBounds { region: Rect, width: u32, height: u32 },

    #[error("image dimensions differ: {0:?} vs {1:?}")]
    DimensionMismatch((u32, u32), (u32, u32)),

    #[error("buffer of {actual} bytes does not match {width}x{height}x{channels}")]
    BufferSize { actual: usize, width: u32, height: u32, channels: usize },

    #[error("resolution metadata missing from {0:?}")]
    MissingResolution(PathBuf),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("unsupported pixel layout: {0}")]
    UnsupportedLayout(String),

    #[error("no images found under {0:?}")]
    NoImages(PathBuf),

    #[error("need at least {needed} pixels, found {found}")]
    InsufficientPixels { needed: u64, found: u64 },

    #[error("worker count must be at least 1")]
    NoWorkers,
}

pub type Result<T> = std::result::Result<T, QuantError>;
