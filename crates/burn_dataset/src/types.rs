//! Core types and error definitions for burn_dataset.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: size {len} is not a multiple of the {record}-byte record length")]
    Truncated {
        path: PathBuf,
        len: usize,
        record: usize,
    },
    #[error("label {label} out of range for {num_classes} classes in {path}")]
    LabelOutOfRange {
        path: PathBuf,
        label: usize,
        num_classes: usize,
    },
    #[error("dataset {0} contains no samples")]
    Empty(String),
    #[error("failed to build loader thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("{0}")]
    Other(String),
}

/// One decoded sample: 8-bit pixels in CHW order and its class index.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub pixels: Vec<u8>,
    pub label: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

/// Per-channel normalization applied after scaling pixels to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    pub const CIFAR100: Normalization = Normalization {
        mean: [0.507_075_16, 0.486_548_87, 0.440_917_84],
        std: [0.267_334_28, 0.256_438_46, 0.276_150_47],
    };

    pub const IDENTITY: Normalization = Normalization {
        mean: [0.0, 0.0, 0.0],
        std: [1.0, 1.0, 1.0],
    };

    #[inline]
    pub fn apply(&self, channel: usize, pixel: u8) -> f32 {
        let c = channel.min(2);
        (pixel as f32 / 255.0 - self.mean[c]) / self.std[c]
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::CIFAR100
    }
}

/// An in-memory image classification split with a fixed image shape.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    pub name: String,
    pub samples: Vec<RawSample>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub num_classes: usize,
}

impl ImageDataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn pixels_per_sample(&self) -> usize {
        self.channels * self.height * self.width
    }
}
