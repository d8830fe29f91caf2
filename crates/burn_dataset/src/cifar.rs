//! Readers for the CIFAR binary distributions.
//!
//! CIFAR-10 records are `<label:u8><3072 pixels>`; CIFAR-100 records are
//! `<coarse:u8><fine:u8><3072 pixels>` and we train on the fine label. Pixels are stored
//! as three 32x32 planes (R, G, B), which is already CHW.

use crate::types::{DatasetError, DatasetResult, ImageDataset, RawSample, Split};
use std::fs;
use std::path::{Path, PathBuf};

pub const CIFAR_SIDE: usize = 32;
pub const CIFAR_PIXELS: usize = 3 * CIFAR_SIDE * CIFAR_SIDE;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CifarVariant {
    Cifar10,
    Cifar100,
}

impl CifarVariant {
    pub fn num_classes(&self) -> usize {
        match self {
            CifarVariant::Cifar10 => 10,
            CifarVariant::Cifar100 => 100,
        }
    }

    fn label_bytes(&self) -> usize {
        match self {
            CifarVariant::Cifar10 => 1,
            CifarVariant::Cifar100 => 2,
        }
    }

    pub fn record_len(&self) -> usize {
        self.label_bytes() + CIFAR_PIXELS
    }

    /// Binary files making up `split`, relative to the extracted archive root.
    pub fn files(&self, split: Split) -> Vec<String> {
        match (self, split) {
            (CifarVariant::Cifar10, Split::Train) => {
                (1..=5).map(|i| format!("data_batch_{i}.bin")).collect()
            }
            (CifarVariant::Cifar10, Split::Test) => vec!["test_batch.bin".to_string()],
            (CifarVariant::Cifar100, Split::Train) => vec!["train.bin".to_string()],
            (CifarVariant::Cifar100, Split::Test) => vec!["test.bin".to_string()],
        }
    }
}

/// Load one split from `root` (the directory holding the `.bin` files).
pub fn load_cifar_split(
    root: &Path,
    variant: CifarVariant,
    split: Split,
) -> DatasetResult<ImageDataset> {
    let mut samples = Vec::new();
    for file in variant.files(split) {
        let path = root.join(file);
        let bytes = fs::read(&path).map_err(|source| DatasetError::Io {
            path: path.clone(),
            source,
        })?;
        samples.extend(parse_records(&path, &bytes, variant)?);
    }
    if samples.is_empty() {
        return Err(DatasetError::Empty(format!(
            "{} ({})",
            root.display(),
            split.as_str()
        )));
    }
    log::info!(
        "loaded {} {} samples from {}",
        samples.len(),
        split.as_str(),
        root.display()
    );
    Ok(ImageDataset {
        name: format!("{variant:?}-{}", split.as_str()).to_lowercase(),
        samples,
        channels: 3,
        height: CIFAR_SIDE,
        width: CIFAR_SIDE,
        num_classes: variant.num_classes(),
    })
}

pub(crate) fn parse_records(
    path: &Path,
    bytes: &[u8],
    variant: CifarVariant,
) -> DatasetResult<Vec<RawSample>> {
    let record = variant.record_len();
    if bytes.len() % record != 0 {
        return Err(DatasetError::Truncated {
            path: PathBuf::from(path),
            len: bytes.len(),
            record,
        });
    }
    let label_bytes = variant.label_bytes();
    let num_classes = variant.num_classes();
    bytes
        .chunks_exact(record)
        .map(|chunk| {
            // The fine label is the last label byte in both layouts.
            let label = chunk[label_bytes - 1] as usize;
            if label >= num_classes {
                return Err(DatasetError::LabelOutOfRange {
                    path: PathBuf::from(path),
                    label,
                    num_classes,
                });
            }
            Ok(RawSample {
                pixels: chunk[label_bytes..].to_vec(),
                label,
            })
        })
        .collect()
}
