//! Image classification datasets and Burn-compatible batching.
//!
//! This crate provides:
//! - CIFAR-10 / CIFAR-100 binary readers
//! - A deterministic synthetic dataset for smoke runs
//! - A shuffling batch loader with per-channel normalization

pub mod batch;
pub mod cifar;
pub mod synthetic;
pub mod types;

pub use batch::{build_loader, ImageBatch, ImageLoader, LoaderConfig};
pub use cifar::{load_cifar_split, CifarVariant};
pub use synthetic::{synthetic_dataset, SyntheticConfig};
pub use types::*;
