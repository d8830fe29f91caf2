//! Deterministic synthetic classification data for smoke runs and tests.

use crate::types::{ImageDataset, RawSample};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub num_classes: usize,
    pub samples: usize,
    /// Square side length in pixels.
    pub image_size: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_classes: 10,
            samples: 256,
            image_size: 32,
            seed: 0,
        }
    }
}

/// Build an RGB dataset where each class has its own mean colour plus uniform noise.
///
/// Labels cycle through the classes so every class is present once `samples >= num_classes`.
pub fn synthetic_dataset(cfg: &SyntheticConfig) -> ImageDataset {
    let num_classes = cfg.num_classes.max(1);
    let side = cfg.image_size.max(1);
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let samples = (0..cfg.samples)
        .map(|i| {
            let label = i % num_classes;
            let mut pixels = Vec::with_capacity(3 * side * side);
            for c in 0..3 {
                let base = ((label * 3 + c) * 200 / (num_classes * 3)) as i32 + 20;
                for _ in 0..side * side {
                    let noise: i32 = rng.random_range(-16..=16);
                    pixels.push((base + noise).clamp(0, 255) as u8);
                }
            }
            RawSample { pixels, label }
        })
        .collect();
    ImageDataset {
        name: format!("synthetic-{num_classes}c"),
        samples,
        channels: 3,
        height: side,
        width: side,
        num_classes,
    }
}
