//! Batch iteration over an [`ImageDataset`].

use crate::types::{DatasetError, DatasetResult, ImageDataset, Normalization};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub normalization: Normalization,
    /// Threads used to normalize the samples of one batch.
    pub workers: usize,
    pub batch_size: usize,
    /// Reshuffle sample order on every [`ImageLoader::reset`].
    pub shuffle: bool,
    /// Seed for reproducible shuffling; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            normalization: Normalization::default(),
            workers: 2,
            batch_size: 128,
            shuffle: true,
            seed: None,
        }
    }
}

/// Images `[B, C, H, W]` and integer class labels `[B]`.
#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ImageLoader {
    dataset: ImageDataset,
    cfg: LoaderConfig,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
    pool: rayon::ThreadPool,
    total_assemble_time: Duration,
}

/// Build a loader over `dataset`; the first epoch's order is drawn immediately.
pub fn build_loader(dataset: ImageDataset, cfg: LoaderConfig) -> DatasetResult<ImageLoader> {
    if dataset.is_empty() {
        return Err(DatasetError::Empty(dataset.name));
    }
    if cfg.batch_size == 0 {
        return Err(DatasetError::Other("batch size must be positive".to_string()));
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.workers.max(1))
        .thread_name(|i| format!("loader-{i}"))
        .build()?;
    let rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    let mut loader = ImageLoader {
        order: (0..dataset.len()).collect(),
        dataset,
        cfg,
        cursor: 0,
        rng,
        pool,
        total_assemble_time: Duration::ZERO,
    };
    loader.reset();
    Ok(loader)
}

impl ImageLoader {
    /// Rewind to the start of a new epoch.
    pub fn reset(&mut self) {
        self.cursor = 0;
        if self.cfg.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    /// Batches per epoch, counting a final partial batch.
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.cfg.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn num_samples(&self) -> usize {
        self.dataset.len()
    }

    pub fn batch_size(&self) -> usize {
        self.cfg.batch_size
    }

    pub fn dataset(&self) -> &ImageDataset {
        &self.dataset
    }

    pub fn assemble_time(&self) -> Duration {
        self.total_assemble_time
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<ImageBatch<B>>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.cfg.batch_size).min(self.order.len());
        let slice = &self.order[self.cursor..end];
        self.cursor = end;

        let started = Instant::now();
        let dataset = &self.dataset;
        let norm = self.cfg.normalization;
        let plane = dataset.height * dataset.width;
        let normalized: Vec<Vec<f32>> = self.pool.install(|| {
            slice
                .par_iter()
                .map(|&idx| {
                    dataset.samples[idx]
                        .pixels
                        .iter()
                        .enumerate()
                        .map(|(i, px)| norm.apply(i / plane, *px))
                        .collect()
                })
                .collect()
        });

        let mut images_buf = Vec::with_capacity(slice.len() * dataset.pixels_per_sample());
        let mut labels_buf = Vec::with_capacity(slice.len());
        for (sample, &idx) in normalized.iter().zip(slice) {
            if sample.len() != dataset.pixels_per_sample() {
                return Err(DatasetError::Other(format!(
                    "sample {idx} of {} has {} values, expected {}",
                    dataset.name,
                    sample.len(),
                    dataset.pixels_per_sample()
                )));
            }
            images_buf.extend_from_slice(sample);
            labels_buf.push(dataset.samples[idx].label as i64);
        }
        let batch = slice.len();
        self.total_assemble_time += started.elapsed();

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(
                images_buf,
                [batch, dataset.channels, dataset.height, dataset.width],
            ),
            device,
        );
        let labels = Tensor::<B, 1, Int>::from_data(
            TensorData::new(labels_buf, [batch]),
            device,
        );
        Ok(Some(ImageBatch { images, labels }))
    }
}
