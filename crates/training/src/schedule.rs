//! Learning-rate schedules and the curriculum blend coefficient.

/// Curriculum weight `sqrt(epoch / total_epochs)`, clamped to `[0, 1]`.
///
/// Epochs count from 1; epoch 0 yields 0 and silently disables the weighted term.
pub fn blend_coefficient(epoch: usize, total_epochs: usize) -> f64 {
    (epoch as f64 / total_epochs.max(1) as f64).sqrt().min(1.0)
}

/// Per-iteration linear warmup: `lr = base_lr * t / (total_iters + 1e-8)`.
#[derive(Debug, Clone)]
pub struct WarmupLr {
    base_lr: f64,
    total_iters: usize,
    last_iter: usize,
}

impl WarmupLr {
    pub fn new(base_lr: f64, total_iters: usize) -> Self {
        Self {
            base_lr,
            total_iters,
            last_iter: 0,
        }
    }

    pub fn lr(&self) -> f64 {
        self.base_lr * self.last_iter as f64 / (self.total_iters as f64 + 1e-8)
    }

    /// Advance one iteration and return the new learning rate.
    pub fn step(&mut self) -> f64 {
        self.last_iter += 1;
        self.lr()
    }

    pub fn steps_taken(&self) -> usize {
        self.last_iter
    }
}

/// Epoch-indexed step decay: `base_lr * gamma^(milestones <= epoch)`.
#[derive(Debug, Clone)]
pub struct MultiStepLr {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
}

impl MultiStepLr {
    pub fn new(base_lr: f64, milestones: Vec<usize>, gamma: f64) -> Self {
        Self {
            base_lr,
            milestones,
            gamma,
        }
    }

    pub fn lr_at(&self, epoch: usize) -> f64 {
        let passed = self.milestones.iter().filter(|m| **m <= epoch).count();
        self.base_lr * self.gamma.powi(passed as i32)
    }
}
