#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod loss;
pub mod metrics;
pub mod schedule;
pub mod trainer;
pub mod util;

pub use checkpoint::{CheckpointPolicy, CheckpointSink, CheckpointTag, FileCheckpointer};
pub use config::{Settings, SettingsError};
pub use metrics::{JsonlMetricsWriter, MemoryMetrics, MetricsSink};
pub use models::{NetKind, Network, NetworkConfig};
pub use trainer::{
    compose_losses, evaluate, joint_optimizer, run_epochs, EvalReport, JointModel, TrainerState,
};
pub use util::{run_train, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
