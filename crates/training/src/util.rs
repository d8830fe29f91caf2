use crate::checkpoint::FileCheckpointer;
use crate::config::Settings;
use crate::metrics::{JsonlMetricsWriter, MetricsSink};
use crate::trainer::{joint_optimizer, run_epochs, JointModel, TrainerState};
use crate::TrainBackend;
use burn::backend::Autodiff;
use burn::module::Module;
use burn_dataset::{
    build_loader, load_cifar_split, synthetic_dataset, CifarVariant, ImageDataset, LoaderConfig,
    Split, SyntheticConfig,
};
use clap::{ArgAction, Parser, ValueEnum};
use models::NetKind;
use std::path::{Path, PathBuf};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Cifar100,
    Cifar10,
    /// Generated in memory; no files needed.
    Synthetic,
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train an image classifier against an adversarial sample-weighting network"
)]
pub struct TrainArgs {
    /// Network architecture (used for both networks).
    #[arg(long, value_enum)]
    pub net: NetKind,
    /// Train on the accelerator backend (requires the backend-wgpu feature).
    #[arg(long, default_value_t = false)]
    pub gpu: bool,
    /// Loader worker threads.
    #[arg(short = 'w', long, default_value_t = 2)]
    pub workers: usize,
    /// Batch size.
    #[arg(short = 'b', long, default_value_t = 128)]
    pub batch_size: usize,
    /// Shuffle both splits every epoch.
    #[arg(short = 's', long, default_value_t = true, action = ArgAction::Set)]
    pub shuffle: bool,
    /// Warmup epochs (per-iteration linear ramp).
    #[arg(long, default_value_t = 1)]
    pub warm: usize,
    /// Initial learning rate.
    #[arg(long, default_value_t = 0.1)]
    pub lr: f64,
    /// JSON schedule settings (epochs, milestones, save cadence, output roots).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Dataset to train on.
    #[arg(long, value_enum, default_value_t = DatasetKind::Cifar100)]
    pub dataset: DatasetKind,
    /// Directory holding the CIFAR binary files.
    #[arg(long, default_value = "data/cifar-100-binary")]
    pub data_dir: PathBuf,
    /// Seed for shuffling and synthetic data.
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn validate_backend_choice(gpu: bool) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (gpu, built_wgpu) {
        (true, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or drop --gpu")
        }
        (false, true) => {
            log::warn!("built with backend-wgpu; training will still use the WGPU backend without --gpu");
        }
        _ => {}
    }
    Ok(())
}

pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let settings = match path {
        Some(path) => Settings::from_path(path)?,
        None => Settings::default(),
    };
    settings.validate()?;
    Ok(settings)
}

/// Load the train and test splits for `kind`.
pub fn load_splits(
    kind: DatasetKind,
    data_dir: &Path,
    seed: Option<u64>,
) -> anyhow::Result<(ImageDataset, ImageDataset)> {
    let variant = match kind {
        DatasetKind::Cifar100 => CifarVariant::Cifar100,
        DatasetKind::Cifar10 => CifarVariant::Cifar10,
        DatasetKind::Synthetic => {
            let seed = seed.unwrap_or(0);
            let train = synthetic_dataset(&SyntheticConfig {
                samples: 512,
                seed,
                ..Default::default()
            });
            let test = synthetic_dataset(&SyntheticConfig {
                samples: 128,
                seed: seed.wrapping_add(1),
                ..Default::default()
            });
            return Ok((train, test));
        }
    };
    let train = load_cifar_split(data_dir, variant, Split::Train)?;
    let test = load_cifar_split(data_dir, variant, Split::Test)?;
    Ok((train, test))
}

pub fn run_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H-%M-%S").to_string()
}

type ADBackend = Autodiff<TrainBackend>;

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.gpu)?;
    let settings = load_settings(args.config.as_deref())?;

    let (train_set, test_set) = load_splits(args.dataset, &args.data_dir, args.seed)?;
    let num_classes = train_set.num_classes;
    let channels = train_set.channels;
    let side = train_set.height;
    if train_set.width != side {
        anyhow::bail!("expected square images, got {}x{}", train_set.width, side);
    }
    let loader_cfg = LoaderConfig {
        normalization: settings.normalization,
        workers: args.workers,
        batch_size: args.batch_size,
        shuffle: args.shuffle,
        seed: args.seed,
    };
    let mut train_loader = build_loader(train_set, loader_cfg.clone())?;
    let mut test_loader = build_loader(test_set, loader_cfg)?;

    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let model = JointModel::<ADBackend>::new(args.net, num_classes, channels, side, &device);
    log::info!(
        "{}: primary {} params, weighting {} params, {} classes",
        args.net,
        model.primary.num_params(),
        model.weighting.num_params(),
        num_classes
    );

    let net_name = args.net.name();
    let stamp = run_stamp();
    let mut metrics = JsonlMetricsWriter::create(&settings.log_root.join(net_name).join(&stamp))?;
    let mut checkpoints =
        FileCheckpointer::create(&settings.checkpoint_root.join(net_name).join(&stamp))?;

    let optim = joint_optimizer::<ADBackend>(&settings);
    let mut state = TrainerState::new(optim, &settings, args.lr, args.warm, train_loader.len());
    let (_model, epochs) = run_epochs(
        model,
        &mut state,
        &mut train_loader,
        &mut test_loader,
        &device,
        net_name,
        &mut metrics,
        &mut checkpoints,
    )?;
    metrics.close()?;

    let last = epochs.last().map(|e| e.eval.accuracy).unwrap_or(0.0);
    log::info!(
        "finished {} epochs: last accuracy {:.4}, best accuracy {:.4}, checkpoints in {}",
        epochs.len(),
        last,
        state.best_accuracy,
        checkpoints.dir().display()
    );
    Ok(())
}
