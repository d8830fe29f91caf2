use clap::Parser;
use training::checkpoint::load_network_from_checkpoint;
use training::trainer::evaluate;
use training::util::{load_settings, load_splits, validate_backend_choice, DatasetKind};
use training::{NetKind, NetworkConfig, TrainBackend};
use burn_dataset::{build_loader, LoaderConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a primary-network checkpoint on the test split (loss and top-1 accuracy)"
)]
struct Args {
    /// Architecture the checkpoint was trained with.
    #[arg(long, value_enum)]
    net: NetKind,
    /// Checkpoint written by `train` (`<net>-<epoch>-<tag>.bin`).
    #[arg(long)]
    checkpoint: PathBuf,
    /// Evaluate on the accelerator backend (requires the backend-wgpu feature).
    #[arg(long, default_value_t = false)]
    gpu: bool,
    /// Dataset to evaluate on.
    #[arg(long, value_enum, default_value_t = DatasetKind::Cifar100)]
    dataset: DatasetKind,
    /// Directory holding the CIFAR binary files.
    #[arg(long, default_value = "data/cifar-100-binary")]
    data_dir: PathBuf,
    /// JSON settings providing the normalization constants.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Loader worker threads.
    #[arg(short = 'w', long, default_value_t = 2)]
    workers: usize,
    /// Batch size.
    #[arg(short = 'b', long, default_value_t = 128)]
    batch_size: usize,
    /// Seed used for synthetic data.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    validate_backend_choice(args.gpu)?;
    let settings = load_settings(args.config.as_deref())?;

    let (_train, test_set) = load_splits(args.dataset, &args.data_dir, args.seed)?;
    let cfg = NetworkConfig::classifier(args.net, test_set.num_classes)
        .with_input(test_set.channels, test_set.height);
    let mut loader = build_loader(
        test_set,
        LoaderConfig {
            normalization: settings.normalization,
            workers: args.workers,
            batch_size: args.batch_size,
            shuffle: false,
            seed: args.seed,
        },
    )?;

    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    let network = load_network_from_checkpoint::<TrainBackend, _>(&args.checkpoint, &cfg, &device)
        .map_err(|e| {
            anyhow::anyhow!(
                "failed to load checkpoint {}: {e}",
                args.checkpoint.display()
            )
        })?;

    let report = evaluate(&network, &mut loader, &device)?;
    println!(
        "Eval complete: average loss={:.4}, accuracy={:.4} ({}/{})",
        report.loss, report.accuracy, report.correct, report.total
    );
    Ok(())
}
