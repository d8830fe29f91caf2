use burn::backend::{ndarray::NdArray, Autodiff};
use burn::module::AutodiffModule;
use burn::tensor::{Int, Tensor};
use burn_dataset::{
    build_loader, synthetic_dataset, ImageLoader, LoaderConfig, Normalization, SyntheticConfig,
};
use models::{build_network, NetworkConfig};
use std::collections::HashMap;
use std::fs;
use training::checkpoint::{
    apply_checkpoint_policy, load_network_from_checkpoint, CheckpointPolicy, CheckpointTag,
    MemoryCheckpointer,
};
use training::metrics::MetricEvent;
use training::{
    evaluate, joint_optimizer, run_epochs, FileCheckpointer, JointModel, JsonlMetricsWriter,
    MemoryMetrics, MetricsSink, NetKind, Settings, TrainerState,
};

type B = NdArray<f32>;
type ADBackend = Autodiff<B>;

fn loader(samples: usize, batch_size: usize, seed: u64) -> ImageLoader {
    let dataset = synthetic_dataset(&SyntheticConfig {
        num_classes: 2,
        samples,
        image_size: 4,
        seed,
    });
    build_loader(
        dataset,
        LoaderConfig {
            normalization: Normalization::CIFAR100,
            workers: 2,
            batch_size,
            shuffle: true,
            seed: Some(seed),
        },
    )
    .unwrap()
}

fn head_weights<Bk: burn::tensor::backend::Backend>(net: &models::Network<Bk>) -> Vec<f32> {
    net.head.weight.val().into_data().to_vec::<f32>().unwrap()
}

#[test]
fn one_epoch_steps_once_per_batch() -> anyhow::Result<()> {
    let device = Default::default();
    let mut train = loader(12, 4, 5);
    assert_eq!(train.len(), 3);

    let settings = Settings {
        epochs: 10,
        ..Default::default()
    };
    let model = JointModel::<ADBackend>::new(NetKind::Cnn, 2, 3, 4, &device);
    let primary_before = head_weights(&model.primary);
    let weighting_before = head_weights(&model.weighting);
    let param_count = model.primary.parameter_snapshots().len();

    let optim = joint_optimizer::<ADBackend>(&settings);
    let mut state = TrainerState::new(optim, &settings, 0.1, 1, train.len());
    let mut metrics = MemoryMetrics::default();
    state.begin_epoch(1);
    let (model, steps) = state.train_epoch(model, &mut train, &device, &mut metrics)?;

    assert_eq!(steps.len(), 3);
    assert_eq!(state.optimizer_steps, 3);
    assert_eq!(state.iteration, 3);
    assert_eq!(
        steps.iter().map(|s| s.iteration).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    // Warmup ramps towards the base rate over the single warm epoch.
    assert!(steps[0].lr < steps[1].lr && steps[1].lr < steps[2].lr);
    assert!((steps[2].lr - 0.1).abs() < 1e-6);
    assert!(steps.iter().all(|s| (s.alpha - 0.1f64.sqrt()).abs() < 1e-12));
    assert!(steps.iter().all(|s| s.grad_norm_weight.is_some()));

    assert_ne!(head_weights(&model.primary), primary_before);
    assert_ne!(head_weights(&model.weighting), weighting_before);

    assert_eq!(metrics.scalars_tagged("Train/loss").len(), 3);
    assert_eq!(
        metrics
            .scalars_tagged("LastLayerGradients/grad_norm2_weights")
            .len(),
        3
    );
    assert_eq!(metrics.histograms.len(), param_count);
    let mut per_tag: HashMap<&str, usize> = HashMap::new();
    for h in &metrics.histograms {
        assert_eq!(h.step, 1);
        *per_tag.entry(h.tag.as_str()).or_default() += 1;
    }
    assert!(per_tag.values().all(|count| *count == 1));
    assert!(per_tag.contains_key("head/weight"));
    Ok(())
}

#[test]
fn accuracy_counts_the_partial_last_batch() -> anyhow::Result<()> {
    let device = Default::default();
    let mut test = loader(10, 4, 8);
    assert_eq!(test.len(), 3);
    let network = build_network::<B>(
        &NetworkConfig::classifier(NetKind::Mlp, 2).with_input(3, 4),
        &device,
    );

    let report = evaluate(&network, &mut test, &device)?;
    assert_eq!(report.total, 10);

    // Recount with a single full-dataset batch.
    let mut whole = loader(10, 10, 8);
    let batch = whole.next_batch::<B>(&device)?.unwrap();
    let preds: Tensor<B, 1, Int> = network.forward(batch.images).argmax(1).reshape([10]);
    let preds = preds.into_data().convert::<i64>().to_vec::<i64>().unwrap();
    let labels = batch
        .labels
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .unwrap();
    let correct = preds.iter().zip(&labels).filter(|(p, l)| p == l).count();

    assert_eq!(report.correct, correct);
    assert_eq!(report.accuracy, correct as f64 / 10.0);
    assert!(report.loss.is_finite() && report.loss > 0.0);
    Ok(())
}

#[test]
fn best_checkpoints_pre_empt_regular_saves() -> anyhow::Result<()> {
    let device = Default::default();
    let network = build_network::<B>(
        &NetworkConfig::classifier(NetKind::Mlp, 2).with_input(3, 4),
        &device,
    );
    let policy = CheckpointPolicy {
        best_after: 60,
        save_every: 5,
    };
    let mut sink = MemoryCheckpointer::default();
    let mut best = 0.0;
    let history = [
        (55, 0.30),
        (60, 0.40),
        (61, 0.50),
        (62, 0.45),
        (65, 0.55),
        (70, 0.55),
        (71, 0.60),
    ];
    for (epoch, acc) in history {
        apply_checkpoint_policy(&policy, &mut best, epoch, acc, &network, "mlp", &mut sink)?;
    }

    let saved: Vec<(usize, CheckpointTag)> =
        sink.saved.iter().map(|(e, t, _)| (*e, *t)).collect();
    assert_eq!(
        saved,
        vec![
            (55, CheckpointTag::Regular),
            (60, CheckpointTag::Regular),
            (61, CheckpointTag::Best),
            (65, CheckpointTag::Best),
            (70, CheckpointTag::Regular),
            (71, CheckpointTag::Best),
        ]
    );
    assert_eq!(best, 0.60);
    assert_eq!(sink.saved[2].2.to_str(), Some("mlp-61-best.bin"));
    Ok(())
}

#[test]
fn full_run_writes_events_and_checkpoints() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let device = Default::default();
    let settings = Settings {
        epochs: 4,
        milestones: vec![1, 2, 3],
        save_every: 1,
        checkpoint_root: temp.path().join("checkpoint"),
        log_root: temp.path().join("runs"),
        ..Default::default()
    };
    settings.validate()?;

    let mut train = loader(8, 4, 1);
    let mut test = loader(6, 4, 2);
    let model = JointModel::<ADBackend>::new(NetKind::Cnn, 2, 3, 4, &device);
    let optim = joint_optimizer::<ADBackend>(&settings);
    let mut state = TrainerState::new(optim, &settings, 0.05, 1, train.len());
    let mut metrics = JsonlMetricsWriter::create(&settings.log_root.join("cnn").join("run"))?;
    let mut checkpoints =
        FileCheckpointer::create(&settings.checkpoint_root.join("cnn").join("run"))?;

    let (model, epochs) = run_epochs(
        model,
        &mut state,
        &mut train,
        &mut test,
        &device,
        "cnn",
        &mut metrics,
        &mut checkpoints,
    )?;
    metrics.close()?;

    assert_eq!(epochs.len(), 3);
    assert_eq!(state.optimizer_steps, 6);
    // Epochs 1 and 2 are before the second milestone, so only regular saves happen there.
    assert_eq!(epochs[0].checkpoint.as_ref().map(|c| c.0), Some(CheckpointTag::Regular));
    assert_eq!(epochs[1].checkpoint.as_ref().map(|c| c.0), Some(CheckpointTag::Regular));
    assert!(epochs[2].checkpoint.is_some());
    for epoch in &epochs {
        let (_, path) = epoch.checkpoint.as_ref().unwrap();
        assert!(path.exists(), "missing {}", path.display());
    }

    let text = fs::read_to_string(metrics.path())?;
    let events: Vec<MetricEvent> = text
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    let accuracy_steps: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            MetricEvent::Scalar { tag, step, .. } if tag == "Test/Accuracy" => Some(*step),
            _ => None,
        })
        .collect();
    assert_eq!(accuracy_steps, vec![1, 2, 3]);

    // The last checkpoint restores the trained primary network.
    let (_, path) = epochs[2].checkpoint.clone().unwrap();
    let cfg = NetworkConfig::classifier(NetKind::Cnn, 2).with_input(3, 4);
    let restored = load_network_from_checkpoint::<B, _>(&path, &cfg, &device)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let trained = model.primary.valid();
    let a = head_weights(&restored);
    let b = head_weights(&trained);
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() < 1e-6);
    }
    Ok(())
}
