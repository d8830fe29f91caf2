//! Joint training of the primary classifier and the adversarial weighting network.

use crate::checkpoint::{apply_checkpoint_policy, CheckpointPolicy, CheckpointSink, CheckpointTag};
use crate::config::Settings;
use crate::loss::{adversarial_loss, per_sample_cross_entropy, primary_loss};
use crate::metrics::MetricsSink;
use crate::schedule::{blend_coefficient, MultiStepLr, WarmupLr};
use burn::module::{AutodiffModule, Module, ParamId};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsAccumulator, GradientsParams, Optimizer, Sgd, SgdConfig};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use burn_dataset::{ImageBatch, ImageLoader};
use models::{build_network, NetKind, Network, NetworkConfig};
use std::marker::PhantomData;
use std::path::PathBuf;

/// Both networks in one module so a single optimizer owns their (disjoint) parameters.
#[derive(Debug, Module)]
pub struct JointModel<B: Backend> {
    pub primary: Network<B>,
    pub weighting: Network<B>,
}

impl<B: Backend> JointModel<B> {
    pub fn new(
        kind: NetKind,
        num_classes: usize,
        in_channels: usize,
        image_size: usize,
        device: &B::Device,
    ) -> Self {
        let primary =
            NetworkConfig::classifier(kind, num_classes).with_input(in_channels, image_size);
        let weighting = NetworkConfig::weighting(kind).with_input(in_channels, image_size);
        Self {
            primary: build_network(&primary, device),
            weighting: build_network(&weighting, device),
        }
    }
}

/// Loss tensors of one batch, still attached to the autodiff graph.
pub struct StepLosses<B: Backend> {
    /// Per-sample cross entropy `[B]`.
    pub loss: Tensor<B, 1>,
    /// Mean cross entropy.
    pub r_loss: Tensor<B, 1>,
    pub main_loss: Tensor<B, 1>,
    pub adv_loss: Tensor<B, 1>,
    /// Weighting-network output flattened to `[B]`.
    pub weights: Tensor<B, 1>,
}

pub fn compose_losses<B: Backend>(
    model: &JointModel<B>,
    batch: &ImageBatch<B>,
    alpha: f64,
) -> StepLosses<B> {
    let logits = model.primary.forward(batch.images.clone());
    let weights = model
        .weighting
        .forward(batch.images.clone())
        .flatten::<1>(0, 1);
    let loss = per_sample_cross_entropy(logits, batch.labels.clone());
    let r_loss = loss.clone().mean();
    let main_loss = primary_loss(loss.clone(), weights.clone(), alpha);
    let adv_loss = adversarial_loss(loss.clone(), weights.clone(), r_loss.clone());
    StepLosses {
        loss,
        r_loss,
        main_loss,
        adv_loss,
        weights,
    }
}

pub type JointOptimizer<B> =
    OptimizerAdaptor<Sgd<<B as AutodiffBackend>::InnerBackend>, JointModel<B>, B>;

/// SGD with momentum and weight decay over both networks.
pub fn joint_optimizer<B: AutodiffBackend>(settings: &Settings) -> JointOptimizer<B> {
    SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(settings.momentum)
                .with_dampening(0.0),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(settings.weight_decay)))
        .init()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub iteration: u64,
    pub alpha: f64,
    pub lr: f64,
    /// Mean per-sample classification loss.
    pub loss: f64,
    pub adv_loss: f64,
    pub grad_norm_weight: Option<f64>,
    pub grad_norm_bias: Option<f64>,
    pub batch_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    /// Mean cross entropy per test sample.
    pub loss: f64,
    pub accuracy: f64,
    pub correct: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: usize,
    pub batches: usize,
    pub mean_loss: f64,
    pub mean_adv_loss: f64,
    pub eval: EvalReport,
    pub checkpoint: Option<(CheckpointTag, PathBuf)>,
}

/// Mutable state of a run, owned by the driver loop.
pub struct TrainerState<B: AutodiffBackend, O: Optimizer<JointModel<B>, B>> {
    pub optim: O,
    pub epoch: usize,
    pub iteration: u64,
    pub optimizer_steps: u64,
    pub best_accuracy: f64,
    pub lr: f64,
    pub warm_epochs: usize,
    pub total_epochs: usize,
    pub batches_per_epoch: usize,
    warmup: WarmupLr,
    decay: MultiStepLr,
    policy: CheckpointPolicy,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend, O: Optimizer<JointModel<B>, B>> TrainerState<B, O> {
    pub fn new(
        optim: O,
        settings: &Settings,
        base_lr: f64,
        warm_epochs: usize,
        batches_per_epoch: usize,
    ) -> Self {
        let warmup = WarmupLr::new(base_lr, batches_per_epoch * warm_epochs);
        Self {
            optim,
            epoch: 0,
            iteration: 0,
            optimizer_steps: 0,
            best_accuracy: 0.0,
            lr: warmup.lr(),
            warm_epochs,
            total_epochs: settings.epochs,
            batches_per_epoch,
            warmup,
            decay: MultiStepLr::new(base_lr, settings.milestones.clone(), settings.gamma),
            policy: CheckpointPolicy {
                best_after: settings.best_after(),
                save_every: settings.save_every,
            },
            _backend: PhantomData,
        }
    }

    /// Enter `epoch` (1-based); past warmup the milestone schedule sets the rate.
    pub fn begin_epoch(&mut self, epoch: usize) {
        debug_assert!(epoch >= 1, "epochs are 1-based");
        self.epoch = epoch;
        if epoch > self.warm_epochs {
            self.lr = self.decay.lr_at(epoch);
        }
    }

    /// One joint update: two backward passes, one optimizer step.
    pub fn train_step(
        &mut self,
        model: JointModel<B>,
        batch: &ImageBatch<B>,
        batch_index: usize,
    ) -> (JointModel<B>, StepReport) {
        if self.epoch <= self.warm_epochs {
            self.lr = self.warmup.step();
        }
        let alpha = blend_coefficient(self.epoch, self.total_epochs);
        let losses = compose_losses(&model, batch, alpha);
        let loss_value = scalar(losses.loss.clone().detach().mean());
        let adv_value = scalar(losses.adv_loss.clone().detach());

        let mut accumulator = GradientsAccumulator::<JointModel<B>>::new();
        let main_grads = GradientsParams::from_grads(losses.main_loss.backward(), &model);
        accumulator.accumulate(&model, main_grads);
        let adv_grads = GradientsParams::from_grads(losses.adv_loss.backward(), &model);
        accumulator.accumulate(&model, adv_grads);
        let grads = accumulator.grads();

        let head = &model.primary.head;
        let grad_norm_weight = grad_norm::<B, 2>(&grads, head.weight.id);
        let grad_norm_bias = head
            .bias
            .as_ref()
            .and_then(|bias| grad_norm::<B, 1>(&grads, bias.id));

        let model = self.optim.step(self.lr, model, grads);
        self.optimizer_steps += 1;
        self.iteration =
            ((self.epoch.saturating_sub(1)) * self.batches_per_epoch + batch_index + 1) as u64;

        let report = StepReport {
            iteration: self.iteration,
            alpha,
            lr: self.lr,
            loss: loss_value,
            adv_loss: adv_value,
            grad_norm_weight,
            grad_norm_bias,
            batch_len: batch.len(),
        };
        (model, report)
    }

    /// Run every training batch of the current epoch, then log parameter histograms.
    pub fn train_epoch(
        &mut self,
        mut model: JointModel<B>,
        loader: &mut ImageLoader,
        device: &B::Device,
        metrics: &mut dyn MetricsSink,
    ) -> anyhow::Result<(JointModel<B>, Vec<StepReport>)> {
        loader.reset();
        let total = loader.num_samples();
        let batch_size = loader.batch_size();
        let mut reports = Vec::with_capacity(loader.len());
        let mut batch_index = 0;
        while let Some(batch) = loader.next_batch::<B>(device)? {
            let (next, report) = self.train_step(model, &batch, batch_index);
            model = next;
            emit_step(metrics, &report)?;
            log::info!(
                "Training Epoch: {} [{}/{}]\tLoss: {:0.4}\tWA: {:0.4}\tLR: {:0.6}",
                self.epoch,
                batch_index * batch_size + report.batch_len,
                total,
                report.loss,
                report.adv_loss,
                report.lr
            );
            reports.push(report);
            batch_index += 1;
        }

        log::debug!(
            "epoch {}: cumulative batch assembly {:?}",
            self.epoch,
            loader.assemble_time()
        );
        for param in model.primary.parameter_snapshots() {
            metrics.add_histogram(&param.tag(), &param.values, self.epoch as u64)?;
        }
        Ok((model, reports))
    }

    /// Apply the checkpoint policy to this epoch's accuracy.
    pub fn checkpoint(
        &mut self,
        model: &JointModel<B>,
        accuracy: f64,
        net_name: &str,
        sink: &mut dyn CheckpointSink<B>,
    ) -> anyhow::Result<Option<(CheckpointTag, PathBuf)>> {
        apply_checkpoint_policy(
            &self.policy,
            &mut self.best_accuracy,
            self.epoch,
            accuracy,
            &model.primary,
            net_name,
            sink,
        )
    }
}

fn emit_step(metrics: &mut dyn MetricsSink, report: &StepReport) -> anyhow::Result<()> {
    let step = report.iteration;
    if let Some(norm) = report.grad_norm_weight {
        metrics.add_scalar("LastLayerGradients/grad_norm2_weights", norm, step)?;
    }
    if let Some(norm) = report.grad_norm_bias {
        metrics.add_scalar("LastLayerGradients/grad_norm2_bias", norm, step)?;
    }
    metrics.add_scalar("Train/loss", report.loss, step)?;
    metrics.add_scalar("Train/adversarial_loss", report.adv_loss, step)?;
    metrics.add_scalar("Train/lr", report.lr, step)?;
    Ok(())
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

fn grad_norm<B: AutodiffBackend, const D: usize>(
    grads: &GradientsParams,
    id: ParamId,
) -> Option<f64> {
    grads
        .get::<B::InnerBackend, D>(id)
        .map(|g| (g.clone() * g).sum().sqrt().into_scalar().elem::<f64>())
}

/// Inference-mode pass of the primary network over the whole test split.
pub fn evaluate<B: Backend>(
    network: &Network<B>,
    loader: &mut ImageLoader,
    device: &B::Device,
) -> anyhow::Result<EvalReport> {
    loader.reset();
    let mut loss_sum = 0.0;
    let mut correct = 0usize;
    let mut total = 0usize;
    while let Some(batch) = loader.next_batch::<B>(device)? {
        let n = batch.len();
        let logits = network.forward(batch.images);
        let preds = logits.clone().argmax(1).reshape([n]);
        let hits = preds
            .equal(batch.labels.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();
        loss_sum += per_sample_cross_entropy(logits, batch.labels)
            .sum()
            .into_scalar()
            .elem::<f64>();
        correct += hits as usize;
        total += n;
    }
    if total == 0 {
        anyhow::bail!("evaluation split is empty");
    }
    Ok(EvalReport {
        loss: loss_sum / total as f64,
        accuracy: correct as f64 / total as f64,
        correct,
        total,
    })
}

/// Train for epochs `1..settings.epochs`, evaluating and checkpointing after each one.
#[allow(clippy::too_many_arguments)]
pub fn run_epochs<B, O>(
    mut model: JointModel<B>,
    state: &mut TrainerState<B, O>,
    train_loader: &mut ImageLoader,
    test_loader: &mut ImageLoader,
    device: &B::Device,
    net_name: &str,
    metrics: &mut dyn MetricsSink,
    checkpoints: &mut dyn CheckpointSink<B>,
) -> anyhow::Result<(JointModel<B>, Vec<EpochReport>)>
where
    B: AutodiffBackend,
    O: Optimizer<JointModel<B>, B>,
{
    let mut epochs = Vec::new();
    for epoch in 1..state.total_epochs {
        state.begin_epoch(epoch);
        let (next, steps) = state.train_epoch(model, train_loader, device, metrics)?;
        model = next;

        let eval = evaluate(&model.primary.valid(), test_loader, device)?;
        log::info!(
            "Test set: Average loss: {:.4}, Accuracy: {:.4}",
            eval.loss,
            eval.accuracy
        );
        metrics.add_scalar("Test/Average loss", eval.loss, epoch as u64)?;
        metrics.add_scalar("Test/Accuracy", eval.accuracy, epoch as u64)?;

        let checkpoint = state.checkpoint(&model, eval.accuracy, net_name, checkpoints)?;
        let batches = steps.len();
        let mean = |f: fn(&StepReport) -> f64| {
            if batches == 0 {
                0.0
            } else {
                steps.iter().map(f).sum::<f64>() / batches as f64
            }
        };
        epochs.push(EpochReport {
            epoch,
            batches,
            mean_loss: mean(|s| s.loss),
            mean_adv_loss: mean(|s| s.adv_loss),
            eval,
            checkpoint,
        });
    }
    Ok((model, epochs))
}
