//! Loss composition for the primary and weighting networks.
//!
//! Gradient routing is done with `detach`:
//! - the primary loss sees the weights as constants, so it only trains the classifier;
//! - the adversarial loss sees the per-sample losses as constants, so it only trains the
//!   weighting network.

use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Scale applied to the normalized adversarial objective.
pub const ADVERSARIAL_SCALE: f64 = 10.0;

/// Lower bound on the mean loss used as the adversarial denominator.
pub const R_LOSS_EPSILON: f64 = 1e-8;

/// Unreduced cross entropy: `loss[i] = -log softmax(logits[i])[labels[i]]`.
pub fn per_sample_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    labels: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let [batch, _] = logits.dims();
    let log_probs = log_softmax(logits, 1);
    log_probs
        .gather(1, labels.reshape([batch, 1]))
        .reshape([batch])
        .neg()
}

/// `mean(alpha * loss * detach(weights) + (1 - alpha) * loss)`.
pub fn primary_loss<B: Backend>(
    loss: Tensor<B, 1>,
    weights: Tensor<B, 1>,
    alpha: f64,
) -> Tensor<B, 1> {
    let weighted = (loss.clone() * weights.detach()).mul_scalar(alpha);
    let plain = loss.mul_scalar(1.0 - alpha);
    (weighted + plain).mean()
}

/// `-10 * (mean(detach(loss) * weights) - r_loss) / max(r_loss, eps)` with `r_loss` detached.
pub fn adversarial_loss<B: Backend>(
    loss: Tensor<B, 1>,
    weights: Tensor<B, 1>,
    r_loss: Tensor<B, 1>,
) -> Tensor<B, 1> {
    let r_loss = r_loss.detach();
    let denom = r_loss.clone().clamp_min(R_LOSS_EPSILON);
    let weighted = (loss.detach() * weights).mean();
    ((weighted - r_loss) / denom).mul_scalar(-ADVERSARIAL_SCALE)
}
