use burn::backend::{ndarray::NdArray, Autodiff};
use burn::module::ParamId;
use burn::optim::GradientsParams;
use burn::tensor::ElementConversion;
use burn_dataset::{build_loader, synthetic_dataset, LoaderConfig, Normalization, SyntheticConfig};
use training::trainer::compose_losses;
use training::{JointModel, NetKind};

type B = NdArray<f32>;
type ADBackend = Autodiff<B>;

fn setup() -> (JointModel<ADBackend>, burn_dataset::ImageBatch<ADBackend>) {
    let device = Default::default();
    let dataset = synthetic_dataset(&SyntheticConfig {
        num_classes: 3,
        samples: 6,
        image_size: 4,
        seed: 11,
    });
    let mut loader = build_loader(
        dataset,
        LoaderConfig {
            normalization: Normalization::IDENTITY,
            workers: 1,
            batch_size: 6,
            shuffle: false,
            seed: Some(0),
        },
    )
    .unwrap();
    let batch = loader.next_batch::<ADBackend>(&device).unwrap().unwrap();
    let model = JointModel::<ADBackend>::new(NetKind::Cnn, 3, 3, 4, &device);
    (model, batch)
}

/// L2 norm of a parameter's gradient; an absent gradient counts as zero.
fn norm<const D: usize>(grads: &GradientsParams, id: ParamId) -> f64 {
    grads
        .get::<B, D>(id)
        .map(|g| (g.clone() * g).sum().sqrt().into_scalar().elem::<f64>())
        .unwrap_or(0.0)
}

#[test]
fn primary_loss_only_reaches_primary_network() {
    let (model, batch) = setup();
    let losses = compose_losses(&model, &batch, 0.7);
    let grads = GradientsParams::from_grads(losses.main_loss.backward(), &model);

    assert!(norm::<2>(&grads, model.primary.head.weight.id) > 0.0);
    assert_eq!(norm::<2>(&grads, model.weighting.head.weight.id), 0.0);
    let bias = model.weighting.head.bias.as_ref().unwrap().id;
    assert_eq!(norm::<1>(&grads, bias), 0.0);
}

#[test]
fn adversarial_loss_only_reaches_weighting_network() {
    let (model, batch) = setup();
    let losses = compose_losses(&model, &batch, 0.7);
    let grads = GradientsParams::from_grads(losses.adv_loss.backward(), &model);

    assert!(norm::<2>(&grads, model.weighting.head.weight.id) > 0.0);
    assert_eq!(norm::<2>(&grads, model.primary.head.weight.id), 0.0);
    let bias = model.primary.head.bias.as_ref().unwrap().id;
    assert_eq!(norm::<1>(&grads, bias), 0.0);
}

#[test]
fn weights_and_losses_have_one_entry_per_sample() {
    let (model, batch) = setup();
    let losses = compose_losses(&model, &batch, 0.0);
    assert_eq!(losses.loss.dims(), [6]);
    assert_eq!(losses.weights.dims(), [6]);
    let weights = losses.weights.into_data().to_vec::<f32>().unwrap();
    assert!(weights.iter().all(|w| *w > 0.0 && *w < 1.0));

    // With alpha = 0 the primary loss is exactly the mean loss.
    let main = losses.main_loss.into_scalar().elem::<f64>();
    let r_loss = losses.r_loss.into_scalar().elem::<f64>();
    assert!((main - r_loss).abs() < 1e-6);
}
