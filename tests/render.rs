use ndarray::{Array4, ArrayView4, s};
use rand::{SeedableRng, rngs::StdRng};

use optvis::{
    ActivationGrads, CancelToken, ErrorKind, HostModel, Module, Recorder, RenderOptions,
    RenderSpec, Result, VisErr,
    arch::MiniInception,
    channel, direction, neuron,
    param::{ImageParam, ParamConfig},
    render::OptimizerSpec,
    render_vis,
};

/// Wraps a model and counts its forward passes, optionally cancelling a token once a
/// given number of them ran.
struct Counting {
    inner: MiniInception,
    forwards: usize,
    cancel_after: Option<(usize, CancelToken)>,
}

impl Counting {
    fn new(inner: MiniInception) -> Self {
        Self {
            inner,
            forwards: 0,
            cancel_after: None,
        }
    }
}

impl HostModel for Counting {
    fn modules(&self) -> Vec<Module> {
        self.inner.modules()
    }

    fn input_shape(&self) -> Option<[usize; 3]> {
        self.inner.input_shape()
    }

    fn forward(&mut self, x: ArrayView4<f32>, recorder: &mut Recorder<'_>) -> Result<()> {
        self.forwards += 1;
        if let Some((after, token)) = &self.cancel_after {
            if self.forwards >= *after {
                token.cancel();
            }
        }

        self.inner.forward(x, recorder)
    }

    fn backward(&mut self, grads: &ActivationGrads) -> Result<Array4<f32>> {
        self.inner.backward(grads)
    }
}

fn model(seed: u64) -> MiniInception {
    MiniInception::new(&mut StdRng::seed_from_u64(seed)).unwrap()
}

fn small_param(batch: usize) -> ParamConfig {
    ParamConfig {
        batch,
        width: 16,
        height: 16,
        ..Default::default()
    }
}

fn options(seed: u64) -> RenderOptions {
    RenderOptions::default()
        .with_param(small_param(1))
        .with_seed(seed)
}

fn in_unit_range(image: &Array4<f32>) -> bool {
    image.iter().all(|v| (0. ..=1.).contains(v))
}

#[test]
fn seeded_renders_are_reproducible() {
    let render = |seed| {
        let mut model = model(0);
        let options = options(seed).with_thresholds([3]);
        render_vis(&mut model, "features->mixed3a:3", options).unwrap()
    };

    let a = render(11);
    let b = render(11);
    let c = render(12);

    assert_eq!(a.len(), 1);
    assert_eq!(a[0].shape(), &[1, 16, 16, 3]);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(in_unit_range(&a[0]));
}

#[test]
fn unknown_layer_fails_before_any_forward_pass() {
    let mut model = Counting::new(model(0));

    let err = render_vis(&mut model, channel("nonexistent_layer", 0), options(0)).unwrap_err();

    assert!(matches!(err, VisErr::LayerNotFound { ref layer } if layer == "nonexistent_layer"));
    assert_eq!(err.kind(), ErrorKind::Specification);
    assert_eq!(model.forwards, 0);
}

#[test]
fn partial_batch_is_rejected() {
    let mut model = Counting::new(model(0));
    let options = RenderOptions {
        batch_size: Some(3),
        ..options(0)
    };

    let objective = channel("conv1", 0).with_batch_subset([0, 1]);
    let err = render_vis(&mut model, objective, options).unwrap_err();

    assert!(matches!(err, VisErr::PartialBatch { batch_size: 3, .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Specification);
    assert_eq!(model.forwards, 0);
}

#[test]
fn batch_index_beyond_the_supplied_batch_is_rejected() {
    let mut model = Counting::new(model(0));
    let options = RenderOptions {
        batch_size: Some(2),
        ..options(0)
    };

    let err = render_vis(&mut model, channel("conv1", 0).with_batch(2), options).unwrap_err();

    assert!(matches!(err, VisErr::BatchOutOfRange { index: 2, batch_size: 2 }), "{err}");
    assert_eq!(model.forwards, 0);
}

#[test]
fn untargeted_batch_slots_are_left_alone() {
    let config = small_param(2);
    let initial = ImageParam::new(&config, &mut StdRng::seed_from_u64(9))
        .unwrap()
        .snapshot()
        .unwrap();

    let mut model = model(0);
    let options = options(4)
        .with_param_f(move || ImageParam::new(&config, &mut StdRng::seed_from_u64(9)))
        .with_thresholds([4]);

    let images = render_vis(&mut model, channel("conv1", 1).with_batch(0), options).unwrap();
    let image = &images[0];

    assert_eq!(image.shape(), &[2, 16, 16, 3]);
    assert_ne!(image.slice(s![0, .., .., ..]), initial.slice(s![0, .., .., ..]));
    assert_eq!(image.slice(s![1, .., .., ..]), initial.slice(s![1, .., .., ..]));
}

#[test]
fn batch_size_follows_the_objective() {
    let mut model = model(0);
    let objective = channel("features->mixed3a", 0).with_batch(0)
        + channel("features->mixed3b", 5).with_batch(2);

    let images = render_vis(&mut model, objective, options(1).with_thresholds([1])).unwrap();

    assert_eq!(images.len(), 1);
    assert_eq!(images[0].shape(), &[3, 16, 16, 3]);
}

#[test]
fn one_snapshot_per_threshold() {
    let mut model = Counting::new(model(0));
    let images = render_vis(&mut model, "conv1:2", options(0).with_thresholds([5, 1, 3])).unwrap();

    assert_eq!(images.len(), 3);
    assert_eq!(model.forwards, 5);
    assert!(images.iter().all(in_unit_range));
    assert_ne!(images[0], images[2]);
}

#[test]
fn final_image_only_without_thresholds() {
    let mut model = Counting::new(model(0));
    let options = options(0).with_steps(2).with_thresholds(Vec::new());

    let images = render_vis(&mut model, "conv1:2", options).unwrap();

    assert_eq!(images.len(), 1);
    assert_eq!(model.forwards, 2);
}

#[test]
fn zero_steps_render_nothing() {
    let mut model = Counting::new(model(0));
    let options = options(0).with_steps(0);

    let images = render_vis(&mut model, "conv1:2", options).unwrap();

    assert!(images.is_empty());
    assert_eq!(model.forwards, 0);
}

#[test]
fn thresholds_past_the_last_step_are_ignored() {
    let mut model = Counting::new(model(0));
    let options = options(0).with_steps(4).with_thresholds([2, 50]);

    let images = render_vis(&mut model, "conv1:2", options).unwrap();

    assert_eq!(images.len(), 1);
    assert_eq!(model.forwards, 4);
}

#[test]
fn cancelled_before_starting_returns_the_initial_image() {
    let token = CancelToken::new();
    token.cancel();

    let mut model = Counting::new(model(0));
    let options = options(0).with_thresholds([1, 2]).with_cancel(token);

    let images = render_vis(&mut model, "conv1:2", options).unwrap();

    assert_eq!(images.len(), 1);
    assert_eq!(model.forwards, 0);
}

#[test]
fn cancellation_stops_at_the_next_step_boundary() {
    let token = CancelToken::new();
    let mut model = Counting::new(model(0));
    model.cancel_after = Some((2, token.clone()));

    let options = options(0).with_thresholds([1, 10]).with_cancel(token);
    let images = render_vis(&mut model, "conv1:2", options).unwrap();

    // The checkpoint at step 1, then the image after step 2.
    assert_eq!(model.forwards, 2);
    assert_eq!(images.len(), 2);
    assert_ne!(images[0], images[1]);
}

#[test]
fn transform_producing_the_wrong_size_is_named() {
    let mut model = Counting::new(model(0).with_input_size(8, 8));
    let options = RenderOptions {
        fixed_image_size: Some((10, 10)),
        ..options(0)
    };

    let err = render_vis(&mut model, "conv1:0", options).unwrap_err();

    match &err {
        VisErr::ShapeMismatch {
            stage,
            got,
            expected,
        } => {
            assert_eq!(stage, "resize(10x10)");
            assert_eq!(got, &vec![1, 3, 10, 10]);
            assert_eq!(expected, &vec![1, 3, 8, 8]);
        }
        other => panic!("expected a shape mismatch, got {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::Shape);
    assert_eq!(model.forwards, 0);
}

#[test]
fn model_input_size_is_honored() {
    let mut model = model(0).with_input_size(12, 12);
    let images = render_vis(&mut model, "conv1:0", options(0).with_thresholds([2])).unwrap();

    // Snapshots keep the parameterization's size, only the network sees 12x12.
    assert_eq!(images[0].shape(), &[1, 16, 16, 3]);
}

#[test]
fn diverging_loss_reports_the_step() {
    let mut model = model(0);
    let objective = channel("conv1", 0) / 0.;

    let err = render_vis(&mut model, objective, options(0).with_thresholds([3])).unwrap_err();

    assert!(matches!(err, VisErr::NonFinite { step: 1, what: "loss" }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Numerical);
}

#[test]
fn composite_objectives_render() {
    let mut model = model(0);
    let objective = neuron("features->mixed3a", 2)
        - 0.5 * channel("features->mixed3b", 1)
        + direction("features->mixed3a", vec![1f32, 0., -1., 0., 0.5, 0., 0., 1.]);

    let options = RenderOptions {
        optimizer: OptimizerSpec::GradientDescentWithMomentum {
            learning_rate: 0.5,
            momentum: 0.9,
        },
        ..options(2)
    }
    .with_thresholds([2]);

    let images = render_vis(&mut model, objective, options).unwrap();
    assert!(in_unit_range(&images[0]));
}

#[test]
fn render_from_json_config() {
    let json = r#"{
        "steps": 3,
        "thresholds": [1, 3],
        "seed": 5,
        "preprocess": "none",
        "param": { "width": 8, "height": 8, "decorrelate": false },
        "transforms": [
            { "pad": { "size": 2, "mode": { "constant": { "value": 0.5 } } } },
            { "jitter": { "radius": 1 } },
            { "random_scale": { "factors": [0.9, 1.0, 1.1] } }
        ]
    }"#;

    let run = || {
        let options = RenderSpec::from_json(json).unwrap().into_options().unwrap();
        let mut model = model(3);
        render_vis(&mut model, "features->mixed3b:4", options).unwrap()
    };

    let images = run();
    assert_eq!(images.len(), 2);
    assert!(images.iter().all(|image| image.shape() == [1, 8, 8, 3]));
    assert!(images.iter().all(in_unit_range));
    assert_eq!(images, run());
}

#[test]
fn empty_pipeline_sees_the_raw_image() {
    let mut model = Counting::new(model(0));
    let options = RenderOptions {
        preprocess: None,
        ..options(0)
    }
    .with_transforms(Vec::new())
    .with_thresholds([1]);

    let images = render_vis(&mut model, "conv1:1", options).unwrap();
    assert_eq!(images[0].shape(), &[1, 16, 16, 3]);
    assert_eq!(model.forwards, 1);
}
