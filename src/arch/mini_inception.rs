use log::debug;
use ndarray::{Array2, Array4, ArrayView4};
use rand::Rng;

use super::{
    Block,
    block::add_direct,
    layers::{AvgPool2d, Conv2d, GlobalAvgPool, Linear, Relu},
};
use crate::{
    ActivationGrads, HostModel, LayerName, Module, ModuleKind, Recorder, Result, VisErr,
    initialization::{ConstParamGen, ParamGen, RandParamGen},
};

const CONV1: &str = "conv1";
const RELU1: &str = "relu1";
const FEATURES: &str = "features";
const MIXED3A: &str = "features->mixed3a";
const POOL: &str = "features->pool";
const MIXED3B: &str = "features->mixed3b";
const AVGPOOL: &str = "avgpool";
const FC: &str = "fc";

/// A small inception flavoured classifier with frozen weights.
///
/// ```text
/// conv1 (3x3, 3 -> 8) -> relu1
/// features: mixed3a (1x1 | 3x3, 8 -> 8) -> pool (2x2) -> mixed3b (1x1 | 3x3, 8 -> 12)
/// avgpool -> fc (12 -> 10)
/// ```
#[derive(Debug, Clone)]
pub struct MiniInception {
    input_size: Option<(usize, usize)>,
    conv1: Conv2d,
    relu1: Relu,
    mixed3a: Block,
    pool: AvgPool2d,
    mixed3b: Block,
    avgpool: GlobalAvgPool,
    fc: Linear,
}

/// Samples the weights of a layer, given its parameter count and fan in.
pub type WeightGen<'a> = dyn FnMut(usize, usize) -> Result<Vec<f32>> + 'a;

impl MiniInception {
    pub const CHANNELS: usize = 3;
    pub const CLASSES: usize = 10;

    /// Creates a new `MiniInception` with Kaiming initialized weights and small biases.
    pub fn new<R: Rng>(rng: &mut R) -> Result<Self> {
        let net = Self::with_generators(&mut |n, fan_in| {
            Ok(RandParamGen::kaiming(&mut *rng, n, fan_in)?.sample_exact(n))
        })?;

        debug!(classes = Self::CLASSES; "built reference network");
        Ok(net)
    }

    /// Creates a new `MiniInception` drawing every layer's weights from `weights`.
    pub fn with_generators(weights: &mut WeightGen<'_>) -> Result<Self> {
        Self::build(weights, 0.01)
    }

    fn build(weights: &mut WeightGen<'_>, bias: f32) -> Result<Self> {
        let mut conv = |cin: usize, cout: usize, k: usize| -> Result<Conv2d> {
            let mut w = Replay(weights(cin * cout * k * k, cin * k * k)?);
            Conv2d::new(cin, cout, k, &mut w, &mut ConstParamGen::new(bias, cout))
        };

        let conv1 = conv(Self::CHANNELS, 8, 3)?;
        let mut block = |cin: usize, cout: usize| -> Result<Block> {
            Ok(Block::new(vec![
                ("branch1x1", conv(cin, cout, 1)?),
                ("branch3x3", conv(cin, cout, 3)?),
            ]))
        };
        let mixed3a = block(8, 4)?;
        let mixed3b = block(8, 6)?;

        let features = mixed3b.out_channels();
        let mut fc_weights = Replay(weights(features * Self::CLASSES, features)?);
        let fc = Linear::new(
            (features, Self::CLASSES),
            &mut fc_weights,
            &mut ConstParamGen::new(bias, Self::CLASSES),
        )?;

        Ok(Self {
            input_size: None,
            conv1,
            relu1: Relu::new(),
            mixed3a,
            pool: AvgPool2d::new(2),
            mixed3b,
            avgpool: GlobalAvgPool::new(),
            fc,
        })
    }

    /// Declares a fixed input size, so renders resize their images to it.
    pub fn with_input_size(mut self, height: usize, width: usize) -> Self {
        self.input_size = Some((height, width));
        self
    }
}

/// Hands out a pre sampled buffer.
struct Replay(Vec<f32>);

impl ParamGen for Replay {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.0.is_empty() {
            return None;
        }

        let n = n.min(self.0.len());
        Some(self.0.drain(..n).collect())
    }
}

fn record4(recorder: &mut Recorder<'_>, name: &str, y: &Array4<f32>) {
    recorder.record(&LayerName::from(name), y.view().into_dyn());
}

fn record2(recorder: &mut Recorder<'_>, name: &str, y: &Array2<f32>) {
    recorder.record(&LayerName::from(name), y.view().into_dyn());
}

impl HostModel for MiniInception {
    fn modules(&self) -> Vec<Module> {
        vec![
            Module::new(CONV1, ModuleKind::Conv).described(self.conv1.to_string()),
            Module::new(RELU1, ModuleKind::Activation).described(self.relu1.to_string()),
            Module::with_children(
                FEATURES,
                ModuleKind::Sequential,
                [
                    self.mixed3a.module("mixed3a"),
                    Module::new("pool", ModuleKind::Pooling).described(self.pool.to_string()),
                    self.mixed3b.module("mixed3b"),
                ],
            ),
            Module::new(AVGPOOL, ModuleKind::Pooling).described(self.avgpool.to_string()),
            Module::new(FC, ModuleKind::Linear).described(self.fc.to_string()),
        ]
    }

    fn input_shape(&self) -> Option<[usize; 3]> {
        self.input_size.map(|(h, w)| [Self::CHANNELS, h, w])
    }

    fn forward(&mut self, x: ArrayView4<f32>, recorder: &mut Recorder<'_>) -> Result<()> {
        let (b, c, h, w) = x.dim();
        if c != Self::CHANNELS {
            return Err(VisErr::ShapeMismatch {
                stage: CONV1.to_string(),
                got: vec![b, c, h, w],
                expected: vec![b, Self::CHANNELS, h, w],
            });
        }

        let y = self.conv1.forward(x)?;
        record4(recorder, CONV1, &y);

        let y = self.relu1.forward(y.view());
        record4(recorder, RELU1, &y);

        let y = self.mixed3a.forward(&MIXED3A.into(), y.view(), recorder)?;

        let y = self.pool.forward(y.view())?;
        record4(recorder, POOL, &y);

        let y = self.mixed3b.forward(&MIXED3B.into(), y.view(), recorder)?;

        let y = self.avgpool.forward(y.view());
        record2(recorder, AVGPOOL, &y);

        let y = self.fc.forward(y.view())?;
        record2(recorder, FC, &y);

        Ok(())
    }

    fn backward(&mut self, grads: &ActivationGrads) -> Result<Array4<f32>> {
        let fc_dim = self.fc.output_dim().ok_or(VisErr::NotForwarded { layer: FC })?;

        let mut g = Array2::zeros(fc_dim);
        add_direct(&mut g, grads, &FC.into())?;

        let mut g = self.fc.backward(g.view())?;
        add_direct(&mut g, grads, &AVGPOOL.into())?;

        let mut g = self.avgpool.backward(g.view())?;
        add_direct(&mut g, grads, &MIXED3B.into())?;

        let mut g = self.mixed3b.backward(&MIXED3B.into(), g.view(), grads)?;
        add_direct(&mut g, grads, &POOL.into())?;

        let mut g = self.pool.backward(g.view())?;
        add_direct(&mut g, grads, &MIXED3A.into())?;

        let mut g = self.mixed3a.backward(&MIXED3A.into(), g.view(), grads)?;
        add_direct(&mut g, grads, &RELU1.into())?;

        let mut g = self.relu1.backward(g.view())?;
        add_direct(&mut g, grads, &CONV1.into())?;

        self.conv1.backward(g.view())
    }
}
