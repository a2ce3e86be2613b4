use ndarray::{Array, Array4, ArrayView4, Axis, Dimension, s};

use super::layers::{Conv2d, Relu};
use crate::{ActivationGrads, LayerName, Module, ModuleKind, Recorder, Result, VisErr};

/// Adds the gradient the objective put directly on `name`, if any, to `grad`.
pub(super) fn add_direct<D: Dimension>(
    grad: &mut Array<f32, D>,
    grads: &ActivationGrads,
    name: &LayerName,
) -> Result<()> {
    let Some(direct) = grads.get(name.as_str()) else {
        return Ok(());
    };

    let mismatch = || VisErr::ShapeMismatch {
        stage: format!("gradient of {name}"),
        got: direct.shape().to_vec(),
        expected: grad.shape().to_vec(),
    };

    if direct.shape() != grad.shape() {
        return Err(mismatch());
    }
    let direct = direct
        .view()
        .into_dimensionality::<D>()
        .map_err(|_| mismatch())?;

    *grad += &direct;
    Ok(())
}

/// Parallel convolution branches whose outputs are concatenated along channels and
/// rectified, in the manner of an inception block.
#[derive(Debug, Clone)]
pub struct Block {
    branches: Vec<(&'static str, Conv2d)>,
    relu: Relu,
}

impl Block {
    pub fn new(branches: Vec<(&'static str, Conv2d)>) -> Self {
        Self {
            branches,
            relu: Relu::new(),
        }
    }

    pub fn out_channels(&self) -> usize {
        self.branches.iter().map(|(_, conv)| conv.out_channels()).sum()
    }

    pub fn module(&self, name: &str) -> Module {
        let branches = self.branches.iter().map(|(branch, conv)| {
            Module::new(branch, ModuleKind::Conv).described(conv.to_string())
        });
        let names: Vec<_> = self.branches.iter().map(|(branch, _)| *branch).collect();

        Module::with_children(name, ModuleKind::Block, branches)
            .described(format!("Block([{}]) -> {}", names.join(", "), self.relu))
    }

    pub fn forward(
        &mut self,
        name: &LayerName,
        x: ArrayView4<f32>,
        recorder: &mut Recorder<'_>,
    ) -> Result<Array4<f32>> {
        let mut outputs = Vec::with_capacity(self.branches.len());
        for (branch, conv) in &mut self.branches {
            let y = conv.forward(x)?;
            recorder.record(&name.child(branch), y.view().into_dyn());
            outputs.push(y);
        }

        let views: Vec<_> = outputs.iter().map(|y| y.view()).collect();
        let concat = ndarray::concatenate(Axis(1), &views).map_err(|_| VisErr::ShapeMismatch {
            stage: name.to_string(),
            got: outputs.first().map(|y| y.shape().to_vec()).unwrap_or_default(),
            expected: x.shape().to_vec(),
        })?;

        let y = self.relu.forward(concat.view());
        recorder.record(name, y.view().into_dyn());
        Ok(y)
    }

    pub fn backward(
        &self,
        name: &LayerName,
        grad: ArrayView4<f32>,
        grads: &ActivationGrads,
    ) -> Result<Array4<f32>> {
        let g = self.relu.backward(grad)?;

        let mut gx: Option<Array4<f32>> = None;
        let mut start = 0;
        for (branch, conv) in &self.branches {
            let c = conv.out_channels();
            let mut gb = g.slice(s![.., start..start + c, .., ..]).to_owned();
            add_direct(&mut gb, grads, &name.child(branch))?;

            let gi = conv.backward(gb.view())?;
            gx = Some(match gx {
                Some(acc) => acc + gi,
                None => gi,
            });
            start += c;
        }

        gx.ok_or(VisErr::NotForwarded { layer: "block" })
    }
}
