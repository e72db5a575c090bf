//! A tiny policy/value network with hand-computable outputs.
use crate::model::{PolicyValue, SubModel1};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Init, VarBuilder, VarMap};

/// Logits are `base_logits + offset`, the same for every row; the value of an
/// observation is its first element times `scale`.
///
/// `offset` starts at zero and `scale` at one, so with `base_logits = [ln 3, 0, 0, 0]`
/// action 0 has probability 0.5 and the others 1/6.
pub(crate) struct StubNet {
    base_logits: Tensor,
    offset: Tensor,
    scale: Tensor,
}

pub(crate) fn half_on_first_action() -> Vec<f32> {
    vec![3f32.ln(), 0.0, 0.0, 0.0]
}

pub(crate) fn stub_net(varmap: &VarMap) -> Result<StubNet> {
    let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
    StubNet::build(vb, half_on_first_action())
}

impl SubModel1 for StubNet {
    type Config = Vec<f32>;
    type Input = Tensor;
    type Output = (Tensor, Tensor);

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let n = config.len();
        let base_logits = Tensor::from_vec(config, (1, n), vb.device())?;
        let offset = vb.get_with_hints((1, n), "offset", Init::Const(0.0))?;
        let scale = vb.get_with_hints((1, 1), "scale", Init::Const(1.0))?;
        Ok(Self {
            base_logits,
            offset,
            scale,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let n = xs.dim(0)?;
        let logits = (&self.base_logits + &self.offset)?
            .broadcast_as((n, self.n_actions()))?
            .contiguous()?;
        let v = xs
            .flatten_from(1)?
            .narrow(1, 0, 1)?
            .broadcast_mul(&self.scale)?;
        Ok((logits, v))
    }
}

impl PolicyValue for StubNet {
    fn n_actions(&self) -> usize {
        self.base_logits.dims()[1]
    }
}
