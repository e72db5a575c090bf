//! Interface of neural networks used in the learner.
use anyhow::Result;
use candle_core::Tensor;
use candle_nn::VarBuilder;

/// Neural network model not owing its [`VarMap`] internally.
///
/// [`VarMap`]: candle_nn::VarMap
pub trait SubModel1 {
    /// Configuration from which [`SubModel1`] is constructed.
    type Config;

    /// Input of the [`SubModel1`].
    type Input;

    /// Output of the [`SubModel1`].
    type Output;

    /// Builds [`SubModel1`] with [`VarBuilder`] and [`SubModel1::Config`].
    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self>
    where
        Self: Sized;

    /// A generalized forward function.
    fn forward(&self, input: &Self::Input) -> Result<Self::Output>;
}

/// Policy/value network.
///
/// `forward` maps a batch of observations `(n, *obs_shape)` to the policy
/// logits `(n, n_actions)` and the state values `(n, 1)`.
pub trait PolicyValue: SubModel1<Input = Tensor, Output = (Tensor, Tensor)> {
    /// Number of discrete actions.
    fn n_actions(&self) -> usize;

    /// Shape of a single observation the network was built for.
    ///
    /// `None` if the network accepts any shape.
    fn obs_shape(&self) -> Option<Vec<usize>> {
        None
    }

    /// Returns only the policy logits.
    fn policy_only(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(self.forward(xs)?.0)
    }

    /// Returns only the state values.
    fn value_only(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(self.forward(xs)?.1)
    }
}
