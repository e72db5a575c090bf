use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`PolicyValueCnn`](super::PolicyValueCnn).
pub struct PolicyValueCnnConfig {
    pub(super) in_channels: usize,
    pub(super) height: usize,
    pub(super) width: usize,
    pub(super) n_actions: usize,
    pub(super) hidden: usize,
    pub(super) negative_slope: f64,
}

impl Default for PolicyValueCnnConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            height: 80,
            width: 80,
            n_actions: 4,
            hidden: 512,
            negative_slope: 0.01,
        }
    }
}

impl PolicyValueCnnConfig {
    /// Sets the shape of input images.
    pub fn in_shape(mut self, in_channels: usize, height: usize, width: usize) -> Self {
        self.in_channels = in_channels;
        self.height = height;
        self.width = width;
        self
    }

    /// Sets the number of actions.
    pub fn n_actions(mut self, v: usize) -> Self {
        self.n_actions = v;
        self
    }

    /// Sets the number of units of the hidden linear layer.
    pub fn hidden(mut self, v: usize) -> Self {
        self.hidden = v;
        self
    }

    /// Sets the negative slope of leaky ReLU.
    pub fn negative_slope(mut self, v: f64) -> Self {
        self.negative_slope = v;
        self
    }

    /// Shape of a single observation, `[channels, height, width]`.
    pub fn obs_shape(&self) -> Vec<usize> {
        vec![self.in_channels, self.height, self.width]
    }

    /// Number of features after the convolutional layers.
    ///
    /// Returns `None` if the input is too small for the kernels.
    pub fn flat_dim(&self) -> Option<usize> {
        let out = |n: usize, k: usize, s: usize| n.checked_sub(k).map(|d| d / s + 1);
        let h = out(self.height, 8, 4).and_then(|h| out(h, 4, 2)).and_then(|h| out(h, 3, 1))?;
        let w = out(self.width, 8, 4).and_then(|w| out(w, 4, 2)).and_then(|w| out(w, 3, 1))?;
        Some(64 * h * w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_dim() {
        assert_eq!(PolicyValueCnnConfig::default().flat_dim(), Some(2304));
        let config = PolicyValueCnnConfig::default().in_shape(1, 84, 84);
        assert_eq!(config.flat_dim(), Some(3136));
        let config = PolicyValueCnnConfig::default().in_shape(3, 20, 20);
        assert_eq!(config.flat_dim(), None);
    }
}
