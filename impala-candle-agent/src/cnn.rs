//! Convolutional policy/value network.
mod base;
mod config;
pub use base::PolicyValueCnn;
pub use config::PolicyValueCnnConfig;
