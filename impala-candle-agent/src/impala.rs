//! IMPALA learner.
mod base;
mod config;
mod model;
pub use base::Impala;
pub use config::ImpalaConfig;
pub use model::{ImpalaModel, ImpalaModelConfig, MODEL_FILE, OPTIMIZER_FILE};
