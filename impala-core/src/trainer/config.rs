//! Configuration of [`Trainer`](super::Trainer).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Trainer`](super::Trainer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TrainerConfig {
    /// Interval of logging averaged losses in trained samples.
    pub log_interval: usize,

    /// Interval of saving model parameters in trained samples.
    pub save_interval: usize,

    /// Decay of the exponential moving averages of the losses.
    pub average_decay: f32,

    /// Stops training once this number of samples has been trained.
    pub max_samples: Option<usize>,

    /// Where to save the trained model.
    pub model_dir: Option<String>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            log_interval: 10_000,
            save_interval: 1_000_000,
            average_decay: 0.99,
            max_samples: None,
            model_dir: None,
        }
    }
}

impl TrainerConfig {
    /// Sets the interval of logging in trained samples.
    pub fn log_interval(mut self, v: usize) -> Self {
        self.log_interval = v;
        self
    }

    /// Sets the interval of saving in trained samples.
    pub fn save_interval(mut self, v: usize) -> Self {
        self.save_interval = v;
        self
    }

    /// Sets the decay of the loss averages.
    pub fn average_decay(mut self, v: f32) -> Self {
        self.average_decay = v;
        self
    }

    /// Sets the maximum number of trained samples.
    pub fn max_samples(mut self, v: usize) -> Self {
        self.max_samples = Some(v);
        self
    }

    /// Sets the directory where checkpoints are saved.
    pub fn model_dir(mut self, model_dir: impl Into<String>) -> Self {
        self.model_dir = Some(model_dir.into());
        self
    }

    /// Constructs [`TrainerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TrainerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_trainer_config() -> Result<()> {
        let config = TrainerConfig::default()
            .log_interval(100)
            .save_interval(1000)
            .max_samples(5000)
            .model_dir("some/directory");

        let dir = TempDir::new("trainer_config")?;
        let path = dir.path().join("trainer_config.yaml");

        config.save(&path)?;
        let config_ = TrainerConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }
}
