use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::autograd::Activation;
use crate::error::MlpError;

/// Network topology: input width, per-layer widths and per-layer activations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub input_size: usize,
    pub layers: Vec<usize>,
    #[serde(default)]
    pub activations: Vec<Activation>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_size: 3,
            layers: vec![8, 1],
            activations: vec![Activation::Tanh, Activation::Identity],
        }
    }
}

impl NetworkConfig {
    pub fn new(input_size: usize, layers: &[usize], activations: &[Activation]) -> Self {
        Self {
            input_size,
            layers: layers.to_vec(),
            activations: activations.to_vec(),
        }
    }

    /// Activation of layer `i`; layers without an entry fall back to tanh.
    pub fn activation(&self, i: usize) -> Activation {
        self.activations.get(i).copied().unwrap_or(Activation::Tanh)
    }

    pub fn validate(&self) -> Result<(), MlpError> {
        if self.input_size == 0 {
            return Err(MlpError::InvalidTopology(
                "input size must be at least 1".to_string(),
            ));
        }
        if self.layers.is_empty() {
            return Err(MlpError::InvalidTopology(
                "network needs at least one layer".to_string(),
            ));
        }
        if let Some(i) = self.layers.iter().position(|&w| w == 0) {
            return Err(MlpError::InvalidTopology(format!("layer {i} has no neurons")));
        }
        Ok(())
    }
}

fn default_shuffle() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            epochs: 1,
            batch_size: 4,
            shuffle: true,
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), MlpError> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(MlpError::InvalidConfig(format!(
                "learning rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(MlpError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub training: TrainingConfig,
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self, MlpError> {
        let config: AppConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MlpError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), MlpError> {
        self.network.validate()?;
        self.training.validate()
    }
}
