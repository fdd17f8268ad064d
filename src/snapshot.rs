//! Inert, serializable view of a network's parameters.
//!
//! Snapshots carry plain numbers only: no gradients, no graph handles. They are
//! what a renderer reads between training steps.

use serde::{Deserialize, Serialize};

use crate::autograd::Activation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronSnapshot {
    pub id: String,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub activation: Activation,
    /// Display label; always the activation tag.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSnapshot {
    pub id: String,
    pub neurons: Vec<NeuronSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub layers: Vec<LayerSnapshot>,
}

pub(crate) fn layer_id(layer: usize) -> String {
    format!("layer_{layer}")
}

pub(crate) fn neuron_id(layer: usize, neuron: usize) -> String {
    format!("neuron_{layer}_{neuron}")
}

impl NeuronSnapshot {
    pub(crate) fn new(
        layer: usize,
        neuron: usize,
        weights: Vec<f64>,
        bias: f64,
        activation: Activation,
    ) -> Self {
        Self {
            id: neuron_id(layer, neuron),
            weights,
            bias,
            activation,
            name: activation.to_string(),
        }
    }
}

impl NetworkSnapshot {
    pub fn neuron_count(&self) -> usize {
        self.layers.iter().map(|l| l.neurons.len()).sum()
    }
}
