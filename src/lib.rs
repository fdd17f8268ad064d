//! Scalar reverse-mode autodiff and a small multilayer perceptron built on it.
//!
//! Every value is a [`Scalar`] handle into a [`Graph`] arena. Networks keep
//! their parameters at the front of their own arena; forward passes and losses
//! append to it and are released between training steps.

pub mod autograd;
pub mod config;
pub mod data;
pub mod error;
pub mod grad_check;
pub mod mlp;
pub mod snapshot;
pub mod train;

pub use autograd::{Activation, Graph, Scalar};
pub use config::{AppConfig, NetworkConfig, TrainingConfig};
pub use data::Dataset;
pub use error::MlpError;
pub use mlp::{Input, Layer, MLP, Neuron, ParamRole};
pub use snapshot::{LayerSnapshot, NetworkSnapshot, NeuronSnapshot};
pub use train::{EpochReport, Loss, StepReport, Trainer};
