use log::{debug, info, warn};
use ndarray::{ArrayView1, ArrayView2};
use rand::Rng;

use crate::autograd::Scalar;
use crate::config::TrainingConfig;
use crate::data::Dataset;
use crate::error::MlpError;
use crate::mlp::MLP;

/// How per-sample squared errors are combined into one loss scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Loss {
    /// Sum over the batch.
    #[default]
    SquaredError,
    /// Sum over the batch divided by the batch size.
    MeanSquaredError,
}

/// Outcome of one gradient-descent step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Loss of the batch before the update.
    pub loss: f64,
    pub previous: Vec<f64>,
    pub updated: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    /// Sum of per-sample squared errors over the epoch, whatever [`Loss`] the
    /// steps optimised.
    pub total_loss: f64,
    pub batches: usize,
    pub samples: usize,
}

impl EpochReport {
    pub fn mean_loss(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_loss / self.samples as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainingConfig,
    loss: Loss,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self, MlpError> {
        config.validate()?;
        Ok(Self {
            config,
            loss: Loss::default(),
        })
    }

    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// zero_grad, forward every row, backward through the combined loss,
    /// then `p -= learning_rate * grad` for each parameter.
    pub fn step(
        &self,
        mlp: &mut MLP,
        xs: ArrayView2<'_, f64>,
        ys: ArrayView1<'_, f64>,
    ) -> Result<StepReport, MlpError> {
        if xs.nrows() != ys.len() {
            return Err(MlpError::shape(xs.nrows(), ys.len(), "training batch"));
        }
        if ys.is_empty() {
            return Err(MlpError::EmptyBatch);
        }

        mlp.release_pass();
        mlp.zero_grad();

        let mut terms: Vec<Scalar> = Vec::with_capacity(ys.len());
        for (row, &target) in xs.rows().into_iter().zip(ys.iter()) {
            let outputs = mlp.forward(&row.to_vec())?;
            let prediction = match outputs.as_slice() {
                [single] => *single,
                _ => return Err(MlpError::shape(1, outputs.len(), "loss prediction")),
            };

            let graph = mlp.graph_mut();
            let target = graph.leaf(target);
            let diff = graph.sub(prediction, target);
            terms.push(graph.pow(diff, 2.0));
        }

        let graph = mlp.graph_mut();
        let mut loss = graph.sum(&terms);
        if self.loss == Loss::MeanSquaredError {
            let scale = graph.leaf(1.0 / terms.len() as f64);
            loss = graph.mul(loss, scale);
        }
        graph.backward(loss);

        let loss_value = graph.data(loss);
        if !loss_value.is_finite() {
            warn!("Loss is {loss_value}; parameters will be updated with non-finite gradients");
        }
        debug!("step over {} samples, loss = {:.6}", terms.len(), loss_value);

        let previous = mlp.parameter_values();
        let learning_rate = self.config.learning_rate;
        for p in mlp.parameters() {
            let graph = mlp.graph_mut();
            let updated = graph.data(p) - learning_rate * graph.grad(p);
            graph.set_data(p, updated)?;
        }
        let updated = mlp.parameter_values();

        Ok(StepReport {
            loss: loss_value,
            previous,
            updated,
        })
    }

    /// One pass over `data` in batches of `batch_size`.
    pub fn epoch<R: Rng>(
        &self,
        mlp: &mut MLP,
        data: &Dataset,
        epoch: usize,
        rng: &mut R,
    ) -> Result<EpochReport, MlpError> {
        if data.width() != mlp.input_size() {
            return Err(MlpError::shape(mlp.input_size(), data.width(), "dataset width"));
        }

        let batches = data.batches(self.config.batch_size, self.config.shuffle, rng);
        let mut total_loss = 0.0;
        for indices in &batches {
            let (xs, ys) = data.select(indices);
            let report = self.step(mlp, xs.view(), ys.view())?;
            total_loss += match self.loss {
                Loss::SquaredError => report.loss,
                Loss::MeanSquaredError => report.loss * indices.len() as f64,
            };
        }

        Ok(EpochReport {
            epoch,
            total_loss,
            batches: batches.len(),
            samples: data.len(),
        })
    }

    /// Runs the configured number of epochs.
    pub fn fit<R: Rng>(
        &self,
        mlp: &mut MLP,
        data: &Dataset,
        rng: &mut R,
    ) -> Result<Vec<EpochReport>, MlpError> {
        let mut reports = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            let report = self.epoch(mlp, data, epoch, rng)?;
            info!(
                "Epoch {:3} | Loss: {:.6} | Batches: {}",
                epoch,
                report.mean_loss(),
                report.batches
            );
            reports.push(report);
        }
        Ok(reports)
    }
}
