use log::{debug, info, warn};
use rand::Rng;

use crate::autograd::{Activation, Graph, Scalar};
use crate::config::NetworkConfig;
use crate::error::MlpError;
use crate::snapshot::{LayerSnapshot, NetworkSnapshot, NeuronSnapshot, layer_id};

/// A network input: either a raw number, which becomes a fresh leaf, or a
/// scalar already living in the network's graph, which is used as is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Input {
    Raw(f64),
    Scalar(Scalar),
}

impl From<f64> for Input {
    fn from(value: f64) -> Self {
        Input::Raw(value)
    }
}

impl From<Scalar> for Input {
    fn from(scalar: Scalar) -> Self {
        Input::Scalar(scalar)
    }
}

/// Which parameter an initializer is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    Weight { fan_in: usize },
    Bias,
}

#[derive(Debug)]
pub struct Neuron {
    weights: Vec<Scalar>,
    bias: Scalar,
    activation: Activation,
}

impl Neuron {
    /// Allocates `nin` weights followed by the bias as leaves in `graph`.
    pub fn new<F>(graph: &mut Graph, nin: usize, activation: Activation, init: &mut F) -> Self
    where
        F: FnMut(ParamRole) -> f64,
    {
        let weights = (0..nin)
            .map(|_| graph.leaf(init(ParamRole::Weight { fan_in: nin })))
            .collect();
        let bias = graph.leaf(init(ParamRole::Bias));

        Self {
            weights,
            bias,
            activation,
        }
    }

    /// `activation(sum(w_i * x_i) + b)`; `inputs` must match the weight count
    /// and be live handles of `graph`.
    pub fn forward(&self, graph: &mut Graph, inputs: &[Scalar]) -> Result<Scalar, MlpError> {
        if inputs.len() != self.weights.len() {
            return Err(MlpError::shape(
                self.weights.len(),
                inputs.len(),
                "neuron forward",
            ));
        }
        graph.check(self.bias)?;
        for &x in inputs {
            graph.check(x)?;
        }

        let products: Vec<Scalar> = self
            .weights
            .iter()
            .zip(inputs)
            .map(|(&w, &x)| graph.mul(w, x))
            .collect();
        let weighted = graph.sum(&products);
        let raw = graph.add(weighted, self.bias);

        Ok(graph.activate(raw, self.activation))
    }

    pub fn weights(&self) -> &[Scalar] {
        &self.weights
    }

    pub fn bias(&self) -> Scalar {
        self.bias
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn parameters(&self) -> Vec<Scalar> {
        let mut params = self.weights.clone();
        params.push(self.bias);
        params
    }
}

#[derive(Debug)]
pub struct Layer {
    neurons: Vec<Neuron>,
    nin: usize,
    activation: Activation,
}

impl Layer {
    pub fn new<F>(
        graph: &mut Graph,
        nin: usize,
        nout: usize,
        activation: Activation,
        init: &mut F,
    ) -> Self
    where
        F: FnMut(ParamRole) -> f64,
    {
        let neurons = (0..nout)
            .map(|_| Neuron::new(graph, nin, activation, init))
            .collect();
        Self {
            neurons,
            nin,
            activation,
        }
    }

    pub fn forward(&self, graph: &mut Graph, inputs: &[Scalar]) -> Result<Vec<Scalar>, MlpError> {
        if inputs.len() != self.nin {
            return Err(MlpError::shape(self.nin, inputs.len(), "layer forward"));
        }
        self.neurons
            .iter()
            .map(|n| n.forward(graph, inputs))
            .collect()
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    pub fn nin(&self) -> usize {
        self.nin
    }

    pub fn len(&self) -> usize {
        self.neurons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn parameters(&self) -> Vec<Scalar> {
        self.neurons.iter().flat_map(|n| n.parameters()).collect()
    }
}

/// Multilayer perceptron owning the graph its parameters live in.
///
/// Parameters occupy the front of the arena. Everything a forward pass or a
/// loss builds on top of them is scoped to the current pass and is dropped by
/// [`MLP::release_pass`].
#[derive(Debug)]
pub struct MLP {
    input_size: usize,
    layers: Vec<Layer>,
    activations: Vec<Activation>,
    graph: Graph,
    param_mark: usize,
    layer_outputs: Vec<Vec<Scalar>>,
}

impl MLP {
    pub fn new(config: &NetworkConfig) -> Result<Self, MlpError> {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    /// Weights uniform in `(-s, s)` with `s = sqrt(2 / fan_in)`, biases zero.
    pub fn with_rng<R: Rng>(config: &NetworkConfig, rng: &mut R) -> Result<Self, MlpError> {
        Self::with_initializer(config, |role| match role {
            ParamRole::Weight { fan_in } => {
                let scale = (2.0 / fan_in as f64).sqrt();
                rng.gen_range(-scale..scale)
            }
            ParamRole::Bias => 0.0,
        })
    }

    /// Builds the network, drawing every parameter from `init` in
    /// [`MLP::parameters`] order.
    pub fn with_initializer<F>(config: &NetworkConfig, mut init: F) -> Result<Self, MlpError>
    where
        F: FnMut(ParamRole) -> f64,
    {
        config.validate()?;

        let depth = config.layers.len();
        if config.activations.len() > depth {
            warn!(
                "Ignoring {} activation(s) beyond the {} configured layers",
                config.activations.len() - depth,
                depth
            );
        } else if config.activations.len() < depth {
            warn!(
                "Layers {}..{} have no activation configured, defaulting to tanh",
                config.activations.len(),
                depth
            );
        }
        let activations: Vec<Activation> = (0..depth).map(|i| config.activation(i)).collect();

        let mlp = Self::build(config.input_size, &config.layers, &activations, &mut init);

        info!(
            "Creating MLP with input size {}, layers {:?} and activations {:?}",
            config.input_size, config.layers, activations
        );
        for (i, layer) in mlp.layers.iter().enumerate() {
            debug!(
                "Layer {}: size {}, activation {}",
                i,
                layer.len(),
                layer.activation()
            );
        }

        Ok(mlp)
    }

    fn build<F>(
        input_size: usize,
        widths: &[usize],
        activations: &[Activation],
        init: &mut F,
    ) -> Self
    where
        F: FnMut(ParamRole) -> f64,
    {
        let mut graph = Graph::new();
        let mut nin = input_size;
        let mut layers = Vec::with_capacity(widths.len());
        for (&nout, &activation) in widths.iter().zip(activations) {
            layers.push(Layer::new(&mut graph, nin, nout, activation, init));
            nin = nout;
        }
        let param_mark = graph.mark();

        Self {
            input_size,
            layers,
            activations: activations.to_vec(),
            graph,
            param_mark,
            layer_outputs: Vec::new(),
        }
    }

    /// Runs the inputs through every layer and returns the last layer's outputs.
    ///
    /// Raw numbers become leaves; scalars must already belong to this
    /// network's graph (see [`MLP::graph_mut`]) and are passed through so a
    /// forward pass can be composed into a larger expression.
    ///
    /// A scalar from another graph fails with [`MlpError::ForeignScalar`], one
    /// from a released pass with [`MlpError::StaleScalar`]. Nothing is added to
    /// the graph in either case.
    pub fn forward<T>(&mut self, inputs: &[T]) -> Result<Vec<Scalar>, MlpError>
    where
        T: Copy + Into<Input>,
    {
        if inputs.len() != self.input_size {
            return Err(MlpError::shape(
                self.input_size,
                inputs.len(),
                "network forward",
            ));
        }
        for &x in inputs {
            if let Input::Scalar(scalar) = x.into() {
                self.graph.check(scalar)?;
            }
        }
        self.layer_outputs.clear();

        let mut current: Vec<Scalar> = inputs
            .iter()
            .map(|&x| match x.into() {
                Input::Raw(value) => self.graph.leaf(value),
                Input::Scalar(scalar) => scalar,
            })
            .collect();

        for layer in &self.layers {
            current = layer.forward(&mut self.graph, &current)?;
            self.layer_outputs.push(current.clone());
        }

        Ok(current)
    }

    /// Plain-number evaluation. Drops the previous pass first, so sampling
    /// many points keeps the arena bounded.
    pub fn evaluate(&mut self, inputs: &[f64]) -> Result<Vec<f64>, MlpError> {
        self.release_pass();
        let outputs = self.forward(inputs)?;
        Ok(outputs.iter().map(|&s| self.graph.data(s)).collect())
    }

    /// Drops every non-parameter scalar and the cached layer outputs.
    pub fn release_pass(&mut self) {
        self.graph.release(self.param_mark);
        self.layer_outputs.clear();
    }

    /// Weights then bias per neuron, neurons in order, layers in order.
    pub fn parameters(&self) -> Vec<Scalar> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    pub fn parameter_values(&self) -> Vec<f64> {
        self.parameters()
            .into_iter()
            .map(|p| self.graph.data(p))
            .collect()
    }

    pub fn set_parameter_values(&mut self, values: &[f64]) -> Result<(), MlpError> {
        let params = self.parameters();
        if params.len() != values.len() {
            return Err(MlpError::ParameterCountMismatch {
                expected: params.len(),
                actual: values.len(),
            });
        }
        for (p, &value) in params.into_iter().zip(values) {
            self.graph.set_data(p, value)?;
        }
        Ok(())
    }

    pub fn zero_grad(&mut self) {
        for p in self.parameters() {
            self.graph.set_grad(p, 0.0);
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(self.input_size, Layer::len)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn activations(&self) -> &[Activation] {
        &self.activations
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Per-layer outputs of the most recent forward pass.
    pub fn layer_outputs(&self) -> &[Vec<Scalar>] {
        &self.layer_outputs
    }

    pub fn layer_output_values(&self) -> Vec<Vec<f64>> {
        self.layer_outputs
            .iter()
            .map(|layer| layer.iter().map(|&s| self.graph.data(s)).collect())
            .collect()
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        let layers = self
            .layers
            .iter()
            .enumerate()
            .map(|(i, layer)| LayerSnapshot {
                id: layer_id(i),
                neurons: layer
                    .neurons
                    .iter()
                    .enumerate()
                    .map(|(j, neuron)| {
                        NeuronSnapshot::new(
                            i,
                            j,
                            neuron.weights.iter().map(|&w| self.graph.data(w)).collect(),
                            self.graph.data(neuron.bias),
                            neuron.activation,
                        )
                    })
                    .collect(),
            })
            .collect();

        NetworkSnapshot { layers }
    }

    pub fn to_json(&self) -> Result<String, MlpError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }
}

impl Clone for MLP {
    /// Same topology in a fresh arena with parameter data copied positionally.
    /// Gradients and per-pass scalars are not carried over.
    fn clone(&self) -> Self {
        let mut values = self.parameter_values().into_iter();
        let widths: Vec<usize> = self.layers.iter().map(Layer::len).collect();
        Self::build(
            self.input_size,
            &widths,
            &self.activations,
            &mut |_: ParamRole| values.next().unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn seeded(config: &NetworkConfig, seed: u64) -> MLP {
        MLP::with_rng(config, &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    fn constant(weight: f64, bias: f64) -> impl FnMut(ParamRole) -> f64 {
        move |role| match role {
            ParamRole::Weight { .. } => weight,
            ParamRole::Bias => bias,
        }
    }

    #[test]
    fn test_parameter_count() {
        let mlp = seeded(&NetworkConfig::default(), 0);
        assert_eq!(mlp.parameters().len(), (3 + 1) * 8 + (8 + 1));

        let config = NetworkConfig::new(2, &[4, 4, 1], &[Activation::ReLU]);
        let mlp = seeded(&config, 0);
        assert_eq!(mlp.parameters().len(), 3 * 4 + 5 * 4 + 5);
        assert_eq!(mlp.graph().len(), mlp.parameters().len());
    }

    #[test]
    fn test_single_identity_neuron() {
        let config = NetworkConfig::new(1, &[1], &[Activation::Identity]);
        let mut mlp = MLP::with_initializer(&config, constant(2.0, 0.0)).unwrap();

        let out = mlp.forward(&[3.0]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(mlp.graph().data(out[0]), 6.0);
    }

    #[test]
    fn test_missing_activations_default_to_tanh() {
        let config = NetworkConfig::new(2, &[3, 1], &[Activation::ReLU]);
        let mlp = seeded(&config, 1);
        assert_eq!(mlp.activations(), &[Activation::ReLU, Activation::Tanh]);
        assert_eq!(mlp.layers()[1].activation(), Activation::Tanh);

        let config = NetworkConfig::new(
            2,
            &[1],
            &[Activation::Sigmoid, Activation::ReLU, Activation::ReLU],
        );
        let mlp = seeded(&config, 1);
        assert_eq!(mlp.activations(), &[Activation::Sigmoid]);
    }

    #[test]
    fn test_forward_shape_mismatch() {
        let mut mlp = seeded(&NetworkConfig::new(2, &[2, 1], &[]), 3);
        let err = mlp.forward(&[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            err,
            MlpError::ShapeMismatch { ref expected, ref actual, .. }
                if expected == &vec![2] && actual == &vec![3]
        ));

        let mut graph = Graph::new();
        let neuron = Neuron::new(&mut graph, 3, Activation::Tanh, &mut constant(1.0, 0.0));
        let x = graph.leaf(1.0);
        assert!(matches!(
            neuron.forward(&mut graph, &[x]),
            Err(MlpError::ShapeMismatch { .. })
        ));

        let layer = Layer::new(&mut graph, 2, 4, Activation::ReLU, &mut constant(1.0, 0.0));
        assert!(matches!(
            layer.forward(&mut graph, &[x]),
            Err(MlpError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_layer_preserves_neuron_order() {
        let mut graph = Graph::new();
        let mut next = 0.0;
        let mut init = |role: ParamRole| match role {
            ParamRole::Weight { .. } => {
                next += 1.0;
                next
            }
            ParamRole::Bias => 0.0,
        };
        let layer = Layer::new(&mut graph, 1, 3, Activation::Identity, &mut init);
        let x = graph.leaf(2.0);
        let out = layer.forward(&mut graph, &[x]).unwrap();
        let values: Vec<f64> = out.iter().map(|&s| graph.data(s)).collect();
        assert_eq!(values, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_forward_passes_scalars_through() {
        let config = NetworkConfig::new(2, &[1], &[Activation::Identity]);
        let mut mlp = MLP::with_initializer(&config, constant(2.0, 0.5)).unwrap();

        let s = mlp.graph_mut().leaf(3.0);
        let before = mlp.graph().len();
        let out = mlp.forward(&[Input::Raw(1.0), Input::Scalar(s)]).unwrap();
        // one new leaf for the raw input, two products, their sum, bias add, activation
        assert_eq!(mlp.graph().len() - before, 6);
        assert_eq!(mlp.graph().data(out[0]), 2.0 * 1.0 + 2.0 * 3.0 + 0.5);

        let graph = mlp.graph_mut();
        let loss = graph.pow(out[0], 2.0);
        graph.backward(loss);
        assert_eq!(graph.grad(s), 2.0 * 8.5 * 2.0);
    }

    #[test]
    fn test_forward_rejects_scalar_from_another_network() {
        let config = NetworkConfig::new(1, &[1], &[Activation::Identity]);
        let mut a = MLP::with_initializer(&config, constant(2.0, 0.0)).unwrap();
        let mut b = a.clone();
        assert_eq!(a.forward(&[7.0]).unwrap().len(), 1);

        let foreign = b.graph_mut().leaf(100.0);
        let before = a.graph().len();
        let result = a.forward(&[Input::Scalar(foreign)]);
        assert!(matches!(result, Err(MlpError::ForeignScalar { .. })));
        assert_eq!(a.graph().len(), before);

        // the same value works once it lives in the right graph
        let own = a.graph_mut().leaf(100.0);
        let out = a.forward(&[Input::Scalar(own)]).unwrap();
        assert_eq!(a.graph().data(out[0]), 200.0);
    }

    #[test]
    fn test_forward_rejects_released_scalar() {
        let config = NetworkConfig::new(1, &[1], &[Activation::Identity]);
        let mut mlp = MLP::with_initializer(&config, constant(2.0, 0.0)).unwrap();

        let s = mlp.graph_mut().leaf(3.0);
        mlp.release_pass();
        let before = mlp.graph().len();
        let result = mlp.forward(&[Input::Scalar(s)]);
        assert!(matches!(result, Err(MlpError::StaleScalar { .. })));
        assert_eq!(mlp.graph().len(), before);
    }

    #[test]
    fn test_layer_outputs_cached_per_forward() {
        let config = NetworkConfig::new(2, &[3, 2], &[Activation::Tanh, Activation::Identity]);
        let mut mlp = seeded(&config, 5);

        let out = mlp.forward(&[0.5, -1.0]).unwrap();
        assert_eq!(mlp.layer_outputs().len(), 2);
        assert_eq!(mlp.layer_outputs()[0].len(), 3);
        assert_eq!(mlp.layer_outputs()[1], out);

        mlp.forward(&[1.0, 1.0]).unwrap();
        let values = mlp.layer_output_values();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1], mlp.evaluate(&[1.0, 1.0]).unwrap());

        mlp.release_pass();
        assert!(mlp.layer_outputs().is_empty());
        assert_eq!(mlp.graph().len(), mlp.parameters().len());
    }

    #[test]
    fn test_evaluate_keeps_graph_bounded() {
        let mut mlp = seeded(&NetworkConfig::default(), 9);
        mlp.evaluate(&[0.1, 0.2, 0.3]).unwrap();
        let len = mlp.graph().len();
        for i in 0..10 {
            let x = i as f64 / 10.0;
            mlp.evaluate(&[x, x, x]).unwrap();
            assert_eq!(mlp.graph().len(), len);
        }
    }

    #[test]
    fn test_zero_grad_then_backward_matches_pristine() {
        let config = NetworkConfig::new(2, &[4, 1], &[Activation::Tanh, Activation::Identity]);
        let mut mlp = seeded(&config, 11);
        let mut pristine = mlp.clone();

        let square_output = |mlp: &mut MLP, x: &[f64]| {
            let out = mlp.forward(x).unwrap();
            let graph = mlp.graph_mut();
            let loss = graph.pow(out[0], 2.0);
            graph.backward(loss);
        };

        square_output(&mut mlp, &[0.3, -0.8]);
        square_output(&mut mlp, &[0.3, -0.8]);
        mlp.zero_grad();
        mlp.release_pass();
        square_output(&mut mlp, &[0.3, -0.8]);

        square_output(&mut pristine, &[0.3, -0.8]);

        let grads = |mlp: &MLP| -> Vec<f64> {
            mlp.parameters().iter().map(|&p| mlp.graph().grad(p)).collect()
        };
        assert_eq!(grads(&mlp), grads(&pristine));
    }

    #[test]
    fn test_clone_matches_and_does_not_alias() {
        let config = NetworkConfig::new(3, &[5, 2], &[Activation::Sigmoid, Activation::Tanh]);
        let mut source = seeded(&config, 21);

        let out = source.forward(&[0.2, 0.4, -0.6]).unwrap();
        let graph = source.graph_mut();
        let loss = graph.add(out[0], out[1]);
        graph.backward(loss);

        let mut copy = source.clone();
        assert_eq!(copy.parameter_values(), source.parameter_values());
        assert!(copy.parameters().iter().all(|&p| copy.graph().grad(p) == 0.0));
        assert!(copy.layer_outputs().is_empty());
        assert_eq!(
            copy.evaluate(&[0.2, 0.4, -0.6]).unwrap(),
            source.evaluate(&[0.2, 0.4, -0.6]).unwrap()
        );

        let before = copy.parameter_values();
        let shifted: Vec<f64> = source.parameter_values().iter().map(|v| v + 1.0).collect();
        source.set_parameter_values(&shifted).unwrap();
        assert_eq!(copy.parameter_values(), before);
        assert_ne!(
            copy.evaluate(&[0.2, 0.4, -0.6]).unwrap(),
            source.evaluate(&[0.2, 0.4, -0.6]).unwrap()
        );
    }

    #[test]
    fn test_set_parameter_values_checks_length() {
        let mut mlp = seeded(&NetworkConfig::new(1, &[2], &[]), 2);
        assert!(matches!(
            mlp.set_parameter_values(&[1.0, 2.0]),
            Err(MlpError::ParameterCountMismatch {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_snapshot_mirrors_topology_and_values() {
        let config = NetworkConfig::new(2, &[3, 1], &[Activation::Tanh, Activation::Identity]);
        let mut mlp = seeded(&config, 4);
        let values: Vec<f64> = (0..mlp.parameters().len()).map(|i| i as f64 * 0.5).collect();
        mlp.set_parameter_values(&values).unwrap();

        let snapshot = mlp.snapshot();
        assert_eq!(snapshot.layers.len(), 2);
        assert_eq!(snapshot.neuron_count(), 4);
        assert_eq!(snapshot.layers[0].id, "layer_0");
        assert_eq!(snapshot.layers[0].neurons.len(), 3);
        assert_eq!(snapshot.layers[1].neurons.len(), 1);

        let first = &snapshot.layers[0].neurons[0];
        assert_eq!(first.id, "neuron_0_0");
        assert_eq!(first.weights, vec![0.0, 0.5]);
        assert_eq!(first.bias, 1.0);
        assert_eq!(first.activation, Activation::Tanh);
        assert_eq!(first.name, "tanh");

        let last = &snapshot.layers[1].neurons[0];
        assert_eq!(last.id, "neuron_1_0");
        assert_eq!(last.weights, vec![4.5, 5.0, 5.5]);
        assert_eq!(last.bias, 6.0);
        assert_eq!(last.name, "identity");

        let flattened: Vec<f64> = snapshot
            .layers
            .iter()
            .flat_map(|l| l.neurons.iter())
            .flat_map(|n| n.weights.iter().copied().chain(std::iter::once(n.bias)))
            .collect();
        assert_eq!(flattened, values);
    }

    #[test]
    fn test_to_json_round_trips() {
        let mut mlp = seeded(&NetworkConfig::new(1, &[2, 1], &[Activation::ReLU]), 8);
        let values: Vec<f64> = (0..mlp.parameters().len()).map(|i| i as f64 * 0.25 - 1.0).collect();
        mlp.set_parameter_values(&values).unwrap();
        let json = mlp.to_json().unwrap();
        assert!(json.contains(r#""id":"neuron_0_1""#));
        assert!(json.contains(r#""activation":"relu","name":"relu""#));

        let parsed: NetworkSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, mlp.snapshot());
    }
}
