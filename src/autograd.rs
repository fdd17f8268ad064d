use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::MlpError;

/// Nonlinearity applied at the end of a neuron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[serde(alias = "linear")]
    Identity,
    Tanh,
    ReLU,
    Sigmoid,
}

impl Activation {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Identity => x,
            Activation::Tanh => x.tanh(),
            Activation::ReLU => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }

    /// Local derivative at input `x`, given the forward output `y = f(x)`.
    pub fn derivative(self, x: f64, y: f64) -> f64 {
        match self {
            Activation::Identity => 1.0,
            // y = tanh(x) -> dy/dx = 1 - tanh(x)^2
            Activation::Tanh => 1.0 - y * y,
            // y = relu(x) -> dy/dx = 1 if x > 0, 0 otherwise
            Activation::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            // y = sigmoid(x) -> dy/dx = y * (1 - y)
            Activation::Sigmoid => y * (1.0 - y),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activation::Identity => "identity",
            Activation::Tanh => "tanh",
            Activation::ReLU => "relu",
            Activation::Sigmoid => "sigmoid",
        };
        f.write_str(name)
    }
}

static NEXT_GRAPH_ID: AtomicU32 = AtomicU32::new(0);

/// Handle to a node stored in a [`Graph`].
///
/// Handles are plain indices tagged with their owning graph and the
/// generation they were created in, so a handle used on another graph or
/// kept past [`Graph::release`] is caught instead of silently pointing at an
/// unrelated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scalar {
    graph: u32,
    index: usize,
    generation: u32,
}

impl Scalar {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Leaf,
    Add(Scalar, Scalar),
    Mul(Scalar, Scalar),
    Pow { base: Scalar, exponent: f64 },
    Activation { input: Scalar, activation: Activation },
}

impl Op {
    fn operands(&self) -> impl Iterator<Item = Scalar> {
        let (first, second) = match *self {
            Op::Leaf => (None, None),
            Op::Add(lhs, rhs) | Op::Mul(lhs, rhs) => (Some(lhs), Some(rhs)),
            Op::Pow { base, .. } => (Some(base), None),
            Op::Activation { input, .. } => (Some(input), None),
        };
        first.into_iter().chain(second)
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    data: f64,
    grad: f64,
    op: Op,
    generation: u32,
}

/// Arena holding every scalar of a computation graph.
///
/// Operands always live at a lower index than the node built from them, so
/// the stored graph is a DAG by construction.
#[derive(Debug)]
pub struct Graph {
    id: u32,
    nodes: Vec<Node>,
    generation: u32,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            nodes: Vec::new(),
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, data: f64, op: Op) -> Scalar {
        let index = self.nodes.len();
        self.nodes.push(Node {
            data,
            grad: 0.0,
            op,
            generation: self.generation,
        });
        Scalar {
            graph: self.id,
            index,
            generation: self.generation,
        }
    }

    /// Fails when `s` was made by another graph or its pass was released.
    pub fn check(&self, s: Scalar) -> Result<(), MlpError> {
        if s.graph != self.id {
            return Err(MlpError::ForeignScalar { index: s.index });
        }
        match self.nodes.get(s.index) {
            Some(node) if node.generation == s.generation => Ok(()),
            _ => Err(MlpError::StaleScalar { index: s.index }),
        }
    }

    pub fn contains(&self, s: Scalar) -> bool {
        self.check(s).is_ok()
    }

    // accessors treat a bad handle like an out-of-bounds index
    fn node(&self, s: Scalar) -> &Node {
        if let Err(err) = self.check(s) {
            panic!("{err}");
        }
        &self.nodes[s.index]
    }

    fn node_mut(&mut self, s: Scalar) -> &mut Node {
        if let Err(err) = self.check(s) {
            panic!("{err}");
        }
        &mut self.nodes[s.index]
    }

    /// Creates a leaf scalar with zero gradient.
    pub fn leaf(&mut self, data: f64) -> Scalar {
        self.push(data, Op::Leaf)
    }

    pub fn add(&mut self, lhs: Scalar, rhs: Scalar) -> Scalar {
        let data = self.data(lhs) + self.data(rhs);
        self.push(data, Op::Add(lhs, rhs))
    }

    pub fn mul(&mut self, lhs: Scalar, rhs: Scalar) -> Scalar {
        let data = self.data(lhs) * self.data(rhs);
        self.push(data, Op::Mul(lhs, rhs))
    }

    /// Raises `base` to a constant `exponent`.
    pub fn pow(&mut self, base: Scalar, exponent: f64) -> Scalar {
        let data = self.data(base).powf(exponent);
        self.push(data, Op::Pow { base, exponent })
    }

    pub fn activate(&mut self, input: Scalar, activation: Activation) -> Scalar {
        let data = activation.apply(self.data(input));
        self.push(data, Op::Activation { input, activation })
    }

    pub fn tanh(&mut self, input: Scalar) -> Scalar {
        self.activate(input, Activation::Tanh)
    }

    pub fn relu(&mut self, input: Scalar) -> Scalar {
        self.activate(input, Activation::ReLU)
    }

    pub fn sigmoid(&mut self, input: Scalar) -> Scalar {
        self.activate(input, Activation::Sigmoid)
    }

    pub fn neg(&mut self, input: Scalar) -> Scalar {
        let minus_one = self.leaf(-1.0);
        self.mul(input, minus_one)
    }

    pub fn sub(&mut self, lhs: Scalar, rhs: Scalar) -> Scalar {
        let negated = self.neg(rhs);
        self.add(lhs, negated)
    }

    /// Left fold of `add` over `terms`; an empty slice sums to a `0.0` leaf.
    pub fn sum(&mut self, terms: &[Scalar]) -> Scalar {
        match terms.split_first() {
            None => self.leaf(0.0),
            Some((&first, rest)) => rest.iter().fold(first, |acc, &t| self.add(acc, t)),
        }
    }

    pub fn data(&self, s: Scalar) -> f64 {
        self.node(s).data
    }

    pub fn grad(&self, s: Scalar) -> f64 {
        self.node(s).grad
    }

    pub fn is_leaf(&self, s: Scalar) -> bool {
        matches!(self.node(s).op, Op::Leaf)
    }

    /// Overwrites the value of a leaf. Derived scalars are fixed once built.
    pub fn set_data(&mut self, s: Scalar, data: f64) -> Result<(), MlpError> {
        let node = self.node_mut(s);
        if !matches!(node.op, Op::Leaf) {
            return Err(MlpError::DerivedScalarMutation { index: s.index });
        }
        node.data = data;
        Ok(())
    }

    pub fn set_grad(&mut self, s: Scalar, grad: f64) {
        self.node_mut(s).grad = grad;
    }

    /// Current arena length, to be handed back to [`Graph::release`].
    pub fn mark(&self) -> usize {
        self.nodes.len()
    }

    /// Drops every node created after `mark`. Handles to dropped nodes go stale.
    pub fn release(&mut self, mark: usize) {
        if mark < self.nodes.len() {
            self.nodes.truncate(mark);
            self.generation = self.generation.wrapping_add(1);
        }
    }

    // post-order DFS over operand edges; iterative so deep chains don't blow the stack
    fn build_topo(&self, seed: usize) -> Vec<usize> {
        let mut visited = vec![false; self.nodes.len()];
        let mut topo = Vec::new();
        let mut stack = vec![(seed, false)];

        while let Some((index, expanded)) = stack.pop() {
            if expanded {
                topo.push(index);
                continue;
            }
            if visited[index] {
                continue;
            }
            visited[index] = true;
            stack.push((index, true));
            for operand in self.nodes[index].op.operands() {
                if !visited[operand.index] {
                    stack.push((operand.index, false));
                }
            }
        }

        topo
    }

    /// Nodes reachable from `seed`, each listed after all of its operands.
    pub fn topological_order(&self, seed: Scalar) -> Vec<Scalar> {
        self.node(seed);
        self.build_topo(seed.index)
            .into_iter()
            .map(|index| Scalar {
                graph: self.id,
                index,
                generation: self.nodes[index].generation,
            })
            .collect()
    }

    /// Reverse-mode pass seeded at `seed`: sets its gradient to 1 and
    /// accumulates into every scalar it depends on.
    pub fn backward(&mut self, seed: Scalar) {
        self.node_mut(seed).grad = 1.0;
        let topo = self.build_topo(seed.index);
        trace!("backward from #{} over {} nodes", seed.index, topo.len());

        for &index in topo.iter().rev() {
            let Node { data, grad, op, .. } = self.nodes[index];

            match op {
                Op::Leaf => {}
                Op::Add(lhs, rhs) => {
                    // y = a + b -> da = dy, db = dy
                    self.nodes[lhs.index].grad += grad;
                    self.nodes[rhs.index].grad += grad;
                }
                Op::Mul(lhs, rhs) => {
                    // y = a * b -> da = dy * b, db = dy * a
                    let a = self.nodes[lhs.index].data;
                    let b = self.nodes[rhs.index].data;
                    self.nodes[lhs.index].grad += b * grad;
                    self.nodes[rhs.index].grad += a * grad;
                }
                Op::Pow { base, exponent } => {
                    // y = x^n -> dy/dx = n * x^(n-1)
                    let x = self.nodes[base.index].data;
                    self.nodes[base.index].grad += exponent * x.powf(exponent - 1.0) * grad;
                }
                Op::Activation { input, activation } => {
                    let x = self.nodes[input.index].data;
                    self.nodes[input.index].grad += activation.derivative(x, data) * grad;
                }
            }
        }
    }
}
