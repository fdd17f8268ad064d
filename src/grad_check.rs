use thiserror::Error;

use crate::autograd::{Graph, Scalar};

/// Error type specifically for gradient checking failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradCheckError {
    #[error(
        "Gradient check failed for input {input_index}: \
         analytical grad {analytical} != numerical grad {numerical}"
    )]
    GradientMismatch {
        input_index: usize,
        analytical: f64,
        numerical: f64,
    },

    #[error("Gradient for input {input_index} is NaN or infinite")]
    NonFinite { input_index: usize },
}

fn evaluate<F>(build: &F, inputs: &[f64]) -> f64
where
    F: Fn(&mut Graph, &[Scalar]) -> Scalar,
{
    let mut graph = Graph::new();
    let leaves: Vec<Scalar> = inputs.iter().map(|&x| graph.leaf(x)).collect();
    let out = build(&mut graph, &leaves);
    graph.data(out)
}

/// Checks analytical gradients against central finite differences.
///
/// `build` constructs the expression over the given leaves and returns its
/// output. A gradient passes when it is within `tolerance` of the numerical
/// estimate, scaled by the estimate's magnitude when that exceeds 1.
pub fn check_gradients<F>(
    build: F,
    inputs: &[f64],
    epsilon: f64,
    tolerance: f64,
) -> Result<(), GradCheckError>
where
    F: Fn(&mut Graph, &[Scalar]) -> Scalar,
{
    let mut graph = Graph::new();
    let leaves: Vec<Scalar> = inputs.iter().map(|&x| graph.leaf(x)).collect();
    let out = build(&mut graph, &leaves);
    graph.backward(out);

    for (input_index, &leaf) in leaves.iter().enumerate() {
        let analytical = graph.grad(leaf);

        let mut plus = inputs.to_vec();
        plus[input_index] += epsilon;
        let mut minus = inputs.to_vec();
        minus[input_index] -= epsilon;
        let numerical = (evaluate(&build, &plus) - evaluate(&build, &minus)) / (2.0 * epsilon);

        if !analytical.is_finite() || !numerical.is_finite() {
            return Err(GradCheckError::NonFinite { input_index });
        }
        if (analytical - numerical).abs() > tolerance * numerical.abs().max(1.0) {
            return Err(GradCheckError::GradientMismatch {
                input_index,
                analytical,
                numerical,
            });
        }
    }

    Ok(())
}
