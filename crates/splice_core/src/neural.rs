//! Dense neural-network vector fields.
//!
//! A `NeuralField` maps the state `x` to `dx/dt` through a stack of fully
//! connected layers. All weights live in one flattened parameter vector so
//! the optimizer and the dual-number gradient see a single `&[T]`.
//!
//! Layout, per layer `l` with `n_in` inputs and `n_out` outputs: the
//! `n_out × n_in` weight matrix in row-major order followed by `n_out` biases.

use crate::error::{Result, ShootingError};
use crate::traits::{Scalar, VectorField};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Hidden-layer nonlinearity. The output layer is always linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    Tanh,
    Relu,
    Softplus,
    Identity,
}

impl Activation {
    fn apply<T: Scalar>(self, z: T) -> T {
        match self {
            Activation::Tanh => z.tanh(),
            Activation::Relu => z.max(T::zero()),
            Activation::Softplus => {
                // ln(1 + e^z) = z + ln(1 + e^-z) keeps e^z from overflowing.
                if z > T::zero() {
                    z + (-z).exp().ln_1p()
                } else {
                    z.exp().ln_1p()
                }
            }
            Activation::Identity => z,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralField {
    /// Layer widths including input and output, e.g. `[2, 16, 16, 2]`.
    widths: Vec<usize>,
    activation: Activation,
}

impl NeuralField {
    pub fn new(widths: Vec<usize>, activation: Activation) -> Result<Self> {
        if widths.len() < 2 {
            return Err(ShootingError::invalid(
                "a neural field needs at least an input and an output layer",
            ));
        }
        if widths.iter().any(|&w| w == 0) {
            return Err(ShootingError::invalid("layer widths must be positive"));
        }
        let (input, output) = (widths[0], widths[widths.len() - 1]);
        if input != output {
            return Err(ShootingError::mismatch("neural field output width", input, output));
        }
        Ok(Self { widths, activation })
    }

    /// Convenience constructor for `depth` hidden layers of equal width.
    pub fn mlp(dimension: usize, hidden: usize, depth: usize, activation: Activation) -> Result<Self> {
        let mut widths = vec![dimension];
        widths.extend(std::iter::repeat(hidden).take(depth));
        widths.push(dimension);
        Self::new(widths, activation)
    }

    pub fn widths(&self) -> &[usize] {
        &self.widths
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Glorot-uniform weights and zero biases from a seeded generator.
    pub fn initial_parameters(&self, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut params = Vec::with_capacity(self.parameter_count());
        for pair in self.widths.windows(2) {
            let (n_in, n_out) = (pair[0], pair[1]);
            let limit = (6.0 / (n_in + n_out) as f64).sqrt();
            for _ in 0..n_in * n_out {
                params.push(rng.gen_range(-limit..limit));
            }
            params.extend(std::iter::repeat(0.0).take(n_out));
        }
        params
    }
}

impl VectorField for NeuralField {
    fn dimension(&self) -> usize {
        self.widths[0]
    }

    fn parameter_count(&self) -> usize {
        self.widths
            .windows(2)
            .map(|pair| pair[0] * pair[1] + pair[1])
            .sum()
    }

    fn apply<T: Scalar>(&self, _t: T, x: &[T], params: &[T], out: &mut [T]) {
        let layers = self.widths.len() - 1;
        let mut input: Vec<T> = x.to_vec();
        let mut offset = 0usize;

        for (layer, pair) in self.widths.windows(2).enumerate() {
            let (n_in, n_out) = (pair[0], pair[1]);
            let weights = &params[offset..offset + n_in * n_out];
            let biases = &params[offset + n_in * n_out..offset + n_in * n_out + n_out];
            offset += n_in * n_out + n_out;

            let last = layer + 1 == layers;
            let output: Vec<T> = (0..n_out)
                .map(|row| {
                    let z = weights[row * n_in..(row + 1) * n_in]
                        .iter()
                        .zip(&input)
                        .fold(biases[row], |acc, (&w, &h)| acc + w * h);
                    if last {
                        z
                    } else {
                        self.activation.apply(z)
                    }
                })
                .collect();
            input = output;
        }

        out.copy_from_slice(&input);
    }
}
