//! Multiple-shooting evaluation.
//!
//! The observed trajectory is split into overlapping groups, every group is
//! simulated from its own observed starting point against one shared
//! parameter snapshot, and a continuity penalty at the overlap points ties
//! the pieces back into one trajectory.

mod continuity;
mod loss;
mod partition;
mod solve;
mod types;

pub use continuity::{continuity_penalty, continuity_residuals};
pub use loss::{aggregate, AggregationWeights, DataFit, FitLoss};
pub use partition::{group_count, partition};
pub use solve::{solve_group, solve_groups};
pub use types::{ContinuityResidual, Evaluation, Group, GroupPrediction};

use crate::autodiff::{self, Objective};
use crate::dataset::Dataset;
use crate::error::{Result, ShootingError};
use crate::integrator::{FixedStepIntegrator, Integrator, IntegratorSettings};
use crate::traits::{real_part, Scalar, VectorField};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Immutable hyperparameters captured when a problem is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShootingConfig {
    /// Samples per group, overlap point included. `group_size == len`
    /// reduces to single shooting.
    pub group_size: usize,
    /// Weight of the continuity penalty.
    pub continuity_term: f64,
    /// Finite loss charged for a group whose simulation failed.
    pub failure_penalty: f64,
    #[serde(default)]
    pub integrator: IntegratorSettings,
}

impl Default for ShootingConfig {
    fn default() -> Self {
        Self {
            group_size: 3,
            continuity_term: 200.0,
            failure_penalty: 1e10,
            integrator: IntegratorSettings::default(),
        }
    }
}

impl ShootingConfig {
    pub fn validate(&self, len: usize) -> Result<()> {
        group_count(len, self.group_size)?;
        if !(self.continuity_term.is_finite() && self.continuity_term > 0.0) {
            return Err(ShootingError::invalid("continuity_term must be positive and finite"));
        }
        if !(self.failure_penalty.is_finite() && self.failure_penalty > 0.0) {
            return Err(ShootingError::invalid("failure_penalty must be positive and finite"));
        }
        self.integrator.validate()
    }

    fn weights(&self) -> AggregationWeights {
        AggregationWeights {
            continuity_term: self.continuity_term,
            failure_penalty: self.failure_penalty,
        }
    }
}

/// A dataset, a vector field and a configuration, bound together into the
/// pure function `parameters -> (loss, predictions)` an optimizer drives.
pub struct ShootingProblem<F, L = FitLoss, I = FixedStepIntegrator> {
    field: F,
    fit: L,
    integrator: I,
    dataset: Dataset,
    config: ShootingConfig,
}

impl<F: VectorField, L: DataFit> ShootingProblem<F, L, FixedStepIntegrator> {
    /// Builds a problem integrated with `config.integrator`.
    pub fn new(field: F, dataset: Dataset, fit: L, config: ShootingConfig) -> Result<Self> {
        let integrator = FixedStepIntegrator::new(config.integrator)?;
        Self::with_integrator(field, integrator, dataset, fit, config)
    }

    /// The same problem fitted in one group over the whole dataset.
    pub fn single_shooting(field: F, dataset: Dataset, fit: L, config: ShootingConfig) -> Result<Self> {
        let config = ShootingConfig {
            group_size: dataset.len(),
            ..config
        };
        Self::new(field, dataset, fit, config)
    }
}

impl<F: VectorField, L: DataFit, I: Integrator> ShootingProblem<F, L, I> {
    pub fn with_integrator(
        field: F,
        integrator: I,
        dataset: Dataset,
        fit: L,
        config: ShootingConfig,
    ) -> Result<Self> {
        config.validate(dataset.len())?;
        if field.dimension() != dataset.dimension() {
            return Err(ShootingError::mismatch(
                "vector field dimension",
                dataset.dimension(),
                field.dimension(),
            ));
        }
        Ok(Self {
            field,
            fit,
            integrator,
            dataset,
            config,
        })
    }

    pub fn field(&self) -> &F {
        &self.field
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn config(&self) -> &ShootingConfig {
        &self.config
    }

    pub fn parameter_count(&self) -> usize {
        self.field.parameter_count()
    }

    /// Groups for the configured size; recomputed on each call.
    pub fn groups(&self) -> Result<Vec<Group>> {
        partition(self.dataset.len(), self.config.group_size)
    }

    /// Forward pass. Pure in `parameters`: evaluating with `Dual` values
    /// propagates derivatives through every group solve and the penalty.
    pub fn evaluate<T: Scalar>(&self, parameters: &[T]) -> Result<Evaluation<T>> {
        let expected = self.field.parameter_count();
        if parameters.len() != expected {
            return Err(ShootingError::mismatch("parameter vector", expected, parameters.len()));
        }

        let groups = self.groups()?;
        let outcomes = solve_groups(&self.field, &self.integrator, &self.dataset, &groups, parameters);
        let evaluation = aggregate(&self.dataset, &groups, outcomes, &self.fit, self.config.weights())?;

        debug!(
            groups = groups.len(),
            failed = evaluation.failed_groups(),
            loss = real_part(evaluation.loss),
            continuity = real_part(evaluation.continuity_penalty),
            "evaluated multiple-shooting loss"
        );
        Ok(evaluation)
    }

    pub fn loss<T: Scalar>(&self, parameters: &[T]) -> Result<T> {
        Ok(self.evaluate(parameters)?.loss)
    }

    /// Loss and its gradient with respect to every parameter.
    pub fn gradient(&self, parameters: &[f64]) -> Result<(f64, Vec<f64>)> {
        autodiff::gradient(self, parameters)
    }
}

impl<F: VectorField, L: DataFit, I: Integrator> Objective for ShootingProblem<F, L, I> {
    fn parameter_count(&self) -> usize {
        self.field.parameter_count()
    }

    fn value<T: Scalar>(&self, params: &[T]) -> Result<T> {
        self.loss(params)
    }

    /// Any failed group or overflowing pair puts the loss at or above one
    /// failure penalty, since every other contribution is non-negative.
    fn failure_threshold(&self) -> Option<f64> {
        Some(self.config.failure_penalty)
    }
}
