use crate::error::{IntegrationFailure, Result, ShootingError};
use crate::solvers::IntegrationMethod;
use crate::traits::{constant, Scalar, Steppable, VectorField};
use serde::{Deserialize, Serialize};

/// Produces the states of an initial-value problem at requested times.
pub trait Integrator: Sync {
    /// Integrates `field` from `initial_state` at `times[0]` and returns one
    /// state per entry of `times`, the first being `initial_state` itself.
    fn integrate<F: VectorField, T: Scalar>(
        &self,
        field: &F,
        params: &[T],
        initial_state: &[T],
        times: &[f64],
    ) -> std::result::Result<Vec<Vec<T>>, IntegrationFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegratorSettings {
    pub method: IntegrationMethod,
    /// Largest internal step. Each span between requested times is split
    /// into the fewest equal steps not exceeding this.
    pub max_dt: f64,
    /// Budget of internal steps for one solve.
    pub max_steps: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            method: IntegrationMethod::Tsit5,
            max_dt: 0.05,
            max_steps: 100_000,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_dt.is_finite() && self.max_dt > 0.0) {
            return Err(ShootingError::invalid("max_dt must be positive and finite"));
        }
        if self.max_steps == 0 {
            return Err(ShootingError::invalid("max_steps must be greater than zero"));
        }
        Ok(())
    }
}

/// Fixed-step explicit Runge-Kutta integration with a step budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedStepIntegrator {
    settings: IntegratorSettings,
}

impl FixedStepIntegrator {
    pub fn new(settings: IntegratorSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }
}

impl Integrator for FixedStepIntegrator {
    fn integrate<F: VectorField, T: Scalar>(
        &self,
        field: &F,
        params: &[T],
        initial_state: &[T],
        times: &[f64],
    ) -> std::result::Result<Vec<Vec<T>>, IntegrationFailure> {
        let Some(&t0) = times.first() else {
            return Ok(Vec::new());
        };
        if !all_finite(initial_state) {
            return Err(IntegrationFailure::NonFinite { time: t0 });
        }

        let mut stepper = self.settings.method.stepper::<T>(initial_state.len());
        let mut state = initial_state.to_vec();
        let mut trajectory = Vec::with_capacity(times.len());
        trajectory.push(state.clone());
        let mut steps_taken = 0usize;

        for span in times.windows(2) {
            let (start, end) = (span[0], span[1]);
            let substeps = ((end - start) / self.settings.max_dt).ceil().max(1.0);
            let remaining = self.settings.max_steps.saturating_sub(steps_taken);
            if !(substeps <= remaining as f64) {
                return Err(IntegrationFailure::StepLimit {
                    limit: self.settings.max_steps,
                    time: end,
                });
            }
            let substeps = substeps as usize;
            let dt = (end - start) / substeps as f64;

            let mut t = constant::<T>(start);
            for k in 0..substeps {
                stepper.step(field, params, &mut t, &mut state, constant(dt));
                if !all_finite(&state) {
                    return Err(IntegrationFailure::NonFinite {
                        time: start + dt * (k + 1) as f64,
                    });
                }
            }
            steps_taken += substeps;
            trajectory.push(state.clone());
        }

        Ok(trajectory)
    }
}

fn all_finite<T: Scalar>(values: &[T]) -> bool {
    values.iter().all(|v| v.is_finite())
}
