use super::types::Group;
use crate::dataset::Dataset;
use crate::error::{IntegrationFailure, Result, ShootingError};
use crate::integrator::Integrator;
use crate::traits::{constant, Scalar, VectorField};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Simulates one group from its own observed initial state.
///
/// The initial condition is the dataset sample at `group.start`, never a
/// neighbouring group's prediction, so groups are independent. A panic in
/// the vector field is contained and reported as an integration failure.
pub fn solve_group<F, I, T>(
    field: &F,
    integrator: &I,
    dataset: &Dataset,
    group: &Group,
    params: &[T],
) -> Result<Vec<Vec<T>>>
where
    F: VectorField,
    I: Integrator,
    T: Scalar,
{
    if group.end >= dataset.len() || group.start >= group.end {
        return Err(ShootingError::invalid(format!(
            "group [{}, {}] does not fit a dataset of {} samples",
            group.start,
            group.end,
            dataset.len()
        )));
    }

    let times = &dataset.times()[group.range()];
    let initial: Vec<T> = dataset.states()[group.start]
        .iter()
        .map(|&v| constant(v))
        .collect();

    panic::catch_unwind(AssertUnwindSafe(|| {
        integrator.integrate(field, params, &initial, times)
    }))
    .unwrap_or_else(|payload| {
        Err(IntegrationFailure::Panicked {
            message: panic_message(payload),
        })
    })
    .map_err(|source| ShootingError::IntegrationFailure {
        group: group.index,
        source,
    })
}

/// Solves every group against the same parameter snapshot, concurrently
/// when the `parallel` feature is on. Outcomes are returned in group order.
pub fn solve_groups<F, I, T>(
    field: &F,
    integrator: &I,
    dataset: &Dataset,
    groups: &[Group],
    params: &[T],
) -> Vec<Result<Vec<Vec<T>>>>
where
    F: VectorField,
    I: Integrator,
    T: Scalar,
{
    let solve = |group: &Group| solve_group(field, integrator, dataset, group, params);

    #[cfg(feature = "parallel")]
    let outcomes = groups.par_iter().map(solve).collect();
    #[cfg(not(feature = "parallel"))]
    let outcomes = groups.iter().map(solve).collect();

    outcomes
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
