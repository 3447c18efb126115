use super::types::{ContinuityResidual, GroupPrediction};
use crate::error::{Result, ShootingError};
use crate::traits::{constant, Scalar};

/// Mismatch at the shared timestamp of every adjacent pair of groups.
///
/// Group `i` ends on the sample where group `i + 1` starts, so its last
/// predicted state and the next group's first predicted state describe the
/// same instant. Pairs with a failed side are skipped; the failed group is
/// already charged the failure penalty.
pub fn continuity_residuals<T: Scalar>(
    predictions: &[GroupPrediction<T>],
) -> Result<Vec<ContinuityResidual<T>>> {
    let mut residuals = Vec::with_capacity(predictions.len().saturating_sub(1));
    for pair in predictions.windows(2) {
        let (Some(left), Some(right)) = (pair[0].states(), pair[1].states()) else {
            continue;
        };
        let (Some(end), Some(start)) = (left.last(), right.first()) else {
            continue;
        };
        if end.len() != start.len() {
            return Err(ShootingError::mismatch(
                format!("overlap between groups {} and {}", pair[0].group.index, pair[1].group.index),
                end.len(),
                start.len(),
            ));
        }
        residuals.push(ContinuityResidual {
            left: pair[0].group.index,
            values: end.iter().zip(start).map(|(&a, &b)| (a - b).abs()).collect(),
        });
    }
    Ok(residuals)
}

/// `continuity_term × Σ` over every component of every residual.
pub fn continuity_penalty<T: Scalar>(residuals: &[ContinuityResidual<T>], continuity_term: f64) -> T {
    let total = residuals
        .iter()
        .flat_map(|r| r.values.iter())
        .fold(T::zero(), |acc, &v| acc + v);
    constant::<T>(continuity_term) * total
}
