use super::continuity::{continuity_penalty, continuity_residuals};
use super::types::{Evaluation, Group, GroupPrediction};
use crate::dataset::Dataset;
use crate::error::{IntegrationFailure, Result, ShootingError};
use crate::traits::{constant, real_part, Scalar};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Data-fit comparison between the observed and predicted states of one
/// group. Shapes are checked by the aggregator before `fit` is called.
pub trait DataFit: Sync {
    fn fit<T: Scalar>(&self, observed: &[Vec<f64>], predicted: &[Vec<T>]) -> T;
}

/// Standard element-wise comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FitLoss {
    /// Σ (observed - predicted)²
    #[default]
    SumSquared,
    /// Sum of squares divided by the number of compared components.
    MeanSquared,
    /// Σ |observed - predicted|
    SumAbsolute,
}

impl DataFit for FitLoss {
    fn fit<T: Scalar>(&self, observed: &[Vec<f64>], predicted: &[Vec<T>]) -> T {
        let residuals = observed
            .iter()
            .zip(predicted)
            .flat_map(|(obs, pred)| obs.iter().zip(pred.iter()))
            .map(|(&o, &p)| constant::<T>(o) - p);

        match self {
            FitLoss::SumSquared => residuals.fold(T::zero(), |acc, r| acc + r * r),
            FitLoss::MeanSquared => {
                let (sum, count) = residuals.fold((T::zero(), 0usize), |(acc, n), r| (acc + r * r, n + 1));
                if count == 0 {
                    T::zero()
                } else {
                    sum / constant::<T>(count as f64)
                }
            }
            FitLoss::SumAbsolute => residuals.fold(T::zero(), |acc, r| acc + r.abs()),
        }
    }
}

fn check_shapes<T>(group: &Group, observed: &[Vec<f64>], predicted: &[Vec<T>]) -> Result<()> {
    if observed.len() != predicted.len() {
        return Err(ShootingError::mismatch(
            format!("prediction length of group {}", group.index),
            observed.len(),
            predicted.len(),
        ));
    }
    for (obs, pred) in observed.iter().zip(predicted) {
        if obs.len() != pred.len() {
            return Err(ShootingError::mismatch(
                format!("predicted state of group {}", group.index),
                obs.len(),
                pred.len(),
            ));
        }
    }
    Ok(())
}

/// Weights applied while aggregating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationWeights {
    pub continuity_term: f64,
    pub failure_penalty: f64,
}

/// Combines per-group solve outcomes into the total loss.
///
/// `loss = Σ data_fit(group) + continuity_term × Σ residuals`. A group whose
/// solve failed, or whose data fit is not finite, contributes
/// `failure_penalty` instead and is left out of the continuity pairs; the
/// other groups keep their own contributions. A pair whose weighted residual
/// is not finite is charged `failure_penalty` as well. If the sum still
/// overflows, `loss` saturates to `failure_penalty` per group and pair, so it
/// is always finite. Non-integration errors are fatal and returned as is.
pub fn aggregate<T, L>(
    dataset: &Dataset,
    groups: &[Group],
    outcomes: Vec<Result<Vec<Vec<T>>>>,
    fit: &L,
    weights: AggregationWeights,
) -> Result<Evaluation<T>>
where
    T: Scalar,
    L: DataFit,
{
    if groups.len() != outcomes.len() {
        return Err(ShootingError::mismatch("group outcomes", groups.len(), outcomes.len()));
    }

    let sentinel = constant::<T>(weights.failure_penalty);
    let mut predictions = Vec::with_capacity(groups.len());
    let mut data_loss = T::zero();

    for (group, outcome) in groups.iter().zip(outcomes) {
        let outcome = match outcome {
            Ok(states) => {
                let observed = &dataset.states()[group.range()];
                check_shapes(group, observed, &states)?;
                let group_loss = fit.fit(observed, &states);
                if group_loss.is_finite() {
                    Ok((states, group_loss))
                } else {
                    Err(IntegrationFailure::NonFinite {
                        time: dataset.times()[group.end],
                    })
                }
            }
            Err(ShootingError::IntegrationFailure { source, .. }) => Err(source),
            Err(fatal) => return Err(fatal),
        };

        let prediction = match outcome {
            Ok((states, group_loss)) => GroupPrediction {
                group: *group,
                outcome: Ok(states),
                data_loss: group_loss,
            },
            Err(failure) => {
                warn!(
                    group = group.index,
                    start = group.start,
                    end = group.end,
                    error = %failure,
                    "group solve failed; charging failure penalty"
                );
                GroupPrediction {
                    group: *group,
                    outcome: Err(failure),
                    data_loss: sentinel,
                }
            }
        };
        data_loss = data_loss + prediction.data_loss;
        predictions.push(prediction);
    }

    let mut residuals = Vec::new();
    let mut failed_pairs = 0;
    let mut continuity = T::zero();
    for residual in continuity_residuals(&predictions)? {
        let pair = continuity_penalty(std::slice::from_ref(&residual), weights.continuity_term);
        if pair.is_finite() {
            continuity = continuity + pair;
            residuals.push(residual);
        } else {
            warn!(
                left = residual.left,
                "continuity residual is not finite; charging failure penalty"
            );
            failed_pairs += 1;
            continuity = continuity + sentinel;
        }
    }

    let mut loss = data_loss + continuity;
    if !loss.is_finite() {
        let charged = (predictions.len() + predictions.len().saturating_sub(1)) as f64;
        warn!(
            data_loss = real_part(data_loss),
            continuity = real_part(continuity),
            "total loss overflowed; saturating to failure penalty"
        );
        loss = constant::<T>(weights.failure_penalty * charged);
    }

    Ok(Evaluation {
        loss,
        data_loss,
        continuity_penalty: continuity,
        predictions,
        residuals,
        failed_pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shooting::partition;

    fn dataset() -> Dataset {
        Dataset::new(
            vec![0.0, 1.0, 2.0, 3.0, 4.0],
            vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0], vec![4.0]],
        )
        .unwrap()
    }

    fn weights() -> AggregationWeights {
        AggregationWeights {
            continuity_term: 100.0,
            failure_penalty: 1e10,
        }
    }

    #[test]
    fn fit_losses_compare_components() {
        let observed = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let predicted = vec![vec![1.5, 2.0], vec![2.0, 4.0]];
        assert_eq!(FitLoss::SumSquared.fit(&observed, &predicted), 1.25);
        assert_eq!(FitLoss::MeanSquared.fit(&observed, &predicted), 1.25 / 4.0);
        assert_eq!(FitLoss::SumAbsolute.fit(&observed, &predicted), 1.5);
    }

    #[test]
    fn aggregates_data_fit_and_continuity() {
        let data = dataset();
        let groups = partition(data.len(), 3).unwrap();
        let outcomes: Vec<Result<Vec<Vec<f64>>>> = vec![
            Ok(vec![vec![0.0], vec![1.0], vec![2.5]]),
            Ok(vec![vec![2.0], vec![3.0], vec![4.0]]),
        ];
        let evaluation = aggregate(&data, &groups, outcomes, &FitLoss::SumSquared, weights()).unwrap();
        assert_eq!(evaluation.data_loss, 0.25);
        assert_eq!(evaluation.continuity_penalty, 50.0);
        assert_eq!(evaluation.loss, 50.25);
        assert_eq!(evaluation.predictions[0].data_loss, 0.25);
        assert_eq!(evaluation.predictions[1].data_loss, 0.0);
        assert_eq!(evaluation.residuals.len(), 1);
    }

    #[test]
    fn failed_group_is_charged_the_sentinel() {
        let data = dataset();
        let groups = partition(data.len(), 2).unwrap();
        let outcomes: Vec<Result<Vec<Vec<f64>>>> = vec![
            Ok(vec![vec![0.0], vec![1.5]]),
            Err(ShootingError::IntegrationFailure {
                group: 1,
                source: IntegrationFailure::NonFinite { time: 1.5 },
            }),
            Ok(vec![vec![2.0], vec![3.0]]),
            Ok(vec![vec![3.0], vec![4.5]]),
        ];
        let evaluation = aggregate(&data, &groups, outcomes, &FitLoss::SumSquared, weights()).unwrap();
        assert_eq!(evaluation.failed_groups(), 1);
        assert_eq!(evaluation.predictions[0].data_loss, 0.25);
        assert_eq!(evaluation.predictions[1].data_loss, 1e10);
        assert_eq!(evaluation.predictions[3].data_loss, 0.25);
        // Only the (2, 3) pair is compared and it matches.
        assert_eq!(evaluation.residuals.len(), 1);
        assert_eq!(evaluation.continuity_penalty, 0.0);
        assert_eq!(evaluation.loss, 1e10 + 0.5);
        assert!(evaluation.loss.is_finite());
        assert!(evaluation.stitched().is_none());
    }

    #[test]
    fn non_finite_fit_counts_as_failure() {
        let data = dataset();
        let groups = partition(data.len(), 5).unwrap();
        let outcomes: Vec<Result<Vec<Vec<f64>>>> =
            vec![Ok(vec![vec![0.0], vec![1.0], vec![1e300], vec![3.0], vec![4.0]])];
        let evaluation = aggregate(&data, &groups, outcomes, &FitLoss::SumSquared, weights()).unwrap();
        assert_eq!(evaluation.loss, 1e10);
        assert_eq!(
            evaluation.predictions[0].outcome,
            Err(IntegrationFailure::NonFinite { time: 4.0 })
        );
    }

    #[test]
    fn shape_disagreement_is_fatal() {
        let data = dataset();
        let groups = partition(data.len(), 5).unwrap();
        let short: Vec<Result<Vec<Vec<f64>>>> = vec![Ok(vec![vec![0.0], vec![1.0]])];
        let err = aggregate(&data, &groups, short, &FitLoss::SumSquared, weights()).unwrap_err();
        assert!(matches!(err, ShootingError::DimensionMismatch { expected: 5, actual: 2, .. }));

        let wide: Vec<Result<Vec<Vec<f64>>>> = vec![Ok(vec![vec![0.0, 0.0]; 5])];
        let err = aggregate(&data, &groups, wide, &FitLoss::SumSquared, weights()).unwrap_err();
        assert!(matches!(err, ShootingError::DimensionMismatch { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn overflowing_data_fits_saturate_the_total() {
        let data = dataset();
        let groups = partition(data.len(), 3).unwrap();
        // Each group fits to 1.44e308 on its own; the sum overflows.
        let outcomes: Vec<Result<Vec<Vec<f64>>>> = vec![
            Ok(vec![vec![0.0], vec![1.0], vec![2.0 + 1.2e154]]),
            Ok(vec![vec![2.0], vec![3.0], vec![4.0 + 1.2e154]]),
        ];
        let evaluation = aggregate(&data, &groups, outcomes, &FitLoss::SumSquared, weights()).unwrap();
        assert_eq!(evaluation.failed_groups(), 0);
        assert!(evaluation.predictions[0].data_loss.is_finite());
        assert!(evaluation.predictions[1].data_loss.is_finite());
        assert!(evaluation.loss.is_finite());
        assert_eq!(evaluation.loss, 1e10 * 3.0);
    }

    #[test]
    fn overflowing_continuity_pair_is_charged_the_sentinel() {
        let data = dataset();
        let groups = partition(data.len(), 3).unwrap();
        let outcomes: Vec<Result<Vec<Vec<f64>>>> = vec![
            Ok(vec![vec![0.0], vec![1.0], vec![1e306]]),
            Ok(vec![vec![-1e306], vec![3.0], vec![4.0]]),
        ];
        let evaluation = aggregate(&data, &groups, outcomes, &FitLoss::SumAbsolute, weights()).unwrap();
        assert_eq!(evaluation.failed_groups(), 0);
        assert_eq!(evaluation.failed_pairs, 1);
        assert!(evaluation.residuals.is_empty());
        assert_eq!(evaluation.continuity_penalty, 1e10);
        assert!(evaluation.loss.is_finite());
        assert_eq!(evaluation.loss, evaluation.data_loss + 1e10);
    }

    #[test]
    fn other_errors_propagate() {
        let data = dataset();
        let groups = partition(data.len(), 5).unwrap();
        let outcomes: Vec<Result<Vec<Vec<f64>>>> = vec![Err(ShootingError::invalid("boom"))];
        let err = aggregate(&data, &groups, outcomes, &FitLoss::SumSquared, weights()).unwrap_err();
        assert_eq!(err, ShootingError::invalid("boom"));
    }
}
