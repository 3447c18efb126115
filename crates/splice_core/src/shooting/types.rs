//! Core types for multiple-shooting evaluation.

use crate::error::IntegrationFailure;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// A contiguous, inclusive range of dataset indices simulated as one
/// independent initial-value problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Group {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl Group {
    /// Number of samples in the group, overlap point included.
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn range(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }
}

/// Simulated states of one group, or the reason it could not be simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPrediction<T> {
    pub group: Group,
    pub outcome: Result<Vec<Vec<T>>, IntegrationFailure>,
    /// Data-fit loss of this group; the failure penalty when it failed.
    pub data_loss: T,
}

impl<T> GroupPrediction<T> {
    pub fn states(&self) -> Option<&[Vec<T>]> {
        self.outcome.as_deref().ok()
    }

    pub fn is_failed(&self) -> bool {
        self.outcome.is_err()
    }
}

/// Element-wise |last(prediction[left]) - first(prediction[left + 1])|.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityResidual<T> {
    pub left: usize,
    pub values: Vec<T>,
}

/// Result of one forward pass: the scalar loss, its parts, and the ordered
/// per-group prediction bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation<T> {
    pub loss: T,
    pub data_loss: T,
    pub continuity_penalty: T,
    pub predictions: Vec<GroupPrediction<T>>,
    /// Residuals of adjacent pairs where both groups were simulated and the
    /// weighted residual stayed finite.
    pub residuals: Vec<ContinuityResidual<T>>,
    /// Pairs charged the failure penalty because their residual overflowed.
    #[serde(default)]
    pub failed_pairs: usize,
}

impl<T: Clone> Evaluation<T> {
    pub fn failed_groups(&self) -> usize {
        self.predictions.iter().filter(|p| p.is_failed()).count()
    }

    /// Reassembles the piecewise predictions into one trajectory over the
    /// whole dataset. Each overlap point is taken from the later group,
    /// which starts from the observed state. `None` if any group failed.
    pub fn stitched(&self) -> Option<Vec<Vec<T>>> {
        let mut trajectory: Vec<Vec<T>> = Vec::new();
        for prediction in &self.predictions {
            let states = prediction.states()?;
            trajectory.pop();
            trajectory.extend(states.iter().cloned());
        }
        Some(trajectory)
    }
}
