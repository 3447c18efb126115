//! Error types shared across the shooting pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by setup and evaluation of a multiple-shooting problem.
///
/// `InvalidConfiguration` and `DimensionMismatch` are fatal and indicate a
/// setup problem. `IntegrationFailure` is reported per group and is absorbed
/// into the loss by the aggregator; it only escapes when a caller solves a
/// group directly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShootingError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("integration failed for group {group}: {source}")]
    IntegrationFailure {
        group: usize,
        #[source]
        source: IntegrationFailure,
    },
}

impl ShootingError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ShootingError::InvalidConfiguration(message.into())
    }

    pub(crate) fn mismatch(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        ShootingError::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}

/// Why a single trajectory solve could not produce usable states.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum IntegrationFailure {
    #[error("state became non-finite at t = {time}")]
    NonFinite { time: f64 },

    #[error("step limit of {limit} exceeded before t = {time}")]
    StepLimit { limit: usize, time: f64 },

    #[error("vector field panicked: {message}")]
    Panicked { message: String },
}

pub type Result<T, E = ShootingError> = std::result::Result<T, E>;
