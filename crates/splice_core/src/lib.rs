//! The `splice_core` crate trains continuous-time models against sampled
//! trajectories by multiple shooting. Everything numeric is generic over
//! `Scalar`, so the same forward pass runs on `f64` and on Dual numbers for
//! exact gradients.
//!
//! Key components:
//! - **Traits**: `Scalar` (numeric type abstraction), `VectorField` (models), `Steppable` (steppers).
//! - **Shooting**: partitioning, parallel group solves, continuity penalty and loss aggregation.
//! - **Vector fields**: a dense neural field and an equation-engine field.
//! - **Training**: Adam followed by BFGS, with rejection of steps into failing regions.

pub mod autodiff;
pub mod dataset;
pub mod equation_engine;
pub mod error;
pub mod integrator;
pub mod neural;
pub mod shooting;
pub mod solvers;
pub mod traits;
pub mod training;

pub use dataset::Dataset;
pub use error::{IntegrationFailure, ShootingError};
pub use shooting::{Evaluation, ShootingConfig, ShootingProblem};
