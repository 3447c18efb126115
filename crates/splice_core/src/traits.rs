use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in trajectory simulation.
/// Must support basic arithmetic, debug printing, conversion from f64, and
/// sharing across the worker threads that solve groups in parallel.
pub trait Scalar: Float + FromPrimitive + Debug + Send + Sync + 'static {}

impl<T: Float + FromPrimitive + Debug + Send + Sync + 'static> Scalar for T {}

/// Lifts an `f64` constant into the scalar type.
/// A value the type cannot represent becomes NaN and is caught by the
/// finiteness checks downstream.
pub fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Real part of a scalar, for logging and step-size bookkeeping.
pub fn real_part<T: Scalar>(value: T) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// A parameterized vector field `dx/dt = f(t, x; p)`.
///
/// The parameters are passed on every call instead of being stored in the
/// field, so a single field can be shared by concurrent solves that all read
/// the same immutable parameter snapshot.
pub trait VectorField: Sync {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Number of trainable parameters the field expects.
    fn parameter_count(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// params: trainable parameters
    /// out: buffer to write dx/dt
    fn apply<T: Scalar>(&self, t: T, x: &[T], params: &[T], out: &mut [T]);
}

/// A trait for steppers that advance a vector field by one step.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    fn step<F: VectorField>(&mut self, field: &F, params: &[T], t: &mut T, state: &mut [T], dt: T);
}
