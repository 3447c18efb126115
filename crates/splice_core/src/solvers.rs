use crate::traits::{constant, Scalar, Steppable, VectorField};
use serde::{Deserialize, Serialize};

/// Butcher tableau of an explicit Runge-Kutta method.
/// `matrix[s]` holds the coefficients a_{s,0..s} of stage `s`.
#[derive(Debug)]
pub struct Tableau {
    pub nodes: &'static [f64],
    pub matrix: &'static [&'static [f64]],
    pub weights: &'static [f64],
}

impl Tableau {
    pub fn stages(&self) -> usize {
        self.weights.len()
    }
}

pub const EULER: Tableau = Tableau {
    nodes: &[0.0],
    matrix: &[&[]],
    weights: &[1.0],
};

/// Classic Runge-Kutta 4th order.
pub const RK4: Tableau = Tableau {
    nodes: &[0.0, 0.5, 0.5, 1.0],
    matrix: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    weights: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
};

/// Tsitouras 5/4, advanced with its 5th order weights at a fixed step.
pub const TSIT5: Tableau = Tableau {
    nodes: &[0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0],
    matrix: &[
        &[],
        &[0.161],
        &[-0.008480655492356989, 0.335480655492357],
        &[2.897153057105493, -6.359448489975075, 4.3622954328695815],
        &[
            5.325864828439257,
            -11.748883564062828,
            7.4955393428898365,
            -0.09249506636175525,
        ],
        &[
            5.86145544294642,
            -12.92096931784711,
            8.159367898576159,
            -0.071584973281401,
            -0.028269050394068383,
        ],
    ],
    weights: &[
        0.09646076681806523,
        0.01,
        0.4798896504144996,
        1.379008574103742,
        -3.290069515436081,
        2.324710524099774,
    ],
};

/// Integration scheme used for every internal step of a group solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationMethod {
    Euler,
    Rk4,
    Tsit5,
}

impl IntegrationMethod {
    pub fn tableau(self) -> &'static Tableau {
        match self {
            IntegrationMethod::Euler => &EULER,
            IntegrationMethod::Rk4 => &RK4,
            IntegrationMethod::Tsit5 => &TSIT5,
        }
    }

    pub fn stepper<T: Scalar>(self, dim: usize) -> ExplicitRk<T> {
        ExplicitRk::new(self.tableau(), dim)
    }
}

/// Fixed-step explicit Runge-Kutta stepper over an arbitrary tableau.
/// Stage buffers are allocated once and reused across steps.
pub struct ExplicitRk<T: Scalar> {
    tableau: &'static Tableau,
    stages: Vec<Vec<T>>,
    tmp: Vec<T>,
}

impl<T: Scalar> ExplicitRk<T> {
    pub fn new(tableau: &'static Tableau, dim: usize) -> Self {
        Self {
            tableau,
            stages: vec![vec![T::zero(); dim]; tableau.stages()],
            tmp: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for ExplicitRk<T> {
    fn step<F: VectorField>(
        &mut self,
        field: &F,
        params: &[T],
        t: &mut T,
        state: &mut [T],
        dt: T,
    ) {
        let t0 = *t;
        let tableau = self.tableau;

        for s in 0..tableau.stages() {
            // tmp = y + dt * Σ_j a_{s,j} k_j
            for i in 0..state.len() {
                let mut acc = T::zero();
                for (j, &a) in tableau.matrix[s].iter().enumerate() {
                    if a != 0.0 {
                        acc = acc + constant::<T>(a) * self.stages[j][i];
                    }
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            let stage_time = t0 + dt * constant::<T>(tableau.nodes[s]);
            field.apply(stage_time, &self.tmp, params, &mut self.stages[s]);
        }

        for i in 0..state.len() {
            let mut acc = T::zero();
            for (s, &b) in tableau.weights.iter().enumerate() {
                acc = acc + constant::<T>(b) * self.stages[s][i];
            }
            state[i] = state[i] + dt * acc;
        }

        *t = t0 + dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Dual;

    /// dx/dt = -k x
    struct Decay;

    impl VectorField for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn parameter_count(&self) -> usize {
            1
        }

        fn apply<T: Scalar>(&self, _t: T, x: &[T], params: &[T], out: &mut [T]) {
            out[0] = -params[0] * x[0];
        }
    }

    /// dx/dt = t, exercises the stage times.
    struct Ramp;

    impl VectorField for Ramp {
        fn dimension(&self) -> usize {
            1
        }

        fn parameter_count(&self) -> usize {
            0
        }

        fn apply<T: Scalar>(&self, t: T, _x: &[T], _params: &[T], out: &mut [T]) {
            out[0] = t;
        }
    }

    fn integrate(method: IntegrationMethod, steps: usize, dt: f64) -> f64 {
        let mut stepper = method.stepper::<f64>(1);
        let mut t = 0.0;
        let mut state = vec![1.0];
        for _ in 0..steps {
            stepper.step(&Decay, &[1.0], &mut t, &mut state, dt);
        }
        state[0]
    }

    #[test]
    fn tableau_rows_are_consistent() {
        for method in [
            IntegrationMethod::Euler,
            IntegrationMethod::Rk4,
            IntegrationMethod::Tsit5,
        ] {
            let tableau = method.tableau();
            assert_eq!(tableau.nodes.len(), tableau.stages());
            assert_eq!(tableau.matrix.len(), tableau.stages());
            let weight_sum: f64 = tableau.weights.iter().sum();
            assert!((weight_sum - 1.0).abs() < 1e-12, "{method:?} weights sum to {weight_sum}");
            for (s, row) in tableau.matrix.iter().enumerate() {
                assert_eq!(row.len(), s);
                let row_sum: f64 = row.iter().sum();
                assert!((row_sum - tableau.nodes[s]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn euler_matches_closed_form_step() {
        let x = integrate(IntegrationMethod::Euler, 1, 0.1);
        assert!((x - 0.9).abs() < 1e-15);
    }

    #[test]
    fn higher_order_methods_track_exponential_decay() {
        let exact = (-1.0_f64).exp();
        let rk4 = integrate(IntegrationMethod::Rk4, 10, 0.1);
        let tsit5 = integrate(IntegrationMethod::Tsit5, 10, 0.1);
        let euler = integrate(IntegrationMethod::Euler, 10, 0.1);
        assert!((rk4 - exact).abs() < 1e-6);
        assert!((tsit5 - exact).abs() < 1e-6);
        assert!((euler - exact).abs() > (rk4 - exact).abs());
    }

    #[test]
    fn rk4_integrates_time_dependent_field_exactly() {
        let mut stepper = IntegrationMethod::Rk4.stepper::<f64>(1);
        let mut t = 0.0;
        let mut state = vec![0.0];
        for _ in 0..4 {
            stepper.step(&Ramp, &[], &mut t, &mut state, 0.25);
        }
        assert!((t - 1.0).abs() < 1e-15);
        assert!((state[0] - 0.5).abs() < 1e-14);
    }

    #[test]
    fn dual_step_carries_parameter_sensitivity() {
        // x(h) = exp(-k h); d/dk at k = 1 is -h exp(-h).
        let mut stepper = IntegrationMethod::Rk4.stepper::<Dual>(1);
        let mut t = Dual::new(0.0, 0.0);
        let mut state = vec![Dual::new(1.0, 0.0)];
        let params = [Dual::new(1.0, 1.0)];
        for _ in 0..20 {
            stepper.step(&Decay, &params, &mut t, &mut state, Dual::new(0.05, 0.0));
        }
        let expected = -(-1.0_f64).exp();
        assert!((state[0].eps - expected).abs() < 1e-6);
    }
}
