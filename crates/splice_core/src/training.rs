//! Gradient-based training driver.
//!
//! Runs an Adam phase followed by an optional BFGS phase over any
//! [`Objective`]. The driver is incremental: callers can advance it in
//! batches with [`Trainer::run_steps`] and inspect progress in between, or
//! run it to completion with [`train`].

use crate::autodiff::{gradient, Objective};
use anyhow::{bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamSettings {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub iterations: usize,
    /// The phase ends early once rejections push the learning rate below this.
    pub min_learning_rate: f64,
}

impl Default for AdamSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            iterations: 300,
            min_learning_rate: 1e-12,
        }
    }
}

impl AdamSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            bail!("Adam learning_rate must be positive and finite");
        }
        if !(0.0..1.0).contains(&self.beta1) || !(0.0..1.0).contains(&self.beta2) {
            bail!("Adam decay rates must lie in [0, 1)");
        }
        if !(self.epsilon > 0.0) {
            bail!("Adam epsilon must be positive");
        }
        if !(self.min_learning_rate >= 0.0) {
            bail!("Adam min_learning_rate must be non-negative");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BfgsSettings {
    pub iterations: usize,
    /// Converged once the gradient's Euclidean norm drops below this.
    pub gradient_tolerance: f64,
    pub initial_step: f64,
    /// Sufficient-decrease constant of the Armijo condition.
    pub armijo: f64,
    pub backtrack: f64,
    pub max_backtracks: usize,
}

impl Default for BfgsSettings {
    fn default() -> Self {
        Self {
            iterations: 200,
            gradient_tolerance: 1e-8,
            initial_step: 1.0,
            armijo: 1e-4,
            backtrack: 0.5,
            max_backtracks: 40,
        }
    }
}

impl BfgsSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.gradient_tolerance >= 0.0) {
            bail!("BFGS gradient_tolerance must be non-negative");
        }
        if !(self.initial_step.is_finite() && self.initial_step > 0.0) {
            bail!("BFGS initial_step must be positive and finite");
        }
        if !(self.armijo > 0.0 && self.armijo < 1.0) {
            bail!("BFGS armijo constant must lie in (0, 1)");
        }
        if !(self.backtrack > 0.0 && self.backtrack < 1.0) {
            bail!("BFGS backtrack factor must lie in (0, 1)");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingSettings {
    pub adam: AdamSettings,
    /// `None` skips the BFGS refinement.
    #[serde(default)]
    pub bfgs: Option<BfgsSettings>,
    /// Candidate steps whose loss reaches this value are rejected. `None`
    /// takes the objective's failure threshold (the failure penalty of a
    /// shooting problem), so a step into a failing region never replaces a
    /// working parameter vector. Non-finite losses are always rejected.
    #[serde(default)]
    pub rejection_threshold: Option<f64>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            adam: AdamSettings::default(),
            bfgs: Some(BfgsSettings::default()),
            rejection_threshold: None,
        }
    }
}

impl TrainingSettings {
    pub fn validate(&self) -> Result<()> {
        self.adam.validate()?;
        if let Some(bfgs) = &self.bfgs {
            bfgs.validate()?;
        }
        if let Some(threshold) = self.rejection_threshold {
            if !(threshold > 0.0) {
                bail!("rejection_threshold must be positive");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingPhase {
    Adam,
    Bfgs,
    Done,
}

/// Snapshot returned after each batch of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub phase: TrainingPhase,
    pub adam_iterations: usize,
    pub bfgs_iterations: usize,
    pub loss: f64,
    pub learning_rate: f64,
    pub rejected_steps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub parameters: Vec<f64>,
    pub loss: f64,
    /// Loss after every accepted step, starting with the initial loss.
    pub history: Vec<f64>,
    pub adam_iterations: usize,
    pub bfgs_iterations: usize,
    pub rejected_steps: usize,
    /// Whether BFGS met its gradient tolerance.
    pub converged: bool,
}

struct AdamState {
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
    learning_rate: f64,
}

pub struct Trainer<O> {
    objective: O,
    settings: TrainingSettings,
    rejection_threshold: f64,
    params: Vec<f64>,
    loss: f64,
    grad: Vec<f64>,
    phase: TrainingPhase,
    adam: AdamState,
    inverse_hessian: DMatrix<f64>,
    adam_iterations: usize,
    bfgs_iterations: usize,
    rejected_steps: usize,
    converged: bool,
    history: Vec<f64>,
}

impl<O: Objective> Trainer<O> {
    pub fn new(objective: O, initial: Vec<f64>, settings: TrainingSettings) -> Result<Self> {
        settings.validate()?;
        let n = objective.parameter_count();
        if initial.len() != n {
            bail!(
                "initial parameter vector has length {}, objective expects {}",
                initial.len(),
                n
            );
        }
        let rejection_threshold = settings
            .rejection_threshold
            .or_else(|| objective.failure_threshold())
            .unwrap_or(f64::INFINITY);
        let (loss, grad) = gradient(&objective, &initial).context("evaluating initial parameters")?;
        if !loss.is_finite() || loss >= rejection_threshold {
            bail!("initial loss {loss} is not usable (rejection threshold {rejection_threshold})");
        }

        let mut trainer = Self {
            objective,
            settings,
            rejection_threshold,
            params: initial,
            loss,
            grad,
            phase: TrainingPhase::Adam,
            adam: AdamState {
                m: vec![0.0; n],
                v: vec![0.0; n],
                t: 0,
                learning_rate: settings.adam.learning_rate,
            },
            inverse_hessian: DMatrix::identity(n, n),
            adam_iterations: 0,
            bfgs_iterations: 0,
            rejected_steps: 0,
            converged: false,
            history: vec![loss],
        };
        if settings.adam.iterations == 0 {
            trainer.finish_adam();
        }
        info!(parameters = n, loss, "training started");
        Ok(trainer)
    }

    pub fn objective(&self) -> &O {
        &self.objective
    }

    pub fn parameters(&self) -> &[f64] {
        &self.params
    }

    pub fn loss(&self) -> f64 {
        self.loss
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn rejection_threshold(&self) -> f64 {
        self.rejection_threshold
    }

    pub fn learning_rate(&self) -> f64 {
        self.adam.learning_rate
    }

    pub fn is_done(&self) -> bool {
        self.phase == TrainingPhase::Done
    }

    /// Advances by one optimizer iteration. Does nothing once done.
    pub fn step(&mut self) -> Result<()> {
        match self.phase {
            TrainingPhase::Adam => self.adam_step(),
            TrainingPhase::Bfgs => self.bfgs_step(),
            TrainingPhase::Done => Ok(()),
        }
    }

    pub fn run_steps(&mut self, batch_size: usize) -> Result<TrainingProgress> {
        for _ in 0..batch_size {
            if self.is_done() {
                break;
            }
            self.step()?;
        }
        Ok(self.progress())
    }

    pub fn progress(&self) -> TrainingProgress {
        TrainingProgress {
            phase: self.phase,
            adam_iterations: self.adam_iterations,
            bfgs_iterations: self.bfgs_iterations,
            loss: self.loss,
            learning_rate: self.adam.learning_rate,
            rejected_steps: self.rejected_steps,
        }
    }

    pub fn report(&self) -> TrainingReport {
        TrainingReport {
            parameters: self.params.clone(),
            loss: self.loss,
            history: self.history.clone(),
            adam_iterations: self.adam_iterations,
            bfgs_iterations: self.bfgs_iterations,
            rejected_steps: self.rejected_steps,
            converged: self.converged,
        }
    }

    fn usable(&self, loss: f64) -> bool {
        loss.is_finite() && loss < self.rejection_threshold
    }

    fn accept(&mut self, params: Vec<f64>, loss: f64, grad: Vec<f64>) {
        self.params = params;
        self.loss = loss;
        self.grad = grad;
        self.history.push(loss);
    }

    fn adam_step(&mut self) -> Result<()> {
        let s = self.settings.adam;
        let t = self.adam.t + 1;
        let bias1 = 1.0 - s.beta1.powi(t);
        let bias2 = 1.0 - s.beta2.powi(t);

        let mut m = self.adam.m.clone();
        let mut v = self.adam.v.clone();
        let mut candidate = self.params.clone();
        for i in 0..candidate.len() {
            let g = self.grad[i];
            m[i] = s.beta1 * m[i] + (1.0 - s.beta1) * g;
            v[i] = s.beta2 * v[i] + (1.0 - s.beta2) * g * g;
            let m_hat = m[i] / bias1;
            let v_hat = v[i] / bias2;
            candidate[i] -= self.adam.learning_rate * m_hat / (v_hat.sqrt() + s.epsilon);
        }

        let (loss, grad) = gradient(&self.objective, &candidate).context("Adam step evaluation")?;
        self.adam_iterations += 1;

        if self.usable(loss) {
            self.adam.m = m;
            self.adam.v = v;
            self.adam.t = t;
            self.accept(candidate, loss, grad);
            debug!(iteration = self.adam_iterations, loss, "Adam step");
        } else {
            self.rejected_steps += 1;
            self.adam.learning_rate *= 0.5;
            warn!(
                iteration = self.adam_iterations,
                loss,
                learning_rate = self.adam.learning_rate,
                "rejected Adam step; halving learning rate"
            );
        }

        if self.adam_iterations >= s.iterations || self.adam.learning_rate < s.min_learning_rate {
            self.finish_adam();
        }
        Ok(())
    }

    fn finish_adam(&mut self) {
        info!(iterations = self.adam_iterations, loss = self.loss, "Adam phase finished");
        match self.settings.bfgs {
            Some(bfgs) if bfgs.iterations > 0 => {
                let n = self.params.len();
                self.inverse_hessian = DMatrix::identity(n, n);
                self.phase = TrainingPhase::Bfgs;
            }
            _ => self.phase = TrainingPhase::Done,
        }
    }

    fn bfgs_step(&mut self) -> Result<()> {
        let Some(s) = self.settings.bfgs else {
            self.phase = TrainingPhase::Done;
            return Ok(());
        };

        let g = DVector::from_column_slice(&self.grad);
        if g.norm() <= s.gradient_tolerance {
            self.converged = true;
            self.phase = TrainingPhase::Done;
            info!(iterations = self.bfgs_iterations, loss = self.loss, "BFGS converged");
            return Ok(());
        }

        let mut direction = -(&self.inverse_hessian * &g);
        let mut slope = g.dot(&direction);
        if !(slope < 0.0) {
            let n = self.params.len();
            self.inverse_hessian = DMatrix::identity(n, n);
            direction = -g.clone();
            slope = -g.norm_squared();
        }

        self.bfgs_iterations += 1;
        let x = DVector::from_column_slice(&self.params);
        let mut alpha = s.initial_step;
        let mut accepted = None;
        for _ in 0..=s.max_backtracks {
            let candidate = &x + alpha * &direction;
            let loss = self
                .objective
                .value(candidate.as_slice())
                .context("BFGS line search evaluation")?;
            if self.usable(loss) && loss <= self.loss + s.armijo * alpha * slope {
                accepted = Some(candidate);
                break;
            }
            alpha *= s.backtrack;
        }

        let Some(candidate) = accepted else {
            self.rejected_steps += 1;
            self.phase = TrainingPhase::Done;
            warn!(iteration = self.bfgs_iterations, loss = self.loss, "BFGS line search failed");
            return Ok(());
        };

        let (loss, grad) = gradient(&self.objective, candidate.as_slice()).context("BFGS gradient")?;
        let step = &candidate - &x;
        let change = DVector::from_column_slice(&grad) - &g;
        let curvature = step.dot(&change);
        if curvature > 1e-12 {
            let rho = 1.0 / curvature;
            let n = self.params.len();
            let left = DMatrix::identity(n, n) - rho * (&step * change.transpose());
            self.inverse_hessian =
                &left * &self.inverse_hessian * left.transpose() + rho * (&step * step.transpose());
        }
        self.accept(candidate.as_slice().to_vec(), loss, grad);
        debug!(iteration = self.bfgs_iterations, loss, step = alpha, "BFGS step");

        if self.bfgs_iterations >= s.iterations {
            self.phase = TrainingPhase::Done;
            info!(iterations = self.bfgs_iterations, loss = self.loss, "BFGS iteration limit reached");
        }
        Ok(())
    }
}

/// Runs the whole schedule and returns the final report.
pub fn train<O: Objective>(
    objective: O,
    initial: Vec<f64>,
    settings: TrainingSettings,
) -> Result<TrainingReport> {
    let mut trainer = Trainer::new(objective, initial, settings)?;
    while !trainer.is_done() {
        trainer.step()?;
    }
    Ok(trainer.report())
}
