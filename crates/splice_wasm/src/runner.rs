//! Stepped training runner.

use crate::problem::{
    build_problem, js_error, serialize, settings_or_default, EquationProblem, ProblemSettings,
};
use splice_core::training::{Trainer, TrainingSettings};
use wasm_bindgen::prelude::*;

/// WASM-exported training runner.
/// Allows progress reporting by running batches of optimizer steps at a time.
#[wasm_bindgen]
pub struct WasmTrainingRunner {
    trainer: Option<Trainer<EquationProblem>>,
}

#[wasm_bindgen]
impl WasmTrainingRunner {
    #[wasm_bindgen(constructor)]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        equations: Vec<String>,
        var_names: Vec<String>,
        param_names: Vec<String>,
        times: Vec<f64>,
        states: Vec<f64>,
        initial_params: Vec<f64>,
        config_val: JsValue,
        settings_val: JsValue,
    ) -> Result<WasmTrainingRunner, JsValue> {
        console_error_panic_hook::set_once();

        let problem_settings: ProblemSettings = settings_or_default(config_val, "shooting config")?;
        let settings: TrainingSettings = settings_or_default(settings_val, "training settings")?;
        let problem =
            build_problem(&equations, &var_names, &param_names, times, &states, problem_settings)
            .map_err(js_error)?;
        let trainer = Trainer::new(problem, initial_params, settings).map_err(js_error)?;

        Ok(WasmTrainingRunner {
            trainer: Some(trainer),
        })
    }

    pub fn is_done(&self) -> bool {
        self.trainer.as_ref().map_or(true, |trainer| trainer.is_done())
    }

    /// Run a batch of optimizer steps and return progress.
    pub fn run_steps(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        let trainer = self
            .trainer
            .as_mut()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;

        let progress = trainer.run_steps(batch_size as usize).map_err(js_error)?;
        serialize(&progress)
    }

    pub fn get_progress(&self) -> Result<JsValue, JsValue> {
        let trainer = self
            .trainer
            .as_ref()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;
        serialize(&trainer.progress())
    }

    /// Current parameters and loss history. Consumes the runner.
    pub fn get_result(&mut self) -> Result<JsValue, JsValue> {
        let trainer = self
            .trainer
            .take()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;
        serialize(&trainer.report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splice_core::training::{AdamSettings, TrainingPhase};

    #[test]
    fn batches_advance_until_done() {
        let times: Vec<f64> = (0..11).map(|i| i as f64 * 0.2).collect();
        let states: Vec<f64> = times.iter().map(|&t| 2.0 * (-0.5 * t).exp()).collect();
        let problem = build_problem(
            &["-k * x".to_string()],
            &["x".to_string()],
            &["k".to_string()],
            times,
            &states,
            ProblemSettings::default(),
        )
        .unwrap();
        let settings = TrainingSettings {
            adam: AdamSettings {
                learning_rate: 0.05,
                iterations: 30,
                ..AdamSettings::default()
            },
            bfgs: None,
            ..TrainingSettings::default()
        };

        let mut runner = WasmTrainingRunner {
            trainer: Some(Trainer::new(problem, vec![0.1], settings).unwrap()),
        };
        assert!(!runner.is_done());

        let trainer = runner.trainer.as_mut().unwrap();
        let first = trainer.run_steps(10).unwrap();
        assert_eq!(first.adam_iterations, 10);
        assert_eq!(first.phase, TrainingPhase::Adam);

        let last = trainer.run_steps(100).unwrap();
        assert_eq!(last.adam_iterations, 30);
        assert_eq!(last.phase, TrainingPhase::Done);
        assert!(last.loss < trainer.report().history[0]);
        assert!(runner.is_done());
    }
}
