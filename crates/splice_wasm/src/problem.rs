//! Shooting problem wrapper for equation-defined models.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, to_value};
use splice_core::dataset::Dataset;
use splice_core::equation_engine::EquationField;
use splice_core::shooting::{FitLoss, Group, ShootingConfig, ShootingProblem};
use wasm_bindgen::prelude::*;

pub(crate) type EquationProblem = ShootingProblem<EquationField>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GradientResult {
    pub loss: f64,
    pub gradient: Vec<f64>,
}

/// Settings object accepted by the bridge: the shooting configuration with
/// an optional `fit` naming the data-fit function.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub(crate) struct ProblemSettings {
    #[serde(flatten)]
    pub config: ShootingConfig,
    #[serde(default)]
    pub fit: FitLoss,
}

pub(crate) fn js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

pub(crate) fn serialize<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Reads an optional settings object, falling back to defaults when the
/// caller passes `undefined` or `null`.
pub(crate) fn settings_or_default<T>(value: JsValue, what: &str) -> Result<T, JsValue>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if value.is_undefined() || value.is_null() {
        return Ok(T::default());
    }
    from_value(value).map_err(|e| JsValue::from_str(&format!("Invalid {}: {}", what, e)))
}

/// Compiles the equations and binds them to the observed trajectory.
/// `states` is row-major with one row of `var_names.len()` values per sample.
pub(crate) fn build_problem(
    equations: &[String],
    var_names: &[String],
    param_names: &[String],
    times: Vec<f64>,
    states: &[f64],
    settings: ProblemSettings,
) -> Result<EquationProblem> {
    let field = EquationField::compile(equations, var_names, param_names)
        .context("Failed to compile equations")?;
    let dataset =
        Dataset::from_flat(times, states, var_names.len()).context("Invalid observations")?;
    let problem = ShootingProblem::new(field, dataset, settings.fit, settings.config)
        .context("Invalid shooting problem")?;
    Ok(problem)
}

pub(crate) fn gradient_of(problem: &EquationProblem, params: &[f64]) -> Result<GradientResult> {
    let (loss, gradient) = problem.gradient(params).context("Gradient evaluation failed")?;
    Ok(GradientResult { loss, gradient })
}

pub(crate) fn groups_of(problem: &EquationProblem) -> Result<Vec<Group>> {
    Ok(problem.groups()?)
}

#[wasm_bindgen]
pub struct WasmShootingProblem {
    pub(crate) problem: EquationProblem,
}

#[wasm_bindgen]
impl WasmShootingProblem {
    #[wasm_bindgen(constructor)]
    pub fn new(
        equations: Vec<String>,
        var_names: Vec<String>,
        param_names: Vec<String>,
        times: Vec<f64>,
        states: Vec<f64>,
        config_val: JsValue,
    ) -> Result<WasmShootingProblem, JsValue> {
        console_error_panic_hook::set_once();

        let settings: ProblemSettings = settings_or_default(config_val, "shooting config")?;
        let problem = build_problem(&equations, &var_names, &param_names, times, &states, settings)
            .map_err(js_error)?;
        Ok(WasmShootingProblem { problem })
    }

    pub fn parameter_count(&self) -> usize {
        self.problem.parameter_count()
    }

    /// Loss, its parts and the per-group predictions.
    pub fn evaluate(&self, params: Vec<f64>) -> Result<JsValue, JsValue> {
        let evaluation = self
            .problem
            .evaluate(&params)
            .map_err(|e| JsValue::from_str(&format!("Evaluation failed: {}", e)))?;
        serialize(&evaluation)
    }

    pub fn gradient(&self, params: Vec<f64>) -> Result<JsValue, JsValue> {
        let result = gradient_of(&self.problem, &params).map_err(js_error)?;
        serialize(&result)
    }

    pub fn groups(&self) -> Result<JsValue, JsValue> {
        let groups = groups_of(&self.problem).map_err(js_error)?;
        serialize(&groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn lotka_volterra(settings: ProblemSettings) -> Result<EquationProblem> {
        let times: Vec<f64> = (0..9).map(|i| i as f64 * 0.25).collect();
        let states: Vec<f64> = times
            .iter()
            .flat_map(|&t| [1.0 + 0.1 * t, 0.5 - 0.05 * t])
            .collect();
        build_problem(
            &strings(&["a * x - b * x * y", "d * x * y - c * y"]),
            &strings(&["x", "y"]),
            &strings(&["a", "b", "c", "d"]),
            times,
            &states,
            settings,
        )
    }

    #[test]
    fn builds_and_differentiates_an_equation_problem() {
        let problem = lotka_volterra(ProblemSettings::default()).unwrap();
        assert_eq!(problem.parameter_count(), 4);

        let groups = groups_of(&problem).unwrap();
        assert_eq!(groups.len(), 4);
        assert_eq!((groups[3].start, groups[3].end), (6, 8));

        let result = gradient_of(&problem, &[1.0, 0.5, 0.8, 0.3]).unwrap();
        assert_eq!(result.gradient.len(), 4);
        assert!(result.loss.is_finite());
        let direct = problem.loss(&[1.0_f64, 0.5, 0.8, 0.3]).unwrap();
        assert!((result.loss - direct).abs() <= 1e-12 * (1.0 + direct.abs()));
    }

    #[test]
    fn reports_compile_and_shape_errors() {
        let err = build_problem(
            &strings(&["a * x +"]),
            &strings(&["x"]),
            &strings(&["a"]),
            vec![0.0, 1.0],
            &[1.0, 2.0],
            ProblemSettings::default(),
        )
        .err()
        .expect("build should fail");
        assert!(format!("{err:#}").contains("Failed to compile equations"));

        let err = build_problem(
            &strings(&["-a * x"]),
            &strings(&["x"]),
            &strings(&["a"]),
            vec![0.0, 1.0, 2.0],
            &[1.0, 2.0],
            ProblemSettings::default(),
        )
        .err()
        .expect("build should fail");
        assert!(format!("{err:#}").contains("Invalid observations"));
    }

    #[test]
    fn settings_choose_the_data_fit() {
        assert_eq!(ProblemSettings::default().fit, FitLoss::SumSquared);

        let whole = |fit| ProblemSettings {
            config: ShootingConfig {
                group_size: 9,
                ..ShootingConfig::default()
            },
            fit,
        };
        let summed = lotka_volterra(whole(FitLoss::SumSquared)).unwrap();
        let averaged = lotka_volterra(whole(FitLoss::MeanSquared)).unwrap();
        let params = [1.0_f64, 0.5, 0.8, 0.3];
        let sum = summed.loss(&params).unwrap();
        let mean = averaged.loss(&params).unwrap();
        assert!(sum > 0.0);
        // One group of 9 samples with 2 components each.
        assert!((mean * 18.0 - sum).abs() <= 1e-12 * sum);
    }

    #[test]
    fn gradient_rejects_wrong_parameter_count() {
        let problem = lotka_volterra(ProblemSettings::default()).unwrap();
        let err = gradient_of(&problem, &[1.0]).unwrap_err();
        assert!(format!("{err:#}").contains("Gradient evaluation failed"));
    }
}
