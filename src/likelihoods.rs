use std::{convert::Infallible, sync::Arc};

#[cfg(feature = "rayon")]
use accurate::{sum::Klein, traits::*};
use ganesh::{
    algorithms::{NelderMead, LBFGSB},
    observers::DebugObserver,
    Function, Minimizer, Observer, Status,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
    data::{Dataset, Event},
    parameters::Parameter,
    pdf::Pdf,
    utils::enums::Algorithm,
    Float, RepfitError, RepfitResult,
};

/// An unbinned negative log-likelihood evaluator over the floating parameters of a [`Pdf`].
///
/// Constant parameters are captured when the [`NLL`] is constructed, so [`NLL::evaluate`] only
/// takes the values of the floating parameters, in the order given by [`NLL::parameters`].
#[derive(Clone)]
pub struct NLL {
    pdf: Box<dyn Pdf>,
    dataset: Arc<Dataset>,
    template: Vec<Float>,
    free_indices: Vec<usize>,
    free_names: Vec<String>,
}

impl NLL {
    /// Construct an [`NLL`] for a [`Pdf`] over a [`Dataset`]. Every parameter named by
    /// [`Pdf::parameters`] must be present in `parameters`; parameters which are not constant
    /// become the free parameters of the [`NLL`].
    ///
    /// # Errors
    ///
    /// Returns [`RepfitError::ParameterNotFound`] if a parameter of the [`Pdf`] is missing.
    pub fn new(
        pdf: &(dyn Pdf + 'static),
        dataset: &Arc<Dataset>,
        parameters: &[Parameter],
    ) -> RepfitResult<Box<Self>> {
        let mut template = Vec::new();
        let mut free_indices = Vec::new();
        let mut free_names = Vec::new();
        for (index, name) in pdf.parameters().iter().enumerate() {
            let parameter = crate::parameters::find(parameters, name).ok_or_else(|| {
                RepfitError::ParameterNotFound {
                    name: name.to_string(),
                }
            })?;
            template.push(parameter.value());
            if !parameter.is_constant() {
                free_indices.push(index);
                free_names.push(name.to_string());
            }
        }
        Ok(Self {
            pdf: dyn_clone::clone_box(pdf),
            dataset: dataset.clone(),
            template,
            free_indices,
            free_names,
        }
        .into())
    }
    /// Get the list of free parameter names in the order they appear in the [`NLL::evaluate`]
    /// method.
    pub fn parameters(&self) -> Vec<String> {
        self.free_names.clone()
    }
    fn expand(&self, parameters: &[Float]) -> Vec<Float> {
        let mut full = self.template.clone();
        for (&index, &value) in self.free_indices.iter().zip(parameters) {
            full[index] = value;
        }
        full
    }
    fn log_density(&self, parameters: &[Float], event: &Event) -> Float {
        Float::ln(self.pdf.evaluate(parameters, event).max(Float::MIN_POSITIVE))
    }
    /// Evaluate the negative log-likelihood with the given values for the free parameters. The
    /// result is given by the following formula:
    ///
    /// ```math
    /// NLL(\vec{p}) = -\sum_{e \in \text{Data}} \text{weight}(e) \ln(\mathcal{P}(e; \vec{p}))
    /// ```
    #[cfg(feature = "rayon")]
    pub fn evaluate(&self, parameters: &[Float]) -> Float {
        let full = self.expand(parameters);
        -self
            .dataset
            .par_iter()
            .map(|e| e.weight * self.log_density(&full, e))
            .parallel_sum_with_accumulator::<Klein<Float>>()
    }

    /// Evaluate the negative log-likelihood with the given values for the free parameters. The
    /// result is given by the following formula:
    ///
    /// ```math
    /// NLL(\vec{p}) = -\sum_{e \in \text{Data}} \text{weight}(e) \ln(\mathcal{P}(e; \vec{p}))
    /// ```
    #[cfg(not(feature = "rayon"))]
    pub fn evaluate(&self, parameters: &[Float]) -> Float {
        let full = self.expand(parameters);
        -self
            .dataset
            .iter()
            .map(|e| e.weight * self.log_density(&full, e))
            .sum::<Float>()
    }
}

impl Function<(), Infallible> for NLL {
    fn evaluate(&self, parameters: &[Float], _user_data: &mut ()) -> Result<Float, Infallible> {
        Ok(NLL::evaluate(self, parameters))
    }
}

/// Which values a [`VerboseObserver`] should log at each step.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verbosity {
    /// Log the step number.
    pub show_step: bool,
    /// Log the current best position.
    pub show_x: bool,
    /// Log the current best value.
    pub show_fx: bool,
}

/// A set of options that are used when fits are performed.
///
/// These options are forwarded unchanged by the repeated fit driver, except for
/// [`FitOptions::save`], which it always enables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// The minimization algorithm (default: [`Algorithm::LBFGSB`]).
    pub algorithm: Algorithm,
    /// The maximum number of minimizer steps (default: 4000).
    pub max_steps: usize,
    /// The tolerance on the estimated distance to minimum, in units of `0.001` (default: 1).
    pub tolerance: Float,
    /// Whether to compute the covariance matrix and parameter errors after minimizing
    /// (default: `true`). When disabled, no errors are attached, the EDM is not estimated and
    /// the fit status only reflects whether the minimizer converged.
    pub hesse: bool,
    /// Whether to keep the full fit result, including the covariance matrix (default: `false`).
    pub save: bool,
    /// Attach the [`DebugObserver`] to the minimization.
    pub debug: bool,
    /// Attach a [`VerboseObserver`] with the given settings to the minimization.
    pub verbose: Option<Verbosity>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            max_steps: 4000,
            tolerance: 1.0,
            hesse: true,
            save: false,
            debug: false,
            verbose: None,
        }
    }
}

/// An [`Observer`] which logs the progress of a minimization with [`tracing`].
pub struct VerboseObserver(Verbosity);

impl Observer<()> for VerboseObserver {
    fn callback(&mut self, step: usize, status: &mut Status, _user_data: &mut ()) -> bool {
        if self.0.show_step {
            tracing::debug!("Step: {}", step);
        }
        if self.0.show_x {
            tracing::debug!("Current Best Position: {}", status.x.transpose());
        }
        if self.0.show_fx {
            tracing::debug!("Current Best Value: {}", status.fx);
        }
        false
    }
}

impl FitOptions {
    /// Adds the [`DebugObserver`] to the minimization.
    pub fn debug(self) -> Self {
        Self {
            debug: true,
            ..self
        }
    }
    /// Adds a customizable [`VerboseObserver`] to the minimization.
    pub fn verbose(self, show_step: bool, show_x: bool, show_fx: bool) -> Self {
        Self {
            verbose: Some(Verbosity {
                show_step,
                show_x,
                show_fx,
            }),
            ..self
        }
    }
    /// Set the [`Algorithm`] to be used in the minimization (default: [`Algorithm::LBFGSB`]).
    pub fn with_algorithm(self, algorithm: Algorithm) -> Self {
        Self { algorithm, ..self }
    }
    /// Set the maximum number of minimizer steps (default: 4000).
    pub fn with_max_steps(self, max_steps: usize) -> Self {
        Self { max_steps, ..self }
    }
    /// Set the tolerance on the estimated distance to minimum (default: 1).
    pub fn with_tolerance(self, tolerance: Float) -> Self {
        Self { tolerance, ..self }
    }
    /// Enable or disable the covariance calculation (default: enabled).
    pub fn with_hesse(self, hesse: bool) -> Self {
        Self { hesse, ..self }
    }
    /// Keep (or drop) the full fit result.
    pub fn with_save(self, save: bool) -> Self {
        Self { save, ..self }
    }
    /// The largest estimated distance to minimum for which a fit is considered converged.
    ///
    /// This follows the MIGRAD convention of `0.002 * tolerance * up` with `up = 0.5` for a
    /// negative log-likelihood.
    pub fn edm_max(&self) -> Float {
        0.002 * self.tolerance * 0.5
    }
    // L-BFGS-B always evaluates the Hessian after converging, Nelder-Mead can skip it
    fn algorithm(&self) -> Box<dyn ganesh::Algorithm<(), Infallible>> {
        match self.algorithm {
            Algorithm::LBFGSB => Box::new(LBFGSB::default()),
            Algorithm::NelderMead if self.hesse => Box::new(NelderMead::default()),
            Algorithm::NelderMead => Box::new(NelderMead::default().with_no_error_calculation()),
        }
    }
    fn observers(&self) -> Vec<Arc<RwLock<dyn Observer<()>>>> {
        let mut observers: Vec<Arc<RwLock<dyn Observer<()>>>> = Vec::new();
        if self.debug {
            observers.push(DebugObserver::build());
        }
        if let Some(verbosity) = self.verbose {
            observers.push(Arc::new(RwLock::new(VerboseObserver(verbosity))));
        }
        observers
    }
}

impl NLL {
    /// Minimizes the negative log-likelihood over the free parameters, starting at `p0` and
    /// respecting the given `bounds`.
    ///
    /// When [`FitOptions::hesse`] is set, the returned [`Status`] carries the Hessian, covariance
    /// matrix and parameter errors at the minimum.
    pub fn minimize(
        &self,
        p0: &[Float],
        bounds: Option<Vec<(Float, Float)>>,
        options: &FitOptions,
    ) -> Status {
        let mut m = options.observers().into_iter().fold(
            Minimizer::new(options.algorithm(), self.free_names.len())
                .with_bounds(bounds)
                .with_max_steps(options.max_steps),
            |m, observer| m.with_observer(observer),
        );
        m.minimize(self, p0, &mut ())
            .unwrap_or_else(|never| match never {});
        m.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::Observable, pdf::gaussian::Gaussian};
    use approx::assert_relative_eq;

    fn gaussian_nll(sigma_fixed: bool) -> Box<NLL> {
        let pdf = Gaussian::new("gauss", Observable::new("x", -5.0, 5.0), "mean", "sigma");
        let mut sigma = Parameter::new("sigma", 1.0, 0.5, 3.0).unwrap();
        sigma.set_constant(sigma_fixed);
        let parameters = vec![Parameter::new("mean", 0.0, -3.0, 3.0).unwrap(), sigma];
        let dataset = Arc::new(Dataset::from_values(&[-1.0, 0.0, 0.5, 1.0]));
        NLL::new(pdf.as_ref(), &dataset, &parameters).unwrap()
    }

    #[test]
    fn test_nll_free_parameters() {
        assert_eq!(gaussian_nll(false).parameters(), vec!["mean", "sigma"]);
        assert_eq!(gaussian_nll(true).parameters(), vec!["mean"]);
    }

    #[test]
    fn test_nll_evaluate_fixed_sigma() {
        let nll = gaussian_nll(true);
        let pdf = Gaussian::new("gauss", Observable::new("x", -5.0, 5.0), "mean", "sigma");
        let expected: Float = [-1.0, 0.0, 0.5, 1.0]
            .iter()
            .map(|&x| -pdf.evaluate(&[0.2, 1.0], &Event::new(vec![x])).ln())
            .sum();
        assert_relative_eq!(nll.evaluate(&[0.2]), expected, epsilon = 1e-10);
    }

    #[test]
    fn test_nll_missing_parameter() {
        let pdf = Gaussian::new("gauss", Observable::new("x", -5.0, 5.0), "mean", "sigma");
        let dataset = Arc::new(Dataset::from_values(&[0.0]));
        let parameters = vec![Parameter::new("mean", 0.0, -3.0, 3.0).unwrap()];
        assert!(matches!(
            NLL::new(pdf.as_ref(), &dataset, &parameters),
            Err(RepfitError::ParameterNotFound { .. })
        ));
    }

    #[test]
    fn test_fit_options_builder() {
        let options = FitOptions::default()
            .with_algorithm(Algorithm::NelderMead)
            .with_max_steps(100)
            .with_tolerance(10.0)
            .with_save(true)
            .verbose(true, false, true);
        assert_eq!(options.algorithm, Algorithm::NelderMead);
        assert_eq!(options.max_steps, 100);
        assert!(options.save);
        assert!(options.hesse);
        assert_relative_eq!(options.edm_max(), 0.01);
        assert_eq!(options.observers().len(), 1);
    }

    #[test]
    fn test_minimize_with_observers_attached() {
        // observers only log, so the minimization still runs to convergence
        let nll = gaussian_nll(true);
        let options = FitOptions::default().debug().verbose(true, true, true);
        assert_eq!(options.observers().len(), 2);
        let status = nll.minimize(&[0.5], Some(vec![(-3.0, 3.0)]), &options);
        assert!(status.converged);
        assert!(status.n_f_evals > 1);
        assert_relative_eq!(status.x[0], 0.125, epsilon = 1e-2);
        assert!(status.cov.is_some());
        assert_eq!(status.err.map(|err| err.len()), Some(1));
    }

    #[test]
    fn test_minimize_nelder_mead_without_hesse() {
        let nll = gaussian_nll(true);
        let options = FitOptions::default()
            .with_algorithm(Algorithm::NelderMead)
            .with_hesse(false);
        let status = nll.minimize(&[0.5], Some(vec![(-3.0, 3.0)]), &options);
        assert_relative_eq!(status.x[0], 0.125, epsilon = 1e-2);
        assert!(status.hess.is_none());
        assert!(status.cov.is_none());
    }
}
