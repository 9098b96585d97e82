use std::{fmt::Debug, sync::Arc};

use dyn_clone::DynClone;
use ganesh::{Function, Status};
use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::{
    data::{Dataset, Event, Observable},
    likelihoods::{FitOptions, NLL},
    model::{
        Minimization, Model, STATUS_CONVERGED, STATUS_COVARIANCE_INVALID, STATUS_EDM_ABOVE_MAX,
        STATUS_NOT_CONVERGED,
    },
    parameters::Parameter,
    Float, RepfitError, RepfitResult,
};

/// A normalized Gaussian density.
pub mod gaussian;

/// The number of uniformly distributed probes used to estimate the maximum of a [`Pdf`] which
/// does not provide [`Pdf::max_value`].
pub const MAX_VALUE_PROBES: usize = 1000;
/// The factor by which a probed maximum is inflated before it is used as an accept-reject
/// envelope.
pub const MAX_VALUE_SAFETY: Float = 1.2;
/// The number of accept-reject proposals allowed per requested event.
pub const GENERATION_ATTEMPTS_PER_EVENT: usize = 10_000;

/// A probability density function over one or more [`Observable`]s.
///
/// Users need only implement [`Pdf::evaluate`] (plus the bookkeeping methods) to be able to fit
/// a new density with a [`PdfModel`]. The density must be normalized over the ranges of its
/// [`Observable`]s for the fitted parameters to be meaningful.
pub trait Pdf: DynClone + Send + Sync {
    /// The name of this density.
    fn name(&self) -> &str;
    /// The names of the parameters this density depends on, in the order they are passed to
    /// [`Pdf::evaluate`].
    fn parameters(&self) -> Vec<String>;
    /// The observables this density is defined over, in the order they appear in
    /// [`Event::values`].
    fn observables(&self) -> &[Observable];
    /// Evaluate the normalized density for an [`Event`].
    fn evaluate(&self, parameters: &[Float], event: &Event) -> Float;
    /// The maximum value of the density over its observables, if it is known analytically. This
    /// is used as the envelope for accept-reject generation.
    #[allow(unused_variables)]
    fn max_value(&self, parameters: &[Float]) -> Option<Float> {
        None
    }
}

dyn_clone::clone_trait_object!(Pdf);

/// A [`Model`] which fits a [`Pdf`] to a [`Dataset`] by minimizing its unbinned negative
/// log-likelihood.
///
/// Like RooFit's `fitTo`, [`PdfModel::fit`] leaves the model's parameters at their fitted values
/// (and attaches the fitted errors to them).
#[derive(Clone)]
pub struct PdfModel {
    pdf: Box<dyn Pdf>,
    parameters: IndexMap<String, Parameter>,
}

impl Debug for PdfModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfModel")
            .field("pdf", &self.pdf.name())
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl PdfModel {
    /// Construct a new [`PdfModel`] from a [`Pdf`] and the [`Parameter`]s it depends on.
    /// Parameters are stored in the order the [`Pdf`] lists them; any extra parameters are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RepfitError::ParameterNotFound`] if a parameter of the [`Pdf`] is missing.
    pub fn new(pdf: Box<dyn Pdf>, parameters: Vec<Parameter>) -> RepfitResult<Self> {
        let mut given: IndexMap<String, Parameter> = parameters
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        let mut ordered = IndexMap::new();
        for name in pdf.parameters() {
            let parameter = given
                .shift_remove(&name)
                .ok_or(RepfitError::ParameterNotFound { name: name.clone() })?;
            ordered.insert(name, parameter);
        }
        for name in given.keys() {
            tracing::warn!(pdf = pdf.name(), parameter = %name, "ignoring unused parameter");
        }
        Ok(Self {
            pdf,
            parameters: ordered,
        })
    }
    /// The [`Pdf`] being fit.
    pub fn pdf(&self) -> &dyn Pdf {
        self.pdf.as_ref()
    }
    /// Look up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }
    /// Look up a parameter by name, mutably.
    pub fn parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.parameters.get_mut(name)
    }
    /// Iterate over the model's parameters in order.
    pub fn iter_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }
    /// Hold a parameter constant in future fits.
    pub fn fix(&mut self, name: &str) -> RepfitResult<()> {
        self.lookup_mut(name)?.set_constant(true);
        Ok(())
    }
    /// Allow a parameter to float in future fits.
    pub fn free(&mut self, name: &str) -> RepfitResult<()> {
        self.lookup_mut(name)?.set_constant(false);
        Ok(())
    }
    fn lookup_mut(&mut self, name: &str) -> RepfitResult<&mut Parameter> {
        self.parameters
            .get_mut(name)
            .ok_or_else(|| RepfitError::ParameterNotFound {
                name: name.to_string(),
            })
    }
    fn values(&self) -> Vec<Float> {
        self.parameters.values().map(|p| p.value()).collect()
    }
    /// Construct the [`NLL`] of this model over a [`Dataset`] using the current parameter
    /// values for constants.
    pub fn nll(&self, data: &Arc<Dataset>) -> RepfitResult<Box<NLL>> {
        let parameters: Vec<Parameter> = self.parameters.values().cloned().collect();
        NLL::new(self.pdf.as_ref(), data, &parameters)
    }
    /// Generate a [`Dataset`] of `n` unweighted events from the [`Pdf`] at the current parameter
    /// values using accept-reject sampling.
    ///
    /// # Errors
    ///
    /// Returns [`RepfitError::GenerationError`] if the acceptance rate is so low that the
    /// proposal budget runs out.
    pub fn generate<R: Rng>(&self, n: usize, rng: &mut R) -> RepfitResult<Dataset> {
        let observables = self.pdf.observables();
        if observables.is_empty() {
            return Err(RepfitError::Custom(format!(
                "Pdf \"{}\" has no observables to generate!",
                self.pdf.name()
            )));
        }
        let values = self.values();
        let propose = |rng: &mut R| -> Event {
            Event::new(
                observables
                    .iter()
                    .map(|o| o.min + rng.gen::<Float>() * o.width())
                    .collect(),
            )
        };
        let mut envelope = match self.pdf.max_value(&values) {
            Some(max) => max,
            None => {
                (0..MAX_VALUE_PROBES)
                    .map(|_| self.pdf.evaluate(&values, &propose(rng)))
                    .fold(0.0, Float::max)
                    * MAX_VALUE_SAFETY
            }
        };
        let budget = n.saturating_mul(GENERATION_ATTEMPTS_PER_EVENT);
        let mut events = Vec::with_capacity(n);
        let mut attempts = 0;
        while events.len() < n {
            if attempts >= budget {
                return Err(RepfitError::GenerationError { attempts });
            }
            attempts += 1;
            let event = propose(rng);
            let density = self.pdf.evaluate(&values, &event);
            if density > envelope {
                tracing::warn!(
                    pdf = self.pdf.name(),
                    density,
                    envelope,
                    "density exceeds accept-reject envelope, enlarging"
                );
                envelope = density * MAX_VALUE_SAFETY;
            }
            if rng.gen::<Float>() * envelope < density {
                events.push(event);
            }
        }
        tracing::debug!(pdf = self.pdf.name(), n, attempts, "generated events");
        Ok(Dataset::new(events))
    }
}

/// The covariance matrix and parameter errors which ganesh attaches to a [`Status`], kept only
/// when the Hessian at the minimum is positive definite, and the estimated distance to minimum.
struct HesseSummary {
    covariance: Option<(DMatrix<Float>, DVector<Float>)>,
    edm: Float,
}

impl HesseSummary {
    fn new(nll: &NLL, status: &Status) -> Self {
        let edm = status.cov.as_ref().map_or(Float::NAN, |cov| {
            let gradient = nll
                .gradient(status.x.as_slice(), &mut ())
                .unwrap_or_else(|never| match never {});
            0.5 * gradient.dot(&(cov * &gradient))
        });
        let positive_definite = status
            .hess
            .as_ref()
            .is_some_and(|hess| hess.clone().cholesky().is_some());
        let covariance = match (&status.cov, &status.err) {
            (Some(cov), Some(err)) if positive_definite => Some((cov.clone(), err.clone())),
            _ => None,
        };
        Self { covariance, edm }
    }
}

impl Model for PdfModel {
    type Data = Arc<Dataset>;
    type Output = Minimization;

    fn parameters(&self, _data: &Arc<Dataset>) -> Vec<Parameter> {
        self.parameters.values().cloned().collect()
    }

    fn set_parameter_value(&mut self, name: &str, value: Float) -> RepfitResult<()> {
        self.lookup_mut(name)?.set_value(value);
        Ok(())
    }

    fn fit(&mut self, data: &Arc<Dataset>, options: &FitOptions) -> RepfitResult<Minimization> {
        if data.is_empty() {
            return Err(RepfitError::EmptyDataset);
        }
        let nll = self.nll(data)?;
        let (floating, constants): (Vec<Parameter>, Vec<Parameter>) = self
            .parameters
            .values()
            .cloned()
            .partition(|p| !p.is_constant());
        let initial: Vec<Float> = floating.iter().map(|p| p.value()).collect();

        let (x, fx, converged, n_evals, message, hesse) = if floating.is_empty() {
            let fx = nll.evaluate(&[]);
            let hesse = HesseSummary {
                covariance: options
                    .hesse
                    .then(|| (DMatrix::zeros(0, 0), DVector::zeros(0))),
                edm: 0.0,
            };
            (Vec::new(), fx, true, 1, "no free parameters".to_string(), hesse)
        } else {
            let bounds = floating.iter().map(|p| p.bounds()).collect();
            let status = nll.minimize(&initial, Some(bounds), options);
            let hesse = if options.hesse {
                HesseSummary::new(&nll, &status)
            } else {
                HesseSummary {
                    covariance: None,
                    edm: Float::NAN,
                }
            };
            (
                status.x.iter().copied().collect::<Vec<Float>>(),
                status.fx,
                status.converged,
                status.n_f_evals,
                status.message,
                hesse,
            )
        };
        let edm = hesse.edm;

        let status = if !converged {
            STATUS_NOT_CONVERGED
        } else if !options.hesse {
            STATUS_CONVERGED
        } else if hesse.covariance.is_none() {
            STATUS_COVARIANCE_INVALID
        } else if !(edm <= options.edm_max()) {
            STATUS_EDM_ABOVE_MAX
        } else {
            STATUS_CONVERGED
        };

        let mut floated = Vec::with_capacity(floating.len());
        for (i, parameter) in floating.into_iter().enumerate() {
            let mut fitted = parameter;
            fitted.set_value(x[i]);
            if let Some((_, errors)) = &hesse.covariance {
                fitted = fitted.with_errors(-errors[i], errors[i]);
            }
            self.parameters.insert(fitted.name().to_string(), fitted.clone());
            floated.push(fitted);
        }

        tracing::debug!(
            pdf = self.pdf.name(),
            status,
            nll = fx,
            edm,
            n_evals,
            "fit complete"
        );
        Ok(Minimization {
            status,
            min_nll: fx,
            edm,
            floated,
            initial,
            constants,
            covariance: hesse
                .covariance
                .filter(|_| options.save)
                .map(|(cov, _)| cov.transpose().iter().copied().collect()),
            n_evals,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::gaussian::Gaussian;
    use crate::{utils::enums::Algorithm, FitResult};
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn gaussian_model(mean: Float, sigma: Float) -> PdfModel {
        PdfModel::new(
            Gaussian::new("gauss", Observable::new("x", -5.0, 5.0), "mean", "sigma"),
            vec![
                Parameter::new("sigma", sigma, 0.5, 3.0).unwrap(),
                Parameter::new("mean", mean, -3.0, 3.0).unwrap(),
            ],
        )
        .unwrap()
    }

    /// A density with no analytic maximum: a triangle peaking at `peak` on `[0, 1]`.
    #[derive(Clone)]
    struct Triangle {
        observables: [Observable; 1],
    }

    impl Pdf for Triangle {
        fn name(&self) -> &str {
            "triangle"
        }
        fn parameters(&self) -> Vec<String> {
            vec!["peak".to_string()]
        }
        fn observables(&self) -> &[Observable] {
            &self.observables
        }
        fn evaluate(&self, parameters: &[Float], event: &Event) -> Float {
            let (c, x) = (parameters[0], event.values[0]);
            if x < c {
                2.0 * x / c
            } else {
                2.0 * (1.0 - x) / (1.0 - c)
            }
        }
    }

    #[test]
    fn test_model_orders_parameters_like_pdf() {
        let model = gaussian_model(0.0, 1.0);
        let names: Vec<&str> = model.iter_parameters().map(|p| p.name()).collect();
        assert_eq!(names, vec!["mean", "sigma"]);
        assert!(PdfModel::new(
            Gaussian::new("gauss", Observable::new("x", -5.0, 5.0), "mean", "sigma"),
            vec![Parameter::new("mean", 0.0, -3.0, 3.0).unwrap()],
        )
        .is_err());
    }

    #[test]
    fn test_generate_within_range() {
        let model = gaussian_model(0.5, 1.5);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let data = model.generate(2000, &mut rng).unwrap();
        assert_eq!(data.len(), 2000);
        let values = data.column(0).unwrap();
        assert!(values.iter().all(|v| (-5.0..=5.0).contains(v)));
        let mean = values.iter().sum::<Float>() / values.len() as Float;
        assert_relative_eq!(mean, 0.5, epsilon = 0.15);
    }

    #[test]
    fn test_generate_with_probed_envelope() {
        let model = PdfModel::new(
            Box::new(Triangle {
                observables: [Observable::new("x", 0.0, 1.0)],
            }),
            vec![Parameter::new("peak", 0.3, 0.0, 1.0).unwrap()],
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let data = model.generate(3000, &mut rng).unwrap();
        let mean = data.column(0).unwrap().iter().sum::<Float>() / 3000.0;
        // mean of a triangular distribution on [0, 1] is (1 + c) / 3
        assert_relative_eq!(mean, 1.3 / 3.0, epsilon = 0.02);
    }

    #[test]
    fn test_fit_gaussian() {
        let truth = gaussian_model(0.0, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let data = Arc::new(truth.generate(10_000, &mut rng).unwrap());
        let mut model = gaussian_model(1.0, 2.0);
        let result = model
            .fit(&data, &FitOptions::default().with_save(true))
            .unwrap();
        assert_eq!(result.status(), 0);
        assert!(result.edm() < 1e-3);
        let mean = &result.floated_parameters()[0];
        let sigma = &result.floated_parameters()[1];
        assert_relative_eq!(mean.value(), 0.0, epsilon = 0.05);
        assert_relative_eq!(sigma.value(), 1.0, epsilon = 0.05);
        // the statistical error on the mean is sigma / sqrt(N)
        assert_relative_eq!(mean.error().unwrap(), 0.01, epsilon = 0.002);
        let covariance = result.covariance.as_ref().unwrap();
        assert_eq!(covariance.len(), 4);
        assert_relative_eq!(covariance[1], covariance[2], epsilon = 1e-10);
        assert_relative_eq!(covariance[0].sqrt(), mean.error().unwrap(), epsilon = 1e-12);
        assert_relative_eq!(result.initial[0], 1.0);
        assert_relative_eq!(model.parameter("mean").unwrap().value(), mean.value());
    }

    #[test]
    fn test_fit_with_constant_parameter() {
        let truth = gaussian_model(0.0, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let data = Arc::new(truth.generate(5000, &mut rng).unwrap());
        let mut model = gaussian_model(0.5, 1.0);
        model.fix("sigma").unwrap();
        let result = model.fit(&data, &FitOptions::default()).unwrap();
        assert_eq!(result.floated_parameters().len(), 1);
        assert_eq!(result.constant_parameters()[0].name(), "sigma");
        assert_relative_eq!(result.constant_parameters()[0].value(), 1.0);
        assert!(result.covariance.is_none());
        assert!(model.fix("tau").is_err());
    }

    #[test]
    fn test_fit_without_hesse() {
        let truth = gaussian_model(0.0, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let data = Arc::new(truth.generate(5000, &mut rng).unwrap());
        for algorithm in [Algorithm::LBFGSB, Algorithm::NelderMead] {
            let mut model = gaussian_model(0.5, 1.5);
            let options = FitOptions::default()
                .with_algorithm(algorithm)
                .with_hesse(false)
                .with_save(true);
            let result = model.fit(&data, &options).unwrap();
            assert_eq!(result.status(), STATUS_CONVERGED);
            assert!(result.edm().is_nan());
            assert!(result.covariance.is_none());
            assert!(result
                .floated_parameters()
                .iter()
                .all(|p| p.error().is_none()));
            assert_relative_eq!(result.floated_parameters()[0].value(), 0.0, epsilon = 0.1);
        }
    }

    #[test]
    fn test_fit_empty_dataset() {
        let mut model = gaussian_model(0.0, 1.0);
        assert_eq!(
            model
                .fit(&Arc::new(Dataset::default()), &FitOptions::default())
                .unwrap_err(),
            RepfitError::EmptyDataset
        );
    }

    #[test]
    fn test_fit_step_limit_is_not_converged() {
        let truth = gaussian_model(0.0, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let data = Arc::new(truth.generate(1000, &mut rng).unwrap());
        let mut model = gaussian_model(2.5, 2.5);
        let result = model
            .fit(&data, &FitOptions::default().with_max_steps(1))
            .unwrap();
        assert_eq!(result.status(), STATUS_NOT_CONVERGED);
    }
}
