use std::fmt::Display;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
    likelihoods::FitOptions,
    model::{ConvergenceStatus, FitResult, Model},
    parameters::Parameter,
    report::{Reporter, Stdout},
    sampling::{check_parameter_count, ParameterSampleTable},
    Float, RepfitError, RepfitResult,
};

/// The serializable settings of a [`RepeatedFit`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatedFitConfig {
    /// The number of fits to run (default: 1).
    pub num_fits: usize,
    /// The names of the parameters whose starting values are sampled. If [`None`], every
    /// floating parameter of the model is sampled.
    pub parameters: Option<Vec<String>>,
    /// Whether constant parameters may be sampled (default: `false`).
    pub allow_fixed_parameters: bool,
    /// The seed of the sampler. If [`None`], a seed is drawn from entropy and recorded.
    pub seed: Option<u64>,
}

impl Default for RepeatedFitConfig {
    fn default() -> Self {
        Self {
            num_fits: 1,
            parameters: None,
            allow_fixed_parameters: false,
            seed: None,
        }
    }
}

/// The outcome of one trial of a [`RepeatedFit`].
#[derive(Clone, Debug)]
pub struct TrialResult<R> {
    /// The index of the trial (trial `0` starts from the model's own parameter values).
    pub index: usize,
    /// The convergence classification of the fit.
    pub status: ConvergenceStatus,
    /// The negative log-likelihood at the minimum.
    pub min_nll: Float,
    /// The estimated distance to minimum.
    pub edm: Float,
    /// The full fit result.
    pub result: R,
}

impl<R: FitResult> TrialResult<R> {
    fn new(index: usize, result: R) -> Self {
        Self {
            index,
            status: ConvergenceStatus::from_code(result.status()),
            min_nll: result.min_nll(),
            edm: result.edm(),
            result,
        }
    }
    /// Returns `true` if the fit reported status `0`.
    pub fn is_converged(&self) -> bool {
        self.status.is_converged()
    }
}

impl<R: FitResult> Display for TrialResult<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "result {} ({})", self.index, self.status)?;
        writeln!(f, "NLL: {}", self.min_nll)?;
        writeln!(f, "edm: {}", self.edm)?;
        write!(f, "{}", self.result)
    }
}

/// A builder for a [`RepeatedFit`], obtained from [`RepeatedFit::builder`].
pub struct RepeatedFitBuilder<M: Model> {
    model: M,
    data: M::Data,
    config: RepeatedFitConfig,
    reporter: Box<dyn Reporter>,
}

impl<M: Model> RepeatedFitBuilder<M> {
    /// Only sample the named parameters, in the given order. Names which do not match a
    /// parameter of the model are dropped with a warning and recorded (see
    /// [`RepeatedFit::unmatched_parameters`]).
    pub fn parameters<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            config: RepeatedFitConfig {
                parameters: Some(names.into_iter().map(Into::into).collect()),
                ..self.config
            },
            ..self
        }
    }
    /// Allow constant parameters to be sampled (default: `false`).
    pub fn allow_fixed_parameters(self, allow_fixed_parameters: bool) -> Self {
        Self {
            config: RepeatedFitConfig {
                allow_fixed_parameters,
                ..self.config
            },
            ..self
        }
    }
    /// Seed the sampler.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            config: RepeatedFitConfig {
                seed: Some(seed),
                ..self.config
            },
            ..self
        }
    }
    /// Replace every setting with those in a [`RepeatedFitConfig`].
    pub fn with_config(self, config: RepeatedFitConfig) -> Self {
        Self { config, ..self }
    }
    /// Send banners and result listings to the given [`Reporter`] (default: [`Stdout`]).
    pub fn reporter(self, reporter: impl Reporter + 'static) -> Self {
        Self {
            reporter: Box::new(reporter),
            ..self
        }
    }
    /// Resolve the sampled parameters and draw every starting point.
    ///
    /// # Errors
    ///
    /// Returns [`RepfitError::ConfigurationError`] if zero fits are requested, if more than
    /// [`MAX_SAMPLED_PARAMETERS`](crate::MAX_SAMPLED_PARAMETERS) parameters would be sampled, or if
    /// a sampled parameter has an empty range. Returns [`RepfitError::SamplingError`] if distinct
    /// starting values cannot be drawn.
    pub fn build(self) -> RepfitResult<RepeatedFit<M>> {
        let Self {
            model,
            data,
            config,
            mut reporter,
        } = self;
        if config.num_fits == 0 {
            return Err(RepfitError::ConfigurationError(
                "the number of fits must be at least 1".to_string(),
            ));
        }
        let (sampled, unmatched) = resolve_parameters(
            model.parameters(&data),
            config.parameters.as_deref(),
            config.allow_fixed_parameters,
            &mut *reporter,
        );
        check_parameter_count(sampled.len())?;
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sample_table = ParameterSampleTable::generate(&sampled, config.num_fits, &mut rng)?;
        tracing::info!(
            num_fits = config.num_fits,
            parameters = ?sample_table.names(),
            seed,
            "prepared repeated fit"
        );
        Ok(RepeatedFit {
            model,
            data,
            config,
            seed,
            unmatched,
            sample_table,
            results: Vec::new(),
            reporter: Mutex::new(reporter),
        })
    }
}

fn resolve_parameters(
    parameters: Vec<Parameter>,
    requested: Option<&[String]>,
    allow_fixed: bool,
    reporter: &mut dyn Reporter,
) -> (Vec<Parameter>, Vec<String>) {
    let eligible = |p: &Parameter| allow_fixed || !p.is_constant();
    let Some(requested) = requested else {
        return (parameters.into_iter().filter(eligible).collect(), Vec::new());
    };
    let mut sampled: Vec<Parameter> = Vec::with_capacity(requested.len());
    let mut unmatched = Vec::new();
    for name in requested {
        if sampled.iter().any(|p| p.name() == name) {
            tracing::warn!(parameter = %name, "parameter requested twice, sampling it once");
            continue;
        }
        match crate::parameters::find(&parameters, name) {
            Some(parameter) if eligible(parameter) => sampled.push(parameter.clone()),
            Some(_) => {
                tracing::warn!(parameter = %name, "parameter is constant and will not be sampled");
                reporter.report(&format!(
                    "{} is constant and will not be sampled (see allow_fixed_parameters)",
                    name
                ));
            }
            None => {
                tracing::warn!(parameter = %name, "no parameter with this name in the model");
                reporter.report(&format!("{} not found in model, it will not be sampled", name));
                unmatched.push(name.clone());
            }
        }
    }
    (sampled, unmatched)
}

fn apply_sample<M: Model>(
    model: &mut M,
    table: &ParameterSampleTable,
    index: usize,
) -> RepfitResult<()> {
    for (name, value) in table.assignments(index) {
        model.set_parameter_value(name, value)?;
    }
    Ok(())
}

fn best_of<R>(results: &[TrialResult<R>]) -> Option<&TrialResult<R>> {
    // min_by keeps the first of several equal minima
    results
        .iter()
        .filter(|trial| trial.status.is_converged())
        .min_by(|a, b| a.min_nll.total_cmp(&b.min_nll))
}

fn report_trial<R: FitResult>(reporter: &mut dyn Reporter, trial: &TrialResult<R>) {
    reporter.report(&format!(
        "********** printing fit result {} **********",
        trial.index
    ));
    reporter.report(&format!("NLL: {}", trial.min_nll));
    reporter.report(&format!("edm: {}", trial.edm));
    reporter.report(&trial.result.to_string());
    reporter.report(&format!(
        "********** finished printing fit result {} **********",
        trial.index
    ));
}

/// A driver which fits the same [`Model`] many times from randomly sampled starting points.
///
/// Starting values are drawn once, when the driver is built: for every sampled parameter, one
/// value per fit is drawn uniformly within the parameter's bounds, with every value of a
/// parameter distinct from the others. Trial `0` always starts from the model's own parameter
/// values; trial `i > 0` first sets each sampled parameter to its `i`-th drawn value. Parameters
/// which are not sampled keep whatever value the previous fit left them at.
///
/// ```ignore
/// let mut repeated_fit = RepeatedFit::builder(model, data, 20)
///     .parameters(["mean", "sigma"])
///     .seed(1234)
///     .reporter(Silent)
///     .build()?;
/// repeated_fit.do_repeated_fit(&FitOptions::default())?;
/// if let Some(best) = repeated_fit.best_result() {
///     println!("best fit: {}", best);
/// }
/// ```
pub struct RepeatedFit<M: Model> {
    model: M,
    data: M::Data,
    config: RepeatedFitConfig,
    seed: u64,
    unmatched: Vec<String>,
    sample_table: ParameterSampleTable,
    results: Vec<TrialResult<M::Output>>,
    reporter: Mutex<Box<dyn Reporter>>,
}

impl<M: Model> RepeatedFit<M> {
    /// Start building a [`RepeatedFit`] of `num_fits` fits of `model` to `data`.
    pub fn builder(model: M, data: M::Data, num_fits: usize) -> RepeatedFitBuilder<M> {
        RepeatedFitBuilder {
            model,
            data,
            config: RepeatedFitConfig {
                num_fits,
                ..Default::default()
            },
            reporter: Box::new(Stdout),
        }
    }

    /// Run every fit in order on the driver's model.
    ///
    /// The given options are passed to each fit with [`FitOptions::save`] enabled. Results of a
    /// previous run are discarded. A fit which does not converge is recorded like any other; a
    /// fit which returns an error stops the run and the error is returned.
    pub fn do_repeated_fit(&mut self, options: &FitOptions) -> RepfitResult<()> {
        let options = options.clone().with_save(true);
        self.results.clear();
        let reporter = self.reporter.get_mut();
        for index in 0..self.config.num_fits {
            reporter.report(&format!("---------- begin of fit {} ----------", index));
            if index > 0 {
                apply_sample(&mut self.model, &self.sample_table, index)?;
            }
            tracing::debug!(index, "starting fit");
            let trial = TrialResult::new(index, self.model.fit(&self.data, &options)?);
            tracing::debug!(
                index,
                status = trial.status.code(),
                nll = trial.min_nll,
                edm = trial.edm,
                "fit finished"
            );
            reporter.report(&format!("---------- end of fit {} ----------", index));
            self.results.push(trial);
        }
        self.log_summary();
        Ok(())
    }

    fn log_summary(&self) {
        let best = best_of(&self.results);
        tracing::info!(
            num_fits = self.results.len(),
            succeeded = self.results.iter().filter(|t| t.is_converged()).count(),
            best = ?best.map(|t| t.index),
            best_nll = ?best.map(|t| t.min_nll),
            "repeated fit complete"
        );
    }

    /// The results of every fit, in trial order.
    pub fn results(&self) -> &[TrialResult<M::Output>] {
        &self.results
    }
    /// The results of the fits which converged (status `0`), in trial order.
    pub fn succeeded_results(&self) -> Vec<&TrialResult<M::Output>> {
        self.results
            .iter()
            .filter(|trial| trial.is_converged())
            .collect()
    }
    /// The converged fit with the lowest negative log-likelihood. Ties go to the earliest trial.
    /// Returns [`None`] if no fit converged.
    pub fn best_result(&self) -> Option<&TrialResult<M::Output>> {
        best_of(&self.results)
    }

    fn print_trials<'a>(
        &'a self,
        banner: &str,
        trials: impl Iterator<Item = &'a TrialResult<M::Output>>,
    ) {
        let mut reporter = self.reporter.lock();
        reporter.report(banner);
        for trial in trials {
            report_trial(&mut **reporter, trial);
        }
    }
    /// Report every fit result.
    pub fn print_all_results(&self) {
        self.print_trials(
            "********** printing all fit results **********",
            self.results.iter(),
        );
    }
    /// Report the result of every fit which converged.
    pub fn print_succeeded_results(&self) {
        self.print_trials(
            "********** printing succeeded fit results **********",
            self.succeeded_results().into_iter(),
        );
    }
    /// Report the best fit result (see [`RepeatedFit::best_result`]).
    pub fn print_best_result(&self) {
        let mut reporter = self.reporter.lock();
        reporter.report("********** printing the best fit result **********");
        match self.best_result() {
            Some(best) => {
                reporter.report(&format!("The best fit result is result {}.", best.index));
                report_trial(&mut **reporter, best);
            }
            None => reporter.report("None of the fits has status 0."),
        }
    }

    /// The table of sampled starting values. Row `0` is never applied.
    pub fn sample_table(&self) -> &ParameterSampleTable {
        &self.sample_table
    }
    /// The names of the sampled parameters, in sampling order.
    pub fn parameter_names(&self) -> &[String] {
        self.sample_table.names()
    }
    /// Requested parameter names which did not match any parameter of the model.
    pub fn unmatched_parameters(&self) -> &[String] {
        &self.unmatched
    }
    /// The seed the sampler was started from.
    pub fn seed(&self) -> u64 {
        self.seed
    }
    /// The number of fits.
    pub fn num_fits(&self) -> usize {
        self.config.num_fits
    }
    /// The settings this driver was built with (with the seed resolved).
    pub fn config(&self) -> RepeatedFitConfig {
        RepeatedFitConfig {
            seed: Some(self.seed),
            ..self.config.clone()
        }
    }
    /// The model, in the state the last fit left it.
    pub fn model(&self) -> &M {
        &self.model
    }
    /// The model, mutably.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }
    /// Consume the driver and return the model.
    pub fn into_model(self) -> M {
        self.model
    }
    /// The data the model is fit to.
    pub fn data(&self) -> &M::Data {
        &self.data
    }
}

#[cfg(feature = "rayon")]
impl<M> RepeatedFit<M>
where
    M: Model + Clone + Send + Sync,
    M::Data: Sync,
    M::Output: Send,
{
    /// Run every fit in parallel, each on its own clone of the model.
    ///
    /// Every clone starts from the model's current state, with its trial's sampled values
    /// applied (trial `0` uses the model's values unchanged). Results are stored in trial order,
    /// the banners are reported once all fits are done, and the driver's model is replaced by the
    /// clone used for the last trial. When every floating parameter is sampled, the results
    /// match those of [`RepeatedFit::do_repeated_fit`].
    pub fn do_repeated_fit_parallel(&mut self, options: &FitOptions) -> RepfitResult<()> {
        let options = options.clone().with_save(true);
        self.results.clear();
        let (model, data, table) = (&self.model, &self.data, &self.sample_table);
        let trials = (0..self.config.num_fits)
            .into_par_iter()
            .map(|index| {
                let mut model = model.clone();
                if index > 0 {
                    apply_sample(&mut model, table, index)?;
                }
                tracing::debug!(index, "starting fit");
                let trial = TrialResult::new(index, model.fit(data, &options)?);
                Ok((model, trial))
            })
            .collect::<RepfitResult<Vec<(M, TrialResult<M::Output>)>>>()?;
        let reporter = self.reporter.get_mut();
        for (model, trial) in trials {
            reporter.report(&format!("---------- begin of fit {} ----------", trial.index));
            reporter.report(&format!("---------- end of fit {} ----------", trial.index));
            self.results.push(trial);
            self.model = model;
        }
        self.log_summary();
        Ok(())
    }
}
