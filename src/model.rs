use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{likelihoods::FitOptions, parameters::Parameter, Float, RepfitResult};

/// The status code a [`FitResult`] reports when the fit converged.
pub const STATUS_CONVERGED: i32 = 0;
/// The status code for a fit whose covariance matrix was not positive-definite.
pub const STATUS_COVARIANCE_INVALID: i32 = 1;
/// The status code for a fit whose estimated distance to minimum exceeds the tolerance.
pub const STATUS_EDM_ABOVE_MAX: i32 = 3;
/// The status code for a fit whose minimizer did not report convergence.
pub const STATUS_NOT_CONVERGED: i32 = 4;

/// The convergence classification of a single fit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    /// The fit reported a status code of zero.
    Converged,
    /// The fit reported the given non-zero status code.
    Failed {
        /// The status code reported by the fit
        code: i32,
    },
}

impl ConvergenceStatus {
    /// Classify a raw status code.
    pub fn from_code(code: i32) -> Self {
        if code == STATUS_CONVERGED {
            Self::Converged
        } else {
            Self::Failed { code }
        }
    }
    /// Returns `true` for [`ConvergenceStatus::Converged`].
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
    /// The raw status code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Converged => STATUS_CONVERGED,
            Self::Failed { code } => *code,
        }
    }
}

impl Display for ConvergenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::Failed { code } => write!(f, "failed (status {})", code),
        }
    }
}

/// The outcome of fitting a [`Model`] to some data.
///
/// The [`Display`] implementation is used when reporting results and should produce a
/// human-readable listing of every parameter.
pub trait FitResult: Display {
    /// The status code reported by the minimizer (`0` means converged).
    fn status(&self) -> i32;
    /// The negative log-likelihood at the minimum.
    fn min_nll(&self) -> Float;
    /// The estimated distance to the minimum.
    fn edm(&self) -> Float;
    /// The parameters which were allowed to float, at their fitted values.
    fn floated_parameters(&self) -> &[Parameter];
    /// The parameters which were held constant.
    fn constant_parameters(&self) -> &[Parameter];
}

/// A model which can be fit to data.
///
/// Implementors own their parameter state. [`Model::fit`] starts from the current parameter
/// values and may leave them at the fitted values.
pub trait Model {
    /// The type of data the model is fit to.
    type Data;
    /// The result of a fit.
    type Output: FitResult;
    /// The (ordered) parameters of the model relative to the given data.
    fn parameters(&self, data: &Self::Data) -> Vec<Parameter>;
    /// Set the current value of a parameter by name.
    ///
    /// # Errors
    ///
    /// Should return [`RepfitError::ParameterNotFound`](crate::RepfitError::ParameterNotFound)
    /// if the model has no parameter with the given name.
    fn set_parameter_value(&mut self, name: &str, value: Float) -> RepfitResult<()>;
    /// Fit the model to the given data.
    ///
    /// A fit which fails to converge is not an error; it should be reported through
    /// [`FitResult::status`].
    fn fit(&mut self, data: &Self::Data, options: &FitOptions) -> RepfitResult<Self::Output>;
}

/// The full result of a single minimization, as produced by
/// [`PdfModel`](crate::pdf::PdfModel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Minimization {
    /// The status code of the fit.
    pub status: i32,
    /// The negative log-likelihood at the minimum.
    pub min_nll: Float,
    /// The estimated distance to the minimum.
    pub edm: Float,
    /// The floating parameters at their fitted values (with errors if the covariance was
    /// computed).
    pub floated: Vec<Parameter>,
    /// The floating parameters' values at the start of the fit.
    pub initial: Vec<Float>,
    /// The constant parameters.
    pub constants: Vec<Parameter>,
    /// The covariance matrix of the floating parameters in row-major order, if it was computed
    /// and is positive-definite.
    pub covariance: Option<Vec<Float>>,
    /// The number of objective function evaluations used by the minimizer.
    pub n_evals: usize,
    /// The message reported by the minimizer.
    pub message: String,
}

impl Minimization {
    /// The covariance between the floating parameters at indices `i` and `j`.
    pub fn covariance(&self, i: usize, j: usize) -> Option<Float> {
        let n = self.floated.len();
        self.covariance.as_ref().map(|cov| cov[i * n + j])
    }
    /// The correlation between the floating parameters at indices `i` and `j`.
    pub fn correlation(&self, i: usize, j: usize) -> Option<Float> {
        let cov_ij = self.covariance(i, j)?;
        let cov_ii = self.covariance(i, i)?;
        let cov_jj = self.covariance(j, j)?;
        Some(cov_ij / Float::sqrt(cov_ii * cov_jj))
    }
}

impl FitResult for Minimization {
    fn status(&self) -> i32 {
        self.status
    }
    fn min_nll(&self) -> Float {
        self.min_nll
    }
    fn edm(&self) -> Float {
        self.edm
    }
    fn floated_parameters(&self) -> &[Parameter] {
        &self.floated
    }
    fn constant_parameters(&self) -> &[Parameter] {
        &self.constants
    }
}

impl Display for Minimization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "  Status : {}", self.status)?;
        writeln!(f, "  FCN={} EDM={:e}", self.min_nll, self.edm)?;
        writeln!(f, "  Minimizer: {}", self.message)?;
        writeln!(f)?;
        if !self.constants.is_empty() {
            writeln!(f, "  {:>24}  {:>14}", "Constant Parameter", "Value")?;
            writeln!(f, "  {:>24}  {:>14}", "-".repeat(24), "-".repeat(14))?;
            for p in &self.constants {
                writeln!(f, "  {:>24}  {:>14.6e}", p.name(), p.value())?;
            }
            writeln!(f)?;
        }
        writeln!(
            f,
            "  {:>24}  {:>14}  {:>30}",
            "Floating Parameter", "InitialValue", "FinalValue +/-  Error"
        )?;
        writeln!(
            f,
            "  {:>24}  {:>14}  {:>30}",
            "-".repeat(24),
            "-".repeat(14),
            "-".repeat(30)
        )?;
        for (p, init) in self.floated.iter().zip(self.initial.iter()) {
            let error = match p.error() {
                Some(e) => format!("{:.2e}", e),
                None => "n/a".to_string(),
            };
            writeln!(
                f,
                "  {:>24}  {:>14.6e}  {:>16.6e} +/- {:>9}",
                p.name(),
                init,
                p.value(),
                error
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn minimization() -> Minimization {
        Minimization {
            status: 0,
            min_nll: 100.0,
            edm: 1e-6,
            floated: vec![
                Parameter::new("a", 1.0, 0.0, 2.0)
                    .unwrap()
                    .with_errors(-0.2, 0.2),
                Parameter::new("b", -1.0, -2.0, 0.0)
                    .unwrap()
                    .with_errors(-0.1, 0.1),
            ],
            initial: vec![0.5, -0.5],
            constants: vec![Parameter::constant("c", 3.0).unwrap()],
            covariance: Some(vec![0.04, 0.01, 0.01, 0.01]),
            n_evals: 42,
            message: "converged".to_string(),
        }
    }

    #[test]
    fn test_convergence_status() {
        assert!(ConvergenceStatus::from_code(0).is_converged());
        assert_eq!(
            ConvergenceStatus::from_code(4),
            ConvergenceStatus::Failed { code: 4 }
        );
        assert_eq!(ConvergenceStatus::Failed { code: 3 }.code(), 3);
        assert_eq!(format!("{}", ConvergenceStatus::Converged), "converged");
        assert_eq!(
            format!("{}", ConvergenceStatus::Failed { code: 1 }),
            "failed (status 1)"
        );
    }

    #[test]
    fn test_minimization_correlation() {
        let m = minimization();
        assert_relative_eq!(m.covariance(0, 1).unwrap(), 0.01);
        assert_relative_eq!(m.correlation(0, 1).unwrap(), 0.5);
        assert_relative_eq!(m.correlation(1, 1).unwrap(), 1.0);
    }

    #[test]
    fn test_minimization_display_lists_parameters() {
        let listing = format!("{}", minimization());
        assert!(listing.contains("Status : 0"));
        assert!(listing.contains("Constant Parameter"));
        assert!(listing.contains("Floating Parameter"));
        for name in ["a", "b", "c"] {
            assert!(listing
                .lines()
                .any(|line| line.split_whitespace().next() == Some(name)));
        }
    }
}
