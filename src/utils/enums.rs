use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Float, RepfitError};

/// The minimization algorithms available to [`PdfModel`](crate::pdf::PdfModel) fits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// The L-BFGS-B algorithm, a limited-memory quasi-Newton minimizer which supports bounded
    /// optimization.
    #[default]
    LBFGSB,
    /// The Nelder-Mead simplex algorithm, a gradient-free minimizer.
    NelderMead,
}
impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::LBFGSB => write!(f, "L-BFGS-B"),
            Algorithm::NelderMead => write!(f, "Nelder-Mead"),
        }
    }
}
impl FromStr for Algorithm {
    type Err = RepfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lbfgsb" | "l-bfgs-b" | "lbfgs" => Ok(Self::LBFGSB),
            "neldermead" | "nelder-mead" | "nelder mead" | "simplex" => Ok(Self::NelderMead),
            _ => Err(RepfitError::ParseError {
                name: s.to_string(),
                object: "Algorithm".to_string(),
            }),
        }
    }
}

/// The width used to measure how far a fitted parameter sits from its limits.
///
/// See [`params_at_limit`](crate::limits::params_at_limit).
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum WidthPolicy {
    /// Use the asymmetric error estimates reported by the fit.
    #[default]
    Error,
    /// Use the full width of the parameter's range on both sides.
    Limits,
    /// Use the same explicit width on both sides.
    Symmetric(Float),
    /// Use explicit `(low, high)` widths.
    Asymmetric(Float, Float),
}
impl Display for WidthPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WidthPolicy::Error => write!(f, "error"),
            WidthPolicy::Limits => write!(f, "limits"),
            WidthPolicy::Symmetric(w) => write!(f, "{}", w),
            WidthPolicy::Asymmetric(lo, hi) => write!(f, "({}, {})", lo, hi),
        }
    }
}
impl FromStr for WidthPolicy {
    type Err = RepfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "error" | "errors" | "err" => Ok(Self::Error),
            "limits" | "limit" | "range" => Ok(Self::Limits),
            other => other
                .parse::<Float>()
                .map(Self::Symmetric)
                .map_err(|_| RepfitError::ParseError {
                    name: s.to_string(),
                    object: "WidthPolicy".to_string(),
                }),
        }
    }
}
impl From<Float> for WidthPolicy {
    fn from(value: Float) -> Self {
        Self::Symmetric(value)
    }
}
impl From<(Float, Float)> for WidthPolicy {
    fn from(value: (Float, Float)) -> Self {
        Self::Asymmetric(value.0, value.1)
    }
}
