//! # repfit
//!
//! `repfit` is a small library for running repeated, randomly-seeded maximum-likelihood fits.
//! A single fit of a complicated likelihood can easily settle into a local minimum, so the
//! [`RepeatedFit`] driver refits the same [`Model`] many times, each time starting from a point
//! drawn uniformly over the bounds of the floating parameters, and then ranks the fits by their
//! final negative log-likelihood.
//!
//! The driver only talks to the fitting machinery through the [`Model`] and [`FitResult`]
//! traits. A ready-made implementation is provided by [`PdfModel`], an unbinned likelihood fit
//! of a [`Pdf`] to a [`Dataset`] which is minimized with [`ganesh`].
//!
//! # Example
//!
//! ```ignore
//! use repfit::prelude::*;
//! use rand::SeedableRng;
//!
//! let x = Observable::new("x", -5.0, 5.0);
//! let mut model = PdfModel::new(
//!     Gaussian::new("gauss", x, "mean", "sigma"),
//!     vec![
//!         Parameter::new("mean", 0.0, -3.0, 3.0)?,
//!         Parameter::new("sigma", 1.0, 0.5, 3.0)?,
//!     ],
//! )?;
//! let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);
//! let data = Arc::new(model.generate(10_000, &mut rng)?);
//!
//! let mut repeated_fit = RepeatedFit::builder(model, data, 10).seed(0).build()?;
//! repeated_fit.do_repeated_fit(&FitOptions::default())?;
//! repeated_fit.print_best_result();
//! ```
#![warn(clippy::perf, clippy::style, missing_docs)]
#![allow(clippy::excessive_precision)]

use thiserror::Error;

/// Unbinned [`Event`](crate::data::Event)-based data and toy generation helpers.
pub mod data;
/// Methods for checking whether fitted parameters sit close to their limits and for copying
/// fitted values back onto parameters.
pub mod limits;
/// The negative log-likelihood and the options passed to the minimizer.
pub mod likelihoods;
/// The [`Model`] and [`FitResult`] traits which the repeated fit driver is written against.
pub mod model;
/// Named, bounded fit [`Parameter`]s.
pub mod parameters;
/// Probability density functions and the [`PdfModel`] adapter.
pub mod pdf;
/// Sinks for human-readable fit reports.
pub mod report;
/// The repeated fit driver.
pub mod repeated;
/// Uniform sampling of starting points.
pub mod sampling;
/// Utility functions and enums.
pub mod utils;

pub use crate::data::{Dataset, Event, Observable};
pub use crate::likelihoods::{FitOptions, NLL};
pub use crate::limits::{params_at_limit, set_model_to_fit_result, set_params_to_fit_result};
pub use crate::model::{ConvergenceStatus, FitResult, Minimization, Model};
pub use crate::parameters::Parameter;
pub use crate::pdf::{gaussian::Gaussian, Pdf, PdfModel};
pub use crate::report::{Capture, Reporter, Silent, Stdout};
pub use crate::repeated::{RepeatedFit, RepeatedFitBuilder, RepeatedFitConfig, TrialResult};
pub use crate::sampling::{ParameterSampleTable, MAX_SAMPLED_PARAMETERS};
pub use crate::utils::enums::{Algorithm, WidthPolicy};

/// Everything needed to set up and run a repeated fit.
pub mod prelude {
    pub use crate::{
        Algorithm, Capture, ConvergenceStatus, Dataset, Event, FitOptions, FitResult, Float,
        Gaussian, Model, Observable, Parameter, Pdf, PdfModel, RepeatedFit, Reporter,
        RepfitError, RepfitResult, Silent, Stdout, WidthPolicy,
    };
    pub use std::sync::Arc;
}

/// A floating-point number type (defaults to [`f64`], see `f32` feature).
#[cfg(not(feature = "f32"))]
pub type Float = f64;

/// A floating-point number type (defaults to [`f64`], see `f32` feature).
#[cfg(feature = "f32")]
pub type Float = f32;

/// Mathematical constants for the selected [`Float`] type.
#[cfg(not(feature = "f32"))]
pub use std::f64::consts;

/// Mathematical constants for the selected [`Float`] type.
#[cfg(feature = "f32")]
pub use std::f32::consts;

/// Shorthand for results returned by `repfit` methods.
pub type RepfitResult<T> = Result<T, RepfitError>;

/// The error type used by all `repfit` internal methods
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepfitError {
    /// A repeated fit was configured in a way that can never be run (for instance, too many
    /// parameters for the sampler or zero requested fits). This is always raised before any
    /// sampling or fitting takes place.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// The sampler could not draw the requested number of distinct values for a parameter.
    #[error("Failed to draw distinct starting values for parameter \"{name}\"!")]
    SamplingError {
        /// Name of the parameter which could not be sampled
        name: String,
    },
    /// A parameter was constructed with bounds which do not contain its value or are not finite.
    #[error(
        "Invalid bounds for parameter \"{name}\": value {value} must lie within [{min}, {max}]!"
    )]
    InvalidBounds {
        /// Name of the offending parameter
        name: String,
        /// Requested lower bound
        min: Float,
        /// Requested upper bound
        max: Float,
        /// Requested value
        value: Float,
    },
    /// An error which occurs when a parameter is looked up by a name the model does not know.
    #[error("No parameter with name \"{name}\"!")]
    ParameterNotFound {
        /// Name of the parameter which failed lookup
        name: String,
    },
    /// Fitting or generation was requested with a dataset or model that holds no events.
    #[error("The dataset is empty!")]
    EmptyDataset,
    /// Accept-reject generation could not produce enough events.
    #[error("Event generation failed after {attempts} attempts!")]
    GenerationError {
        /// Number of proposals which were tried
        attempts: usize,
    },
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}
