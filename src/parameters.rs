use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{Float, RepfitError, RepfitResult};

/// A named, bounded model parameter.
///
/// A [`Parameter`] is either floating (free to vary in a fit) or constant. Fitted parameters may
/// also carry asymmetric error estimates, where `error_lo` is non-positive and `error_hi` is
/// non-negative, following the usual `value + error_lo ... value + error_hi` convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    value: Float,
    min: Float,
    max: Float,
    constant: bool,
    error_lo: Option<Float>,
    error_hi: Option<Float>,
}

impl Parameter {
    /// Create a new floating [`Parameter`] with the given starting `value` and bounds.
    ///
    /// # Errors
    ///
    /// Returns [`RepfitError::InvalidBounds`] if either bound is not finite, if `min > max`, or if
    /// `value` does not lie within `[min, max]`.
    pub fn new(name: &str, value: Float, min: Float, max: Float) -> RepfitResult<Self> {
        if !(min.is_finite() && max.is_finite() && min <= max && (min..=max).contains(&value)) {
            return Err(RepfitError::InvalidBounds {
                name: name.to_string(),
                min,
                max,
                value,
            });
        }
        Ok(Self {
            name: name.to_string(),
            value,
            min,
            max,
            constant: false,
            error_lo: None,
            error_hi: None,
        })
    }
    /// Create a new constant [`Parameter`] whose bounds collapse to its value.
    pub fn constant(name: &str, value: Float) -> RepfitResult<Self> {
        Ok(Self::new(name, value, value, value)?.fixed())
    }
    /// Mark this [`Parameter`] as constant.
    pub fn fixed(self) -> Self {
        Self {
            constant: true,
            ..self
        }
    }
    /// Attach asymmetric error estimates to this [`Parameter`].
    pub fn with_errors(self, error_lo: Float, error_hi: Float) -> Self {
        Self {
            error_lo: Some(error_lo),
            error_hi: Some(error_hi),
            ..self
        }
    }
    /// The name of the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The current value of the parameter.
    pub fn value(&self) -> Float {
        self.value
    }
    /// Set the current value of the parameter.
    ///
    /// Values outside of the parameter's bounds are clamped to the nearest bound and a warning is
    /// logged.
    pub fn set_value(&mut self, value: Float) {
        let clamped = value.clamp(self.min, self.max);
        if clamped != value {
            tracing::warn!(
                parameter = %self.name,
                value,
                clamped,
                "value outside of parameter range, clamping"
            );
        }
        self.value = clamped;
    }
    /// The lower bound of the parameter.
    pub fn min(&self) -> Float {
        self.min
    }
    /// The upper bound of the parameter.
    pub fn max(&self) -> Float {
        self.max
    }
    /// The `(min, max)` bounds of the parameter.
    pub fn bounds(&self) -> (Float, Float) {
        (self.min, self.max)
    }
    /// Whether the parameter is held constant in fits.
    pub fn is_constant(&self) -> bool {
        self.constant
    }
    /// Fix or release the parameter.
    pub fn set_constant(&mut self, constant: bool) {
        self.constant = constant;
    }
    /// The (non-positive) lower error estimate, if one is available.
    pub fn error_lo(&self) -> Option<Float> {
        self.error_lo
    }
    /// The (non-negative) upper error estimate, if one is available.
    pub fn error_hi(&self) -> Option<Float> {
        self.error_hi
    }
    /// The symmetrized error, if one is available.
    pub fn error(&self) -> Option<Float> {
        Some(0.5 * (self.error_hi? - self.error_lo?))
    }
}

impl Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {:.6e}", self.name, self.value)?;
        if let (Some(lo), Some(hi)) = (self.error_lo, self.error_hi) {
            if lo == -hi {
                write!(f, " +/- {:.2e}", hi)?;
            } else {
                write!(f, " ({:+.2e}, {:+.2e})", lo, hi)?;
            }
        }
        if self.constant {
            write!(f, " C")?;
        } else {
            write!(f, " L({} - {})", self.min, self.max)?;
        }
        Ok(())
    }
}

/// Find a [`Parameter`] by name in a slice of parameters.
pub fn find<'a>(parameters: &'a [Parameter], name: &str) -> Option<&'a Parameter> {
    parameters.iter().find(|p| p.name == name)
}
