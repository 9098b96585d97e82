use serde::{Deserialize, Serialize};
use statrs::function::erf::erf;

use crate::{
    consts::{PI, SQRT_2},
    data::{Event, Observable},
    pdf::Pdf,
    Float,
};

/// A Gaussian density in a single observable, truncated to and normalized over the observable's
/// range:
///
/// ```math
/// \mathcal{P}(x; \mu, \sigma) = \frac{1}{N(\mu, \sigma)} \exp\left(-\frac{(x - \mu)^2}{2\sigma^2}\right)
/// ```
///
/// where
///
/// ```math
/// N(\mu, \sigma) = \sigma\sqrt{\frac{\pi}{2}}\left[\text{erf}\left(\frac{x_{\max} - \mu}{\sqrt{2}\sigma}\right) - \text{erf}\left(\frac{x_{\min} - \mu}{\sqrt{2}\sigma}\right)\right]
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct Gaussian {
    name: String,
    observables: [Observable; 1],
    parameters: [String; 2],
}

impl Gaussian {
    /// Construct a new [`Gaussian`] in the given [`Observable`] whose mean and width are the
    /// parameters named `mean` and `sigma`.
    pub fn new(name: &str, observable: Observable, mean: &str, sigma: &str) -> Box<Self> {
        Self {
            name: name.to_string(),
            observables: [observable],
            parameters: [mean.to_string(), sigma.to_string()],
        }
        .into()
    }
    fn normalization(&self, mean: Float, sigma: Float) -> Float {
        let x = &self.observables[0];
        let scale = SQRT_2 * sigma;
        let upper = erf(((x.max - mean) / scale) as f64) as Float;
        let lower = erf(((x.min - mean) / scale) as f64) as Float;
        sigma * Float::sqrt(PI / 2.0) * (upper - lower)
    }
    fn kernel(x: Float, mean: Float, sigma: Float) -> Float {
        let z = (x - mean) / sigma;
        Float::exp(-0.5 * z * z)
    }
}

impl Pdf for Gaussian {
    fn name(&self) -> &str {
        &self.name
    }
    fn parameters(&self) -> Vec<String> {
        self.parameters.to_vec()
    }
    fn observables(&self) -> &[Observable] {
        &self.observables
    }
    fn evaluate(&self, parameters: &[Float], event: &Event) -> Float {
        let (mean, sigma) = (parameters[0], parameters[1]);
        Self::kernel(event.values[0], mean, sigma) / self.normalization(mean, sigma)
    }
    fn max_value(&self, parameters: &[Float]) -> Option<Float> {
        let (mean, sigma) = (parameters[0], parameters[1]);
        let x = &self.observables[0];
        let peak = mean.clamp(x.min, x.max);
        Some(Self::kernel(peak, mean, sigma) / self.normalization(mean, sigma))
    }
}
