use crate::{
    model::{FitResult, Model},
    parameters::Parameter,
    report::Reporter,
    utils::enums::WidthPolicy,
    Float,
};

/// The default number of widths a fitted value must keep from its bounds.
pub const DEFAULT_THRESHOLD: Float = 3.0;

fn widths(parameter: &Parameter, policy: WidthPolicy) -> (Float, Float) {
    let range = parameter.max() - parameter.min();
    match policy {
        WidthPolicy::Error => match (parameter.error_lo(), parameter.error_hi()) {
            (Some(lo), Some(hi)) => (-lo, hi),
            _ => {
                tracing::warn!(
                    parameter = parameter.name(),
                    "no error estimate available, using the parameter range as the width"
                );
                (range, range)
            }
        },
        WidthPolicy::Limits => (range, range),
        WidthPolicy::Symmetric(width) => (width, width),
        WidthPolicy::Asymmetric(lo, hi) => (lo, hi),
    }
}

/// Find the floated parameters of a fit result which ended up close to one of their bounds.
///
/// A parameter is flagged when its distance to the lower bound is less than `threshold` lower
/// widths, or its distance to the upper bound is less than `threshold` upper widths, where the
/// widths are chosen by the [`WidthPolicy`]. Flagged parameters are returned in the order the
/// result lists them.
///
/// ```ignore
/// let close = params_at_limit(&result, WidthPolicy::Error, DEFAULT_THRESHOLD);
/// let close = params_at_limit(&result, 0.1, 2.0);
/// ```
pub fn params_at_limit<R: FitResult + ?Sized>(
    result: &R,
    width: impl Into<WidthPolicy>,
    threshold: Float,
) -> Vec<Parameter> {
    let policy = width.into();
    result
        .floated_parameters()
        .iter()
        .filter(|parameter| {
            let (width_lo, width_hi) = widths(parameter, policy);
            (parameter.value() - parameter.min()) / width_lo < threshold
                || (parameter.max() - parameter.value()) / width_hi < threshold
        })
        .cloned()
        .collect()
}

fn fitted_source<'a, R: FitResult + ?Sized>(
    result: &'a R,
    name: &str,
) -> Option<(&'static str, &'a Parameter)> {
    crate::parameters::find(result.floated_parameters(), name)
        .map(|p| ("floated", p))
        .or_else(|| {
            crate::parameters::find(result.constant_parameters(), name).map(|p| ("constant", p))
        })
}

/// Copy the fitted values of a result onto a set of parameters by name.
///
/// Floated parameters of the result take precedence over its constant parameters. Parameters
/// which the result does not mention are left untouched. Every action is sent to the
/// [`Reporter`].
pub fn set_params_to_fit_result<R: FitResult + ?Sized>(
    parameters: &mut [Parameter],
    result: &R,
    reporter: &mut dyn Reporter,
) {
    for parameter in parameters.iter_mut() {
        match fitted_source(result, parameter.name()) {
            Some((kind, fitted)) => {
                reporter.report(&format!(
                    "setting {} to the {} value of the fit result",
                    parameter.name(),
                    kind
                ));
                parameter.set_value(fitted.value());
                if let (Some(lo), Some(hi)) = (fitted.error_lo(), fitted.error_hi()) {
                    *parameter = parameter.clone().with_errors(lo, hi);
                }
            }
            None => {
                reporter.report(&format!("{} not found in fit result", parameter.name()));
            }
        }
    }
}

/// Copy the fitted values of a result back onto a [`Model`].
///
/// This is [`set_params_to_fit_result`] for the parameters the model reports for `data`, with
/// each value written through [`Model::set_parameter_value`]. It is typically used to restore
/// the best trial of a repeated fit onto the driver's model:
///
/// ```ignore
/// let best = repeated_fit.best_result().unwrap().result.clone();
/// let data = repeated_fit.data().clone();
/// set_model_to_fit_result(repeated_fit.model_mut(), &data, &best, &mut Stdout);
/// ```
///
/// A value the model refuses is reported and the parameter keeps its current value.
pub fn set_model_to_fit_result<M: Model + ?Sized, R: FitResult + ?Sized>(
    model: &mut M,
    data: &M::Data,
    result: &R,
    reporter: &mut dyn Reporter,
) {
    for parameter in model.parameters(data) {
        match fitted_source(result, parameter.name()) {
            Some((kind, fitted)) => {
                reporter.report(&format!(
                    "setting {} to the {} value of the fit result",
                    parameter.name(),
                    kind
                ));
                if let Err(err) = model.set_parameter_value(parameter.name(), fitted.value()) {
                    tracing::warn!(parameter = parameter.name(), %err, "could not set parameter");
                    reporter.report(&format!("could not set {}: {}", parameter.name(), err));
                }
            }
            None => {
                reporter.report(&format!("{} not found in fit result", parameter.name()));
            }
        }
    }
}
