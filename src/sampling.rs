use std::collections::HashSet;

use rand::{distributions::Uniform, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{parameters::Parameter, Float, RepfitError, RepfitResult};

/// The largest number of parameters which can be sampled at once.
///
/// Starting points are drawn from a joint uniform density over the sampled parameters, and the
/// number of independent dimensions is capped at 31.
pub const MAX_SAMPLED_PARAMETERS: usize = 31;

/// The number of redraws allowed per requested value before a column is declared unsamplable.
pub const REDRAWS_PER_VALUE: usize = 100;

/// A table of starting points, one row per fit and one column per sampled parameter.
///
/// Within each column, every value is distinct. Row `0` is generated like every other row, but
/// the repeated fit driver never applies it: the first fit always starts from the model's own
/// values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSampleTable {
    names: Vec<String>,
    rows: Vec<Vec<Float>>,
}

impl ParameterSampleTable {
    /// Draw `n_rows` starting points for the given parameters, uniformly over each parameter's
    /// bounds.
    ///
    /// Each parameter's column is drawn in full before moving on to the next parameter, so the
    /// table for a given seed does not depend on how many rows are later read from it.
    ///
    /// # Errors
    ///
    /// Returns [`RepfitError::ConfigurationError`] if there are more than
    /// [`MAX_SAMPLED_PARAMETERS`] parameters, if a parameter's range is empty while more than
    /// one row is requested, or if the width of a parameter's range overflows [`Float`]. Returns [`RepfitError::SamplingError`] if a column cannot be filled
    /// with distinct values.
    pub fn generate(
        parameters: &[Parameter],
        n_rows: usize,
        rng: &mut ChaCha8Rng,
    ) -> RepfitResult<Self> {
        check_parameter_count(parameters.len())?;
        let columns = parameters
            .iter()
            .map(|parameter| sample_column(parameter, n_rows, rng))
            .collect::<RepfitResult<Vec<Vec<Float>>>>()?;
        let rows = (0..n_rows)
            .map(|row| columns.iter().map(|column| column[row]).collect())
            .collect();
        Ok(Self {
            names: parameters.iter().map(|p| p.name().to_string()).collect(),
            rows,
        })
    }
    /// Shorthand for [`ParameterSampleTable::generate`] with a fresh [`ChaCha8Rng`] seeded from
    /// `seed`.
    pub fn from_seed(parameters: &[Parameter], n_rows: usize, seed: u64) -> RepfitResult<Self> {
        Self::generate(parameters, n_rows, &mut ChaCha8Rng::seed_from_u64(seed))
    }
    /// The names of the sampled parameters, in column order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
    /// The number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    /// Checks whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    /// The sampled values for one fit, in column order.
    pub fn row(&self, index: usize) -> &[Float] {
        &self.rows[index]
    }
    /// Iterate over the `(name, value)` pairs of one row.
    pub fn assignments(&self, index: usize) -> impl Iterator<Item = (&str, Float)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.rows[index].iter().copied())
    }
    /// All sampled values of one parameter.
    pub fn column(&self, name: &str) -> Option<Vec<Float>> {
        let index = self.names.iter().position(|n| n == name)?;
        Some(self.rows.iter().map(|row| row[index]).collect())
    }
}

/// Check that `count` parameters can be sampled together.
pub fn check_parameter_count(count: usize) -> RepfitResult<()> {
    if count > MAX_SAMPLED_PARAMETERS {
        return Err(RepfitError::ConfigurationError(format!(
            "cannot sample {} parameters, the uniform sampler supports at most {}",
            count, MAX_SAMPLED_PARAMETERS
        )));
    }
    Ok(())
}

fn sample_column(
    parameter: &Parameter,
    n_rows: usize,
    rng: &mut ChaCha8Rng,
) -> RepfitResult<Vec<Float>> {
    let (min, max) = parameter.bounds();
    if min == max {
        if n_rows > 1 {
            return Err(RepfitError::ConfigurationError(format!(
                "parameter \"{}\" has an empty range and cannot be sampled {} times",
                parameter.name(),
                n_rows
            )));
        }
        return Ok(vec![min; n_rows]);
    }
    if !(max - min).is_finite() {
        return Err(RepfitError::ConfigurationError(format!(
            "parameter \"{}\" has a range [{}, {}] too wide to sample uniformly",
            parameter.name(),
            min,
            max
        )));
    }
    let distribution = Uniform::new_inclusive(min, max);
    let mut seen = HashSet::with_capacity(n_rows);
    let mut column = Vec::with_capacity(n_rows);
    let mut redraws = 0;
    while column.len() < n_rows {
        let value: Float = rng.sample(&distribution);
        if seen.insert(value.to_bits()) {
            column.push(value);
        } else {
            redraws += 1;
            if redraws > REDRAWS_PER_VALUE * n_rows {
                return Err(RepfitError::SamplingError {
                    name: parameter.name().to_string(),
                });
            }
        }
    }
    Ok(column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameters(n: usize) -> Vec<Parameter> {
        (0..n)
            .map(|i| Parameter::new(&format!("p{}", i), 0.0, -1.0 - i as Float, 2.0).unwrap())
            .collect()
    }

    #[test]
    fn test_columns_are_distinct_and_bounded() {
        let pars = parameters(3);
        let table = ParameterSampleTable::from_seed(&pars, 500, 12).unwrap();
        assert_eq!(table.len(), 500);
        for p in &pars {
            let column = table.column(p.name()).unwrap();
            assert!(column.iter().all(|v| (p.min()..=p.max()).contains(v)));
            let distinct: HashSet<u64> = column.iter().map(|v| v.to_bits()).collect();
            assert_eq!(distinct.len(), column.len());
        }
    }

    #[test]
    fn test_same_seed_same_table() {
        let pars = parameters(2);
        let a = ParameterSampleTable::from_seed(&pars, 10, 0).unwrap();
        let b = ParameterSampleTable::from_seed(&pars, 10, 0).unwrap();
        let c = ParameterSampleTable::from_seed(&pars, 10, 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_rows_keep_column_identity() {
        let pars = parameters(2);
        let table = ParameterSampleTable::from_seed(&pars, 4, 3).unwrap();
        let p1 = table.column("p1").unwrap();
        for (i, value) in p1.iter().enumerate() {
            assert_eq!(table.row(i)[1], *value);
            let assigned: Vec<(&str, Float)> = table.assignments(i).collect();
            assert_eq!(assigned[1], ("p1", *value));
        }
    }

    #[test]
    fn test_parameter_limit() {
        assert!(ParameterSampleTable::from_seed(&parameters(31), 5, 0).is_ok());
        assert!(matches!(
            ParameterSampleTable::from_seed(&parameters(32), 5, 0),
            Err(RepfitError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_empty_range() {
        let fixed = vec![Parameter::constant("c", 1.0).unwrap()];
        assert_eq!(
            ParameterSampleTable::from_seed(&fixed, 1, 0).unwrap().row(0),
            &[1.0]
        );
        assert!(matches!(
            ParameterSampleTable::from_seed(&fixed, 2, 0),
            Err(RepfitError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_overflowing_range() {
        let wide = vec![Parameter::new("wide", 0.0, -Float::MAX, Float::MAX).unwrap()];
        assert!(matches!(
            ParameterSampleTable::from_seed(&wide, 3, 0),
            Err(RepfitError::ConfigurationError(_))
        ));
        // half the range still fits
        let half = vec![Parameter::new("half", 0.0, 0.0, Float::MAX).unwrap()];
        let column = ParameterSampleTable::from_seed(&half, 3, 0)
            .unwrap()
            .column("half")
            .unwrap();
        assert!(column.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_narrow_range_is_deduplicated() {
        // only a handful of representable values exist in this range
        let lo: Float = 1.0;
        let hi = lo + 4.0 * Float::EPSILON;
        let narrow = vec![Parameter::new("narrow", lo, lo, hi).unwrap()];
        let table = ParameterSampleTable::from_seed(&narrow, 3, 5).unwrap();
        let column = table.column("narrow").unwrap();
        let distinct: HashSet<u64> = column.iter().map(|v| v.to_bits()).collect();
        assert_eq!(distinct.len(), 3);
        assert!(matches!(
            ParameterSampleTable::from_seed(&narrow, 50, 5),
            Err(RepfitError::SamplingError { .. })
        ));
    }
}
