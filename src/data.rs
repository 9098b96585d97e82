#[cfg(feature = "rayon")]
use accurate::{sum::Klein, traits::*};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, ops::Index, sync::Arc};

use crate::{Float, RepfitError, RepfitResult};

/// A named observable with the range a [`Pdf`](crate::pdf::Pdf) is normalized over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observable {
    /// The name of the observable.
    pub name: String,
    /// The lower edge of the observable's range.
    pub min: Float,
    /// The upper edge of the observable's range.
    pub max: Float,
}

impl Observable {
    /// Create a new [`Observable`] over the range `[min, max]`.
    pub fn new(name: &str, min: Float, max: Float) -> Self {
        Self {
            name: name.to_string(),
            min,
            max,
        }
    }
    /// The width of the observable's range.
    pub fn width(&self) -> Float {
        self.max - self.min
    }
    /// Check whether a value lies within the observable's range.
    pub fn contains(&self, value: Float) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// A single measured (or generated) event.
///
/// The `values` are ordered the same way as the [`Observable`]s of the
/// [`Pdf`](crate::pdf::Pdf) the event is evaluated with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Values of each observable.
    pub values: Vec<Float>,
    /// The weight of this event.
    pub weight: Float,
}

impl Event {
    /// Create a new event with unit weight.
    pub fn new(values: Vec<Float>) -> Self {
        Self {
            values,
            weight: 1.0,
        }
    }
    /// Create a new event with the given weight.
    pub fn weighted(values: Vec<Float>, weight: Float) -> Self {
        Self { values, weight }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Event:")?;
        writeln!(f, "  values: {:?}", self.values)?;
        writeln!(f, "  weight: {}", self.weight)?;
        Ok(())
    }
}

/// A collection of [`Event`]s.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    /// The [`Event`]s contained in the [`Dataset`]
    pub events: Vec<Arc<Event>>,
}

impl Dataset {
    /// Create a new [`Dataset`] from a list of [`Event`]s.
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events: events.into_iter().map(Arc::new).collect(),
        }
    }
    /// Create a new [`Dataset`] from unweighted values of a single observable.
    pub fn from_values(values: &[Float]) -> Self {
        Self::new(values.iter().map(|&v| Event::new(vec![v])).collect())
    }
    /// The number of [`Event`]s in the [`Dataset`].
    pub fn len(&self) -> usize {
        self.events.len()
    }
    /// Checks whether or not the [`Dataset`] is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
    /// Produces an iterator over the [`Event`]s in the [`Dataset`].
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Event>> {
        self.events.iter()
    }
    /// Produces a parallelized iterator over the [`Event`]s in the [`Dataset`].
    #[cfg(feature = "rayon")]
    pub fn par_iter(&self) -> rayon::slice::Iter<'_, Arc<Event>> {
        self.events.par_iter()
    }
    /// Returns the sum of the weights for each [`Event`] in the [`Dataset`].
    #[cfg(feature = "rayon")]
    pub fn weighted_len(&self) -> Float {
        self.events
            .par_iter()
            .map(|e| e.weight)
            .parallel_sum_with_accumulator::<Klein<Float>>()
    }
    /// Returns the sum of the weights for each [`Event`] in the [`Dataset`].
    #[cfg(not(feature = "rayon"))]
    pub fn weighted_len(&self) -> Float {
        self.events.iter().map(|e| e.weight).sum()
    }
    /// Extract the values of the observable at `index` from every [`Event`].
    ///
    /// # Errors
    ///
    /// Returns [`RepfitError::EmptyDataset`] if the [`Dataset`] holds no events.
    pub fn column(&self, index: usize) -> RepfitResult<Vec<Float>> {
        if self.is_empty() {
            return Err(RepfitError::EmptyDataset);
        }
        Ok(self.events.iter().map(|e| e.values[index]).collect())
    }
}

impl Index<usize> for Dataset {
    type Output = Event;

    fn index(&self, index: usize) -> &Self::Output {
        &self.events[index]
    }
}

impl FromIterator<Event> for Dataset {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
