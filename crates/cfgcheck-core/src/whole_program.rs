//! Cross-unit facts.
//!
//! Every unit contributes a [`WholeProgramPartial`]; the pipeline folds them
//! into a [`WholeProgramAccumulator`] and only reads the result once every
//! scheduled unit has submitted.

use crate::types::Location;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// What one unit observed about program-wide symbols.
///
/// Merging is a set union, so it is commutative, associative, and
/// idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WholeProgramPartial {
    /// Symbols defined by the unit, with every definition site.
    #[serde(default)]
    pub definitions: BTreeMap<String, BTreeSet<Location>>,
    /// Symbols the unit references.
    #[serde(default)]
    pub uses: BTreeSet<String>,
}

impl WholeProgramPartial {
    /// Creates an empty partial.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a definition site.
    pub fn define(&mut self, symbol: impl Into<String>, location: Location) {
        self.definitions
            .entry(symbol.into())
            .or_default()
            .insert(location);
    }

    /// Records a reference.
    pub fn reference(&mut self, symbol: impl Into<String>) {
        self.uses.insert(symbol.into());
    }

    /// Folds `other` into `self`.
    pub fn merge(&mut self, other: Self) {
        for (symbol, sites) in other.definitions {
            self.definitions.entry(symbol).or_default().extend(sites);
        }
        self.uses.extend(other.uses);
    }

    /// Whether nothing was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty() && self.uses.is_empty()
    }
}

/// The accumulator was read before every unit submitted.
#[derive(Debug, Error)]
#[error("whole-program barrier not reached: {submitted} of {expected} unit(s) submitted")]
pub struct BarrierError {
    /// Units scheduled in the run.
    pub expected: usize,
    /// Units that submitted a partial.
    pub submitted: usize,
}

#[derive(Debug, Default)]
struct State {
    merged: WholeProgramPartial,
    submitted: usize,
}

/// Shared accumulator for per-unit partials.
///
/// Workers call [`submit`](Self::submit) concurrently; the merged fact is
/// released by [`seal`](Self::seal) only when the expected number of units
/// has submitted.
#[derive(Debug)]
pub struct WholeProgramAccumulator {
    expected: usize,
    state: Mutex<State>,
}

impl WholeProgramAccumulator {
    /// Creates an accumulator waiting for `expected` units.
    #[must_use]
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            state: Mutex::new(State::default()),
        }
    }

    /// Adds one unit's partial.
    pub fn submit(&self, partial: WholeProgramPartial) {
        let mut state = self.state.lock();
        state.merged.merge(partial);
        state.submitted += 1;
    }

    /// Number of units that have submitted so far.
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.state.lock().submitted
    }

    /// Returns the merged fact.
    ///
    /// # Errors
    ///
    /// Returns an error if the number of submissions differs from the number
    /// of units the accumulator was created for.
    pub fn seal(self) -> Result<WholeProgramPartial, BarrierError> {
        let state = self.state.into_inner();
        if state.submitted == self.expected {
            Ok(state.merged)
        } else {
            Err(BarrierError {
                expected: self.expected,
                submitted: state.submitted,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn partial(unit: &str, defines: &[&str], uses: &[&str]) -> WholeProgramPartial {
        let mut p = WholeProgramPartial::new();
        for (i, d) in defines.iter().enumerate() {
            p.define(*d, Location::new(unit, i + 1, 9));
        }
        for u in uses {
            p.reference(*u);
        }
        p
    }

    fn samples() -> Vec<WholeProgramPartial> {
        vec![
            partial("a.c", &["A", "SHARED"], &["B"]),
            partial("b.c", &["B"], &["SHARED"]),
            partial("c.h", &["SHARED", "C"], &[]),
        ]
    }

    #[test]
    fn test_merge_is_order_independent() {
        let orders = [[0, 1, 2], [2, 1, 0], [1, 0, 2], [2, 0, 1]];
        let results: Vec<_> = orders
            .iter()
            .map(|order| {
                let parts = samples();
                let mut merged = WholeProgramPartial::new();
                for &i in order {
                    merged.merge(parts[i].clone());
                }
                merged
            })
            .collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(results[0].definitions["SHARED"].len(), 2);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut merged = samples().remove(0);
        merged.merge(samples().remove(0));
        assert_eq!(merged, samples().remove(0));
    }

    #[test]
    fn test_concurrent_submission() {
        let accumulator = WholeProgramAccumulator::new(3);
        samples()
            .into_par_iter()
            .for_each(|p| accumulator.submit(p));
        assert_eq!(accumulator.submitted(), 3);

        let mut expected = WholeProgramPartial::new();
        for p in samples() {
            expected.merge(p);
        }
        assert_eq!(accumulator.seal().unwrap(), expected);
    }

    #[test]
    fn test_seal_before_barrier_fails() {
        let accumulator = WholeProgramAccumulator::new(2);
        accumulator.submit(WholeProgramPartial::new());
        let err = accumulator.seal().unwrap_err();
        assert_eq!((err.expected, err.submitted), (2, 1));
    }
}
