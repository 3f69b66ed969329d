//! Preprocessor configuration enumeration.
//!
//! One textual unit may represent many programs depending on which macros
//! are defined. The [`ConfigurationEnumerator`] decides which macro states a
//! unit is analyzed under.

use crate::preprocessor::is_identifier;
use crate::types::{Finding, Location, Severity};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;

/// Default number of configurations analyzed per unit.
pub const DEFAULT_MAX_CONFIGS: usize = 12;

/// Upper bound when `force` is set without an explicit bound.
pub const FORCE_CONFIG_CEILING: usize = 4096;

/// Identifier of findings about malformed `-D`/`-U` values.
pub const CONFIGURATION_ERROR_ID: &str = "configurationError";

/// Canonical, order-independent encoding of an effective macro state.
///
/// Only defined macros are encoded: an undefined macro and an absent one are
/// the same state. A define without a value is encoded as `=1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigurationSignature(String);

impl ConfigurationSignature {
    /// Returns the canonical text (e.g., `"A=1;DEBUG=2"`).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConfigurationSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One concrete macro state a unit is analyzed under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    /// Defined macros and their values.
    pub defines: BTreeMap<String, String>,
    /// Conditional variables known to be undefined in this pass.
    pub undefined: BTreeSet<String>,
}

impl Configuration {
    /// Canonical signature of this configuration.
    #[must_use]
    pub fn signature(&self) -> ConfigurationSignature {
        ConfigurationSignature(
            self.defines
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(";"),
        )
    }

    /// Whether `name` is defined.
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }

    /// Value of a defined macro.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.defines.get(name).map(String::as_str)
    }
}

/// Malformed `-D` or `-U` value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A `-D` entry is not `NAME` or `NAME=VALUE`.
    #[error("invalid define `{0}`: expected NAME or NAME=VALUE")]
    InvalidDefine(String),

    /// A `-U` entry is not an identifier.
    #[error("invalid undefine `{0}`: expected a macro name")]
    InvalidUndefine(String),
}

impl ConfigurationError {
    /// Reports this error as a run-level finding.
    #[must_use]
    pub fn to_finding(&self) -> Finding {
        Finding::new(
            CONFIGURATION_ERROR_ID,
            Severity::Error,
            Location::nowhere(),
            self.to_string(),
        )
    }
}

/// Macro state forced from the command line or configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForcedMacros {
    defines: BTreeMap<String, String>,
    undefines: BTreeSet<String>,
}

impl ForcedMacros {
    /// Parses `-D` and `-U` values.
    ///
    /// A `-D` value may hold several entries separated by `;`. Malformed
    /// entries are dropped and returned as errors. A name that is both
    /// defined and undefined ends up undefined.
    pub fn parse<D, U>(defines: D, undefines: U) -> (Self, Vec<ConfigurationError>)
    where
        D: IntoIterator,
        D::Item: AsRef<str>,
        U: IntoIterator,
        U::Item: AsRef<str>,
    {
        let mut forced = Self::default();
        let mut errors = Vec::new();

        for value in defines {
            for entry in value.as_ref().split(';').map(str::trim) {
                if entry.is_empty() {
                    continue;
                }
                let (name, macro_value) = match entry.split_once('=') {
                    Some((name, v)) => (name.trim(), v.trim()),
                    None => (entry, "1"),
                };
                if is_identifier(name) {
                    forced.defines.insert(name.to_string(), macro_value.to_string());
                } else {
                    errors.push(ConfigurationError::InvalidDefine(entry.to_string()));
                }
            }
        }

        for value in undefines {
            let name = value.as_ref().trim();
            if is_identifier(name) {
                forced.undefines.insert(name.to_string());
            } else {
                errors.push(ConfigurationError::InvalidUndefine(name.to_string()));
            }
        }

        for name in &forced.undefines {
            if forced.defines.remove(name).is_some() {
                warn!("Macro {name} is both defined and undefined; treating it as undefined");
            }
        }

        (forced, errors)
    }

    /// Whether any `-D` value was given.
    #[must_use]
    pub fn has_defines(&self) -> bool {
        !self.defines.is_empty()
    }

    fn is_forced(&self, name: &str) -> bool {
        self.defines.contains_key(name) || self.undefines.contains(name)
    }
}

/// Produces the ordered list of configurations to analyze for a unit.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationEnumerator {
    forced: ForcedMacros,
    force: bool,
    max_configs: Option<usize>,
}

impl ConfigurationEnumerator {
    /// Creates an enumerator.
    ///
    /// `max_configs` is the explicit bound, `None` for the default.
    #[must_use]
    pub fn new(forced: ForcedMacros, force: bool, max_configs: Option<usize>) -> Self {
        Self {
            forced,
            force,
            max_configs,
        }
    }

    /// Effective maximum number of configurations per unit.
    #[must_use]
    pub fn bound(&self) -> usize {
        match self.max_configs {
            Some(n) => n.max(1),
            None if self.force => FORCE_CONFIG_CEILING,
            None if self.forced.has_defines() => 1,
            None => DEFAULT_MAX_CONFIGS,
        }
    }

    /// Enumerates configurations for a unit's conditional variables.
    ///
    /// The first configuration is always the forced state with every free
    /// variable undefined. It is followed by configurations defining more
    /// free variables before those defining fewer; ties are ordered
    /// lexicographically by variable name. An empty variable set yields
    /// exactly one configuration.
    #[must_use]
    pub fn enumerate(&self, conditionals: &BTreeSet<String>) -> Vec<Configuration> {
        let free: Vec<&str> = conditionals
            .iter()
            .map(String::as_str)
            .filter(|name| !self.forced.is_forced(name))
            .collect();
        let bound = self.bound();

        let mut result = Vec::new();
        let sizes = std::iter::once(0).chain((1..=free.len()).rev());
        'sizes: for size in sizes {
            for chosen in Combinations::new(free.len(), size) {
                if result.len() >= bound {
                    break 'sizes;
                }
                result.push(self.configuration(&free, &chosen));
            }
        }

        result
    }

    fn configuration(&self, free: &[&str], chosen: &[usize]) -> Configuration {
        let mut defines = self.forced.defines.clone();
        let mut undefined = self.forced.undefines.clone();
        for (index, name) in free.iter().enumerate() {
            if chosen.contains(&index) {
                defines.insert((*name).to_string(), "1".to_string());
            } else {
                undefined.insert((*name).to_string());
            }
        }
        Configuration { defines, undefined }
    }
}

/// Lexicographic `k`-combinations of `0..n`, generated lazily.
struct Combinations {
    n: usize,
    current: Option<Vec<usize>>,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            current: (k <= n).then(|| (0..k).collect()),
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current.take()?;
        let k = current.len();

        // Advance the rightmost index that still has room.
        let mut next = current.clone();
        let mut i = k;
        while i > 0 {
            i -= 1;
            if next[i] < self.n - k + i {
                next[i] += 1;
                for j in i + 1..k {
                    next[j] = next[j - 1] + 1;
                }
                self.current = Some(next);
                break;
            }
        }

        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn signatures(configs: &[Configuration]) -> Vec<String> {
        configs.iter().map(|c| c.signature().to_string()).collect()
    }

    fn forced(defines: &[&str], undefines: &[&str]) -> ForcedMacros {
        let (forced, errors) = ForcedMacros::parse(defines, undefines);
        assert!(errors.is_empty(), "{errors:?}");
        forced
    }

    #[test]
    fn test_combinations_lexicographic() {
        let all: Vec<Vec<usize>> = Combinations::new(4, 2).collect();
        assert_eq!(
            all,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert_eq!(Combinations::new(3, 0).count(), 1);
        assert_eq!(Combinations::new(2, 3).count(), 0);
    }

    #[test]
    fn test_empty_conditionals_yield_one_configuration() {
        let configs = ConfigurationEnumerator::default().enumerate(&BTreeSet::new());
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].signature().as_str(), "");
    }

    #[test]
    fn test_default_ordering() {
        let configs = ConfigurationEnumerator::default().enumerate(&vars(&["B", "A"]));
        let sigs = signatures(&configs);
        insta::assert_snapshot!(format!("{sigs:?}"), @r#"["", "A=1;B=1", "A=1", "B=1"]"#);
        assert!(configs[2].undefined.contains("B"));
    }

    #[test]
    fn test_default_bound_caps_output() {
        let names: Vec<String> = (0..8).map(|i| format!("V{i}")).collect();
        let configs = ConfigurationEnumerator::default().enumerate(&names.into_iter().collect());
        assert_eq!(configs.len(), DEFAULT_MAX_CONFIGS);
        // Baseline, all eight defined, then the size-seven subsets.
        assert_eq!(configs[1].defines.len(), 8);
        assert_eq!(configs[2].defines.len(), 7);
    }

    #[test]
    fn test_enumeration_is_deterministic() {
        let enumerator = ConfigurationEnumerator::default();
        let input = vars(&["X", "DEBUG", "WIN32", "HAVE_FOO"]);
        assert_eq!(enumerator.enumerate(&input), enumerator.enumerate(&input));
    }

    #[test]
    fn test_forced_defines_yield_single_configuration() {
        let enumerator =
            ConfigurationEnumerator::new(forced(&["DEBUG=2"], &["NDEBUG"]), false, None);
        let configs = enumerator.enumerate(&vars(&["DEBUG", "NDEBUG", "OTHER"]));
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].signature().as_str(), "DEBUG=2");
        assert!(configs[0].undefined.contains("NDEBUG"));
    }

    #[test]
    fn test_force_enumerates_consistent_combinations() {
        let enumerator = ConfigurationEnumerator::new(forced(&["A"], &["C"]), true, None);
        let configs = enumerator.enumerate(&vars(&["A", "B", "C", "D"]));
        assert_eq!(
            signatures(&configs),
            vec!["A=1", "A=1;B=1;D=1", "A=1;B=1", "A=1;D=1"]
        );
        assert!(configs.iter().all(|c| !c.is_defined("C")));
    }

    #[test]
    fn test_bound_selection() {
        let none = ForcedMacros::default;
        assert_eq!(ConfigurationEnumerator::default().bound(), DEFAULT_MAX_CONFIGS);
        assert_eq!(
            ConfigurationEnumerator::new(none(), true, None).bound(),
            FORCE_CONFIG_CEILING
        );
        assert_eq!(
            ConfigurationEnumerator::new(forced(&["A"], &[]), true, None).bound(),
            FORCE_CONFIG_CEILING
        );
        assert_eq!(
            ConfigurationEnumerator::new(forced(&["A"], &[]), false, None).bound(),
            1
        );
        assert_eq!(ConfigurationEnumerator::new(none(), true, Some(0)).bound(), 1);
    }

    #[test]
    fn test_explicit_bound_with_defines() {
        let enumerator = ConfigurationEnumerator::new(forced(&["A"], &[]), false, Some(2));
        let configs = enumerator.enumerate(&vars(&["A", "B", "C"]));
        assert_eq!(signatures(&configs), vec!["A=1", "A=1;B=1;C=1"]);
    }

    #[test]
    fn test_signature_is_order_independent() {
        let first = forced(&["B=2;A"], &[]);
        let second = forced(&["A=1", "B=2"], &[]);
        let a = ConfigurationEnumerator::new(first, false, None).enumerate(&BTreeSet::new());
        let b = ConfigurationEnumerator::new(second, false, None).enumerate(&BTreeSet::new());
        assert_eq!(a[0].signature(), b[0].signature());
    }

    #[test]
    fn test_parse_reports_malformed_entries() {
        let (forced, errors) = ForcedMacros::parse(["OK=1;1BAD", "=3"], ["", "X-Y"]);
        assert!(forced.has_defines());
        assert_eq!(errors.len(), 4);
        assert_eq!(
            errors[0],
            ConfigurationError::InvalidDefine("1BAD".to_string())
        );
        assert_eq!(errors[0].to_finding().id, CONFIGURATION_ERROR_ID);
    }

    #[test]
    fn test_undefine_wins_over_define() {
        let (forced, _) = ForcedMacros::parse(["A"], ["A"]);
        assert!(!forced.has_defines());
    }
}
