//! The checker collaborator.
//!
//! The control plane never inspects code semantics itself. It hands each
//! (unit, configuration) pass to a [`Checker`] and consumes the findings and
//! whole-program observations it returns.

use crate::configuration::{Configuration, ConfigurationSignature};
use crate::template_guard::{TemplateExpansionGuard, DEFAULT_TEMPLATE_RECURSION};
use crate::types::{Finding, Location, Severity};
use crate::unit::SourceUnit;
use crate::whole_program::WholeProgramPartial;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Identifier of findings about failed checker passes.
pub const INTERNAL_ERROR_ID: &str = "internalError";

/// Default if-count threshold forwarded to checkers.
pub const DEFAULT_MAX_IF_COUNT: usize = 100;

/// How deep the checker's dataflow analysis goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    /// Fastest, least thorough.
    Reduced,
    /// The default.
    #[default]
    Normal,
    /// Slowest, most thorough.
    Exhaustive,
}

impl std::fmt::Display for CheckLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reduced => write!(f, "reduced"),
            Self::Normal => write!(f, "normal"),
            Self::Exhaustive => write!(f, "exhaustive"),
        }
    }
}

impl std::str::FromStr for CheckLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reduced" => Ok(Self::Reduced),
            "normal" => Ok(Self::Normal),
            "exhaustive" => Ok(Self::Exhaustive),
            other => Err(format!(
                "unknown check level `{other}`, expected reduced, normal, or exhaustive"
            )),
        }
    }
}

/// Knobs the checker honors but the control plane does not implement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerSettings {
    /// Dataflow depth.
    pub check_level: CheckLevel,
    /// Per-function cap on conditional branches explored.
    pub max_if_count: usize,
    /// Template instantiation depth bound.
    pub template_recursion: usize,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            check_level: CheckLevel::default(),
            max_if_count: DEFAULT_MAX_IF_COUNT,
            template_recursion: DEFAULT_TEMPLATE_RECURSION,
        }
    }
}

/// Everything a checker gets for one pass.
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    /// The unit being analyzed.
    pub unit: &'a SourceUnit,
    /// The macro state of this pass.
    pub configuration: &'a Configuration,
    /// Run-wide settings.
    pub settings: &'a CheckerSettings,
}

impl PassContext<'_> {
    /// Signature of the active configuration.
    #[must_use]
    pub fn signature(&self) -> ConfigurationSignature {
        self.configuration.signature()
    }

    /// Reads a file belonging to the unit.
    ///
    /// # Errors
    ///
    /// Returns [`CheckerFailure::Io`] if the file cannot be read.
    pub fn read(&self, path: &Path) -> Result<String, CheckerFailure> {
        std::fs::read(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .map_err(|source| CheckerFailure::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Output of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitAnalysis {
    /// Raw findings.
    pub findings: Vec<Finding>,
    /// Observations that only make sense across units.
    pub partial: WholeProgramPartial,
}

/// A checker pass that could not complete.
#[derive(Debug, Error)]
pub enum CheckerFailure {
    /// A unit file disappeared or became unreadable mid-run.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The checker gave up for a reason of its own.
    #[error("{0}")]
    Internal(String),
}

impl CheckerFailure {
    /// Reports the failure as an `internalError` finding on the unit.
    #[must_use]
    pub fn to_finding(&self, unit: &Path, signature: &ConfigurationSignature) -> Finding {
        Finding::new(
            INTERNAL_ERROR_ID,
            Severity::Error,
            Location::new(unit, 0, 0),
            format!("Analysis failed under configuration [{signature}]: {self}"),
        )
    }
}

/// An analyzer the pipeline drives once per (unit, configuration).
///
/// # Example
///
/// ```ignore
/// use cfgcheck_core::{Checker, CheckerFailure, PassContext, TemplateExpansionGuard, UnitAnalysis};
///
/// pub struct Nothing;
///
/// impl Checker for Nothing {
///     fn name(&self) -> &'static str { "nothing" }
///     fn version(&self) -> &'static str { "1" }
///
///     fn analyze(
///         &self,
///         _ctx: &PassContext<'_>,
///         _guard: &mut TemplateExpansionGuard,
///     ) -> Result<UnitAnalysis, CheckerFailure> {
///         Ok(UnitAnalysis::default())
///     }
/// }
/// ```
pub trait Checker: Send + Sync {
    /// Returns the checker's name.
    fn name(&self) -> &'static str;

    /// Returns the checker's version; part of the cache key.
    fn version(&self) -> &'static str;

    /// Analyzes one unit under one configuration.
    ///
    /// `guard` is fresh for every pass.
    ///
    /// # Errors
    ///
    /// Returns a [`CheckerFailure`] when the pass cannot complete. The
    /// pipeline reports it and continues with the next pass.
    fn analyze(
        &self,
        ctx: &PassContext<'_>,
        guard: &mut TemplateExpansionGuard,
    ) -> Result<UnitAnalysis, CheckerFailure>;

    /// Turns the merged whole-program fact into findings. Called once, after
    /// every unit has been analyzed.
    fn conclude(&self, _fact: &WholeProgramPartial) -> Vec<Finding> {
        Vec::new()
    }
}

/// Type alias for boxed `Checker` trait objects.
pub type CheckerBox = Box<dyn Checker>;

/// Tag identifying the checker build and settings that produced a result.
#[must_use]
pub fn version_tag(checker: &dyn Checker, settings: &CheckerSettings) -> String {
    format!(
        "{}@{};level={};max-if={};templates={}",
        checker.name(),
        checker.version(),
        settings.check_level,
        settings.max_if_count,
        settings.template_recursion
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    impl Checker for Nothing {
        fn name(&self) -> &'static str {
            "nothing"
        }
        fn version(&self) -> &'static str {
            "0.1"
        }
        fn analyze(
            &self,
            _ctx: &PassContext<'_>,
            _guard: &mut TemplateExpansionGuard,
        ) -> Result<UnitAnalysis, CheckerFailure> {
            Ok(UnitAnalysis::default())
        }
    }

    #[test]
    fn test_version_tag_tracks_settings() {
        let default = version_tag(&Nothing, &CheckerSettings::default());
        assert_eq!(default, "nothing@0.1;level=normal;max-if=100;templates=100");

        let exhaustive = CheckerSettings {
            check_level: CheckLevel::Exhaustive,
            ..CheckerSettings::default()
        };
        assert_ne!(version_tag(&Nothing, &exhaustive), default);
    }

    #[test]
    fn test_check_level_parse() {
        assert_eq!("reduced".parse::<CheckLevel>(), Ok(CheckLevel::Reduced));
        assert!("deep".parse::<CheckLevel>().is_err());
    }

    #[test]
    fn test_failure_finding() {
        let failure = CheckerFailure::Internal("boom".to_string());
        let finding = failure.to_finding(Path::new("src/a.c"), &ConfigurationSignature::default());
        assert_eq!(finding.id, INTERNAL_ERROR_ID);
        assert_eq!(finding.severity, Severity::Error);
        assert_eq!(finding.location.file, PathBuf::from("src/a.c"));
        assert!(finding.message.contains("boom"));
    }

    #[test]
    fn test_default_conclude_is_empty() {
        assert!(Nothing.conclude(&WholeProgramPartial::new()).is_empty());
    }
}
