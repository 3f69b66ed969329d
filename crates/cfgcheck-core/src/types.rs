//! Core types for findings and run reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Severity level for findings.
///
/// Ordered from least to most severe so that `>=` comparisons express
/// "at least this severe" thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message about the analysis itself.
    Information,
    /// Code that may not behave the same on all platforms.
    Portability,
    /// Suboptimal code.
    Performance,
    /// Stylistic issue or dead code.
    Style,
    /// Suspicious code that is likely a bug.
    Warning,
    /// Definite bug.
    Error,
}

impl Severity {
    /// All severities, least severe first.
    pub const ALL: [Self; 6] = [
        Self::Information,
        Self::Portability,
        Self::Performance,
        Self::Style,
        Self::Warning,
        Self::Error,
    ];
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Information => write!(f, "information"),
            Self::Portability => write!(f, "portability"),
            Self::Performance => write!(f, "performance"),
            Self::Style => write!(f, "style"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "information" | "info" => Ok(Self::Information),
            "portability" => Ok(Self::Portability),
            "performance" => Ok(Self::Performance),
            "style" => Ok(Self::Style),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "unknown severity `{other}`, expected one of: error, warning, style, performance, portability, information"
            )),
        }
    }
}

/// Source code location.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Normalized unit path (`/` separators).
    pub file: PathBuf,
    /// Line number (1-indexed, 0 when the finding has no line).
    pub line: usize,
    /// Column number (1-indexed, 0 when unknown).
    pub column: usize,
}

impl Location {
    /// Creates a new location.
    #[must_use]
    pub fn new(file: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// A location that is not tied to any source file (command line, run-level).
    #[must_use]
    pub fn nowhere() -> Self {
        Self::new(PathBuf::new(), 0, 0)
    }
}

/// A secondary location on a finding's call stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    /// Where this step of the path is.
    pub location: Location,
    /// Explanation for this step.
    pub text: String,
}

impl Note {
    /// Creates a new note.
    #[must_use]
    pub fn new(location: Location, text: impl Into<String>) -> Self {
        Self {
            location,
            text: text.into(),
        }
    }
}

/// One diagnostic produced by a checker or by the control plane itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable identifier (e.g., "arrayIndexOutOfBounds").
    pub id: String,
    /// Severity of this finding.
    pub severity: Severity,
    /// Primary location.
    pub location: Location,
    /// Ordered secondary locations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub call_stack: Vec<Note>,
    /// Short message.
    pub message: String,
    /// Long message; renderers fall back to `message` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<String>,
    /// Whether the checker is unsure about this finding.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inconclusive: bool,
    /// Symbol the finding is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Coding standard rule violated (e.g., "MISRA 17.3").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_violation: Option<String>,
    /// Justification taken from a `REMARK:` comment in the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    /// Macro whose expansion produced the primary location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macro_expansion: Option<String>,
}

impl Finding {
    /// Creates a new finding.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        severity: Severity,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            location,
            call_stack: Vec::new(),
            message: message.into(),
            verbose: None,
            inconclusive: false,
            symbol: None,
            standard_violation: None,
            remark: None,
            macro_expansion: None,
        }
    }

    /// Adds a secondary location.
    #[must_use]
    pub fn with_note(mut self, note: Note) -> Self {
        self.call_stack.push(note);
        self
    }

    /// Sets the long message.
    #[must_use]
    pub fn with_verbose(mut self, verbose: impl Into<String>) -> Self {
        self.verbose = Some(verbose.into());
        self
    }

    /// Marks the finding as inconclusive.
    #[must_use]
    pub fn inconclusive(mut self) -> Self {
        self.inconclusive = true;
        self
    }

    /// Sets the symbol name.
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Sets the violated standard rule.
    #[must_use]
    pub fn with_standard_violation(mut self, code: impl Into<String>) -> Self {
        self.standard_violation = Some(code.into());
        self
    }

    /// Records the macro whose expansion produced the primary location.
    #[must_use]
    pub fn from_macro(mut self, name: impl Into<String>) -> Self {
        self.macro_expansion = Some(name.into());
        self
    }

    /// Returns the long message, falling back to the short one.
    #[must_use]
    pub fn verbose_message(&self) -> &str {
        self.verbose.as_deref().unwrap_or(&self.message)
    }

    /// Key used to recognise the same finding reached more than once.
    #[must_use]
    pub fn dedup_key(&self) -> (&str, &Location, &str) {
        (&self.id, &self.location, &self.message)
    }

    /// Formats the finding for terminal output.
    #[must_use]
    pub fn format(&self) -> String {
        use std::fmt::Write;
        let mut output = format!(
            "{}:{}:{}: {}: {} [{}]\n",
            self.location.file.display(),
            self.location.line,
            self.location.column,
            self.severity,
            self.message,
            self.id,
        );
        if self.inconclusive {
            let _ = writeln!(output, "  = note: inconclusive");
        }
        for note in &self.call_stack {
            let _ = writeln!(
                output,
                "  = {}:{}: {}",
                note.location.file.display(),
                note.location.line,
                note.text
            );
        }
        if let Some(code) = &self.standard_violation {
            let _ = writeln!(output, "  = violates: {code}");
        }
        if let Some(remark) = &self.remark {
            let _ = writeln!(output, "  = remark: {remark}");
        }
        output
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}: {} [{}] {}",
            self.location.file.display(),
            self.location.line,
            self.location.column,
            self.severity,
            self.id,
            self.message
        )
    }
}

/// Final result of one pipeline run.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Report {
    /// Filtered findings in stable order.
    pub findings: Vec<Finding>,
    /// Number of units analyzed.
    pub units_checked: usize,
    /// Number of (unit, configuration) passes, cached or fresh.
    pub configurations_checked: usize,
    /// Passes answered from the analysis cache.
    pub cache_hits: usize,
    /// Passes that had to invoke the checker.
    pub cache_misses: usize,
    /// Findings removed by suppression rules.
    pub suppressed: usize,
}

impl Report {
    /// Creates a new empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    /// Checks if any findings meet or exceed the given severity threshold.
    #[must_use]
    pub fn has_findings_at(&self, severity: Severity) -> bool {
        self.findings.iter().any(|f| f.severity >= severity)
    }

    /// Counts findings by severity, omitting severities with no findings.
    #[must_use]
    pub fn count_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for finding in &self.findings {
            *counts.entry(finding.severity).or_insert(0) += 1;
        }
        counts
    }

    /// One-line summary of the run.
    #[must_use]
    pub fn summary(&self) -> String {
        let counts = self.count_by_severity();
        let by_severity = Severity::ALL
            .iter()
            .rev()
            .filter_map(|s| counts.get(s).map(|n| format!("{n} {s}")))
            .collect::<Vec<_>>();
        let by_severity = if by_severity.is_empty() {
            "no findings".to_string()
        } else {
            by_severity.join(", ")
        };
        format!(
            "{by_severity} in {} unit(s), {} configuration(s) ({} cached), {} suppressed",
            self.units_checked, self.configurations_checked, self.cache_hits, self.suppressed
        )
    }
}
