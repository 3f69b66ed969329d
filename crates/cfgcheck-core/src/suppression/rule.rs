//! Suppression rule representation and matching.

use crate::pattern;
use crate::types::{Finding, Location};

use std::path::PathBuf;

/// Which lines a rule covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSelector {
    /// Every line.
    Any,
    /// One line.
    Exact(usize),
    /// An inclusive range of lines.
    Range(usize, usize),
}

impl LineSelector {
    /// Parses `N`, `N-M`, or `*`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text == "*" {
            return Some(Self::Any);
        }
        if let Some((start, end)) = text.split_once('-') {
            let start: usize = start.trim().parse().ok()?;
            let end: usize = end.trim().parse().ok()?;
            return (start <= end).then_some(Self::Range(start, end));
        }
        text.parse().ok().map(Self::Exact)
    }

    /// Whether `line` is selected.
    #[must_use]
    pub fn contains(self, line: usize) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(n) => n == line,
            Self::Range(start, end) => (start..=end).contains(&line),
        }
    }
}

/// Where a rule applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Applies wherever its id, file, and line constraints match.
    Global,
    /// Applies to the whole of its file.
    File,
    /// Applies to the lines selected by the rule's line selector.
    Line,
    /// Applies from `open` to `close`, both inclusive.
    Block {
        /// Line of the begin marker.
        open: usize,
        /// Line of the end marker.
        close: usize,
    },
    /// Applies to findings produced by expanding the named macro.
    Macro(String),
}

/// Where a rule was declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A `--suppress` flag or a config file entry.
    CommandLine,
    /// A line of a suppression list or an entry of a structured file.
    SuppressionFile {
        /// Path of the file.
        path: PathBuf,
        /// Line of the entry.
        line: usize,
    },
    /// A marker comment in source code.
    Inline {
        /// Path of the source file.
        path: PathBuf,
        /// Line of the marker.
        line: usize,
    },
}

impl Origin {
    /// Location to report diagnostics about the rule at.
    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::CommandLine => Location::nowhere(),
            Self::SuppressionFile { path, line } | Self::Inline { path, line } => {
                Location::new(path.clone(), *line, 0)
            }
        }
    }
}

/// One parsed suppression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionRule {
    /// Finding identifier pattern (`*` suppresses everything).
    pub id: String,
    /// File pattern; `None` matches every file.
    pub file: Option<String>,
    /// Line constraint used by [`Scope::Global`] and [`Scope::Line`].
    pub lines: LineSelector,
    /// Symbol name pattern; `None` matches findings with or without a symbol.
    pub symbol: Option<String>,
    /// Scope kind.
    pub scope: Scope,
    /// Declaration site.
    pub origin: Origin,
}

impl SuppressionRule {
    /// Creates a global rule with no file, line, or symbol constraint.
    #[must_use]
    pub fn global(id: impl Into<String>, origin: Origin) -> Self {
        Self {
            id: id.into(),
            file: None,
            lines: LineSelector::Any,
            symbol: None,
            scope: Scope::Global,
            origin,
        }
    }

    /// Whether the rule was declared in source code.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        matches!(self.origin, Origin::Inline { .. })
    }

    /// Whether the rule suppresses `finding`.
    #[must_use]
    pub fn matches(&self, finding: &Finding) -> bool {
        if !pattern::matches(&self.id, &finding.id) {
            return false;
        }
        if let Some(symbol) = &self.symbol {
            match &finding.symbol {
                Some(name) if pattern::matches(symbol, name) => {}
                _ => return false,
            }
        }
        if let Some(file) = &self.file {
            if !pattern::matches(file, &finding.location.file.to_string_lossy()) {
                return false;
            }
        }

        let line = finding.location.line;
        match &self.scope {
            Scope::Global | Scope::Line => self.lines.contains(line),
            Scope::File => true,
            Scope::Block { open, close } => (*open..=*close).contains(&line),
            Scope::Macro(name) => finding.macro_expansion.as_deref() == Some(name.as_str()),
        }
    }

    /// Describes the rule in the plain `id[:file[:line]]` form.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut text = self.id.clone();
        if let Some(file) = &self.file {
            text.push(':');
            text.push_str(file);
            match self.lines {
                LineSelector::Any => {}
                LineSelector::Exact(n) => text.push_str(&format!(":{n}")),
                LineSelector::Range(a, b) => text.push_str(&format!(":{a}-{b}")),
            }
        }
        text
    }
}

/// Whether `id` is a valid identifier pattern.
///
/// Identifiers are letters, digits, `_`, `-`, `.`, plus the `*`/`?`
/// wildcards.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '*' | '?'))
}
