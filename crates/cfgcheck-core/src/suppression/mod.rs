//! Suppression rules from command-line flags, list files, structured files,
//! and inline source markers.
//!
//! All rule sources are parsed once into a [`SuppressionRegistry`] before the
//! run starts. Inline markers are scanned per file into an [`InlineIndex`]
//! while units are analyzed; both are consulted together when the final
//! finding stream is filtered.

pub mod inline;
pub mod plain;
pub mod rule;
pub mod xml;

pub use inline::InlineSuppressions;
pub use rule::{LineSelector, Origin, Scope, SuppressionRule};

use crate::pattern;
use crate::types::{Finding, Severity};

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Identifier of findings about malformed suppressions.
pub const INVALID_SUPPRESSION_ID: &str = "invalidSuppression";

/// Identifier of findings about suppressions that matched nothing.
pub const UNMATCHED_SUPPRESSION_ID: &str = "unmatchedSuppression";

/// A malformed suppression rule or marker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SuppressionError {
    /// Where the rule was declared.
    pub origin: Origin,
    /// What is wrong with it.
    pub message: String,
}

impl SuppressionError {
    pub(crate) fn new(origin: Origin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
        }
    }

    /// Converts the error into an `invalidSuppression` finding.
    #[must_use]
    pub fn to_finding(&self) -> Finding {
        Finding::new(
            INVALID_SUPPRESSION_ID,
            Severity::Error,
            self.origin.location(),
            self.message.clone(),
        )
    }
}

/// Builder for a [`SuppressionRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    rules: Vec<SuppressionRule>,
    errors: Vec<SuppressionError>,
    inline: bool,
    report_unused: bool,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one `id[:file[:line]]` rule given on the command line.
    #[must_use]
    pub fn command_line(mut self, text: &str) -> Self {
        match plain::parse_rule(text, Origin::CommandLine) {
            Ok(Some(rule)) => self.rules.push(rule),
            Ok(None) => {}
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Adds the rules of a plain-text suppression list.
    #[must_use]
    pub fn plain_text(mut self, path: &Path, content: &str) -> Self {
        let (rules, errors) = plain::parse_list(path, content);
        self.rules.extend(rules);
        self.errors.extend(errors);
        self
    }

    /// Adds the rules of a structured suppression document.
    #[must_use]
    pub fn xml(mut self, path: &Path, content: &str) -> Self {
        let (rules, errors) = xml::parse(path, content);
        self.rules.extend(rules);
        self.errors.extend(errors);
        self
    }

    /// Reads and adds a plain-text suppression list. An unreadable file is
    /// recorded as a malformed suppression.
    #[must_use]
    pub fn plain_text_file(self, path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => self.plain_text(path, &content),
            Err(e) => self.unreadable(path, &e),
        }
    }

    /// Reads and adds a structured suppression document.
    #[must_use]
    pub fn xml_file(self, path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => self.xml(path, &content),
            Err(e) => self.unreadable(path, &e),
        }
    }

    fn unreadable(mut self, path: &Path, error: &std::io::Error) -> Self {
        let origin = Origin::SuppressionFile {
            path: path.to_path_buf(),
            line: 0,
        };
        self.errors.push(SuppressionError::new(
            origin,
            format!("failed to read suppression file: {error}"),
        ));
        self
    }

    /// Adds an already parsed rule.
    #[must_use]
    pub fn rule(mut self, rule: SuppressionRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Sets whether inline markers suppress findings (default: false).
    #[must_use]
    pub fn inline(mut self, enabled: bool) -> Self {
        self.inline = enabled;
        self
    }

    /// Sets whether rules that suppress nothing are reported (default: false).
    #[must_use]
    pub fn report_unused(mut self, enabled: bool) -> Self {
        self.report_unused = enabled;
        self
    }

    /// Builds the registry.
    #[must_use]
    pub fn build(self) -> SuppressionRegistry {
        debug!(
            "Suppression registry: {} rule(s), {} malformed",
            self.rules.len(),
            self.errors.len()
        );
        SuppressionRegistry {
            rules: self.rules,
            errors: self.errors,
            inline: self.inline,
            report_unused: self.report_unused,
        }
    }
}

/// Immutable set of suppression rules for one run.
#[derive(Debug, Default)]
pub struct SuppressionRegistry {
    rules: Vec<SuppressionRule>,
    errors: Vec<SuppressionError>,
    inline: bool,
    report_unused: bool,
}

/// Inline markers of every file scanned during a run.
#[derive(Debug, Default)]
pub struct InlineIndex {
    rules: Vec<SuppressionRule>,
    by_file: BTreeMap<PathBuf, Vec<usize>>,
    macros: Vec<usize>,
    remarks: BTreeMap<PathBuf, BTreeMap<usize, String>>,
    errors: Vec<SuppressionError>,
}

impl InlineIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` was already scanned.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.by_file.contains_key(path)
    }

    /// Records the scan of one file. Scanning the same file twice keeps the
    /// first result.
    pub fn insert(&mut self, path: PathBuf, scan: InlineSuppressions) {
        if self.contains(&path) {
            return;
        }
        let mut indices = Vec::new();
        for rule in scan.rules {
            let index = self.rules.len();
            if matches!(rule.scope, Scope::Macro(_)) {
                self.macros.push(index);
            } else {
                indices.push(index);
            }
            self.rules.push(rule);
        }
        self.by_file.insert(path.clone(), indices);
        if !scan.remarks.is_empty() {
            self.remarks.insert(path, scan.remarks);
        }
        self.errors.extend(scan.errors);
    }

    /// Sets each finding's remark from a `REMARK:` comment on its line.
    pub fn attach_remarks(&self, findings: &mut [Finding]) {
        for finding in findings {
            if finding.remark.is_some() {
                continue;
            }
            finding.remark = self
                .remarks
                .get(&finding.location.file)
                .and_then(|remarks| remarks.get(&finding.location.line))
                .cloned();
        }
    }

    /// Malformed markers found while scanning.
    pub fn errors(&self) -> impl Iterator<Item = &SuppressionError> {
        self.errors.iter()
    }

    /// Number of rules declared inline.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn candidates<'a>(&'a self, finding: &Finding) -> impl Iterator<Item = usize> + 'a {
        self.by_file
            .get(&finding.location.file)
            .into_iter()
            .flatten()
            .chain(self.macros.iter())
            .copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RuleRef {
    Registry(usize),
    Inline(usize),
}

/// Result of filtering a finding stream.
#[derive(Debug, Default)]
pub struct Filtered {
    /// Findings that no rule suppressed.
    pub kept: Vec<Finding>,
    /// Number of findings removed.
    pub suppressed: usize,
}

impl SuppressionRegistry {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Parsed rules, excluding inline markers.
    #[must_use]
    pub fn rules(&self) -> &[SuppressionRule] {
        &self.rules
    }

    /// Whether inline markers suppress findings.
    #[must_use]
    pub fn inline_enabled(&self) -> bool {
        self.inline
    }

    /// `invalidSuppression` findings for rules dropped while building the
    /// registry and for malformed inline markers.
    #[must_use]
    pub fn diagnostics(&self, inline: &InlineIndex) -> Vec<Finding> {
        self.errors
            .iter()
            .chain(inline.errors())
            .map(SuppressionError::to_finding)
            .collect()
    }

    fn matching<'a>(
        &'a self,
        finding: &'a Finding,
        inline: &'a InlineIndex,
    ) -> impl Iterator<Item = RuleRef> + 'a {
        let registry = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.matches(finding))
            .map(|(i, _)| RuleRef::Registry(i));
        let inline_rules = self
            .inline
            .then(|| inline.candidates(finding))
            .into_iter()
            .flatten()
            .filter(|&i| inline.rules[i].matches(finding))
            .map(RuleRef::Inline);
        registry.chain(inline_rules)
    }

    /// Whether at least one rule suppresses `finding`.
    #[must_use]
    pub fn is_suppressed(&self, finding: &Finding, inline: &InlineIndex) -> bool {
        self.matching(finding, inline).next().is_some()
    }

    /// Removes suppressed findings from the stream.
    ///
    /// When unused-suppression reporting is enabled, rules that suppressed
    /// nothing add an `unmatchedSuppression` finding, which is itself
    /// subject to the registry.
    #[must_use]
    pub fn filter(&self, findings: Vec<Finding>, inline: &InlineIndex) -> Filtered {
        let mut used = HashSet::new();
        let mut result = Filtered::default();

        for finding in findings {
            let before = used.len();
            let mut hit = false;
            for rule in self.matching(&finding, inline) {
                hit = true;
                used.insert(rule);
            }
            if hit {
                debug!(
                    "Suppressed {} at {}:{} ({} new rule match(es))",
                    finding.id,
                    finding.location.file.display(),
                    finding.location.line,
                    used.len() - before
                );
                result.suppressed += 1;
            } else {
                result.kept.push(finding);
            }
        }

        if self.report_unused {
            for finding in self.unmatched(&used, inline) {
                if self.is_suppressed(&finding, inline) {
                    result.suppressed += 1;
                } else {
                    result.kept.push(finding);
                }
            }
        }

        result
    }

    fn unmatched(&self, used: &HashSet<RuleRef>, inline: &InlineIndex) -> Vec<Finding> {
        let registry = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| {
                rule.file
                    .as_deref()
                    .is_some_and(|file| !pattern::has_wildcard(file))
            })
            .filter(|(i, _)| !used.contains(&RuleRef::Registry(*i)))
            .map(|(_, rule)| rule);
        let inline_rules = inline
            .rules
            .iter()
            .enumerate()
            .filter(|_| self.inline)
            .filter(|(i, _)| !used.contains(&RuleRef::Inline(*i)))
            .map(|(_, rule)| rule);

        registry
            .chain(inline_rules)
            .map(|rule| {
                Finding::new(
                    UNMATCHED_SUPPRESSION_ID,
                    Severity::Information,
                    rule.origin.location(),
                    format!("Unmatched suppression: {}", rule.describe()),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Location;

    fn finding(id: &str, file: &str, line: usize) -> Finding {
        Finding::new(id, Severity::Warning, Location::new(file, line, 1), "msg")
    }

    fn index_for(path: &str, content: &str) -> InlineIndex {
        let mut index = InlineIndex::new();
        index.insert(PathBuf::from(path), inline::scan(Path::new(path), content));
        index
    }

    #[test]
    fn test_builder_collects_all_sources() {
        let registry = SuppressionRegistry::builder()
            .command_line("uninitvar")
            .command_line("bad id")
            .plain_text(Path::new("s.txt"), "nullPointer:src/a.c:3\n")
            .xml(
                Path::new("s.xml"),
                "<suppressions><suppress><id>memleak</id></suppress></suppressions>",
            )
            .build();
        assert_eq!(registry.rules().len(), 3);

        let diagnostics = registry.diagnostics(&InlineIndex::new());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].id, INVALID_SUPPRESSION_ID);
        assert_eq!(diagnostics[0].severity, Severity::Error);
    }

    #[test]
    fn test_unreadable_list_is_a_diagnostic() {
        let registry = SuppressionRegistry::builder()
            .plain_text_file(Path::new("/nonexistent/supp.txt"))
            .build();
        assert!(registry.rules().is_empty());
        assert_eq!(registry.diagnostics(&InlineIndex::new()).len(), 1);
    }

    #[test]
    fn test_inline_rules_need_opt_in() {
        let index = index_for("src/a.c", "// cppcheck-suppress uninitvar\nx = y;\n");
        let f = finding("uninitvar", "src/a.c", 2);

        let disabled = SuppressionRegistry::builder().build();
        assert!(!disabled.is_suppressed(&f, &index));

        let enabled = SuppressionRegistry::builder().inline(true).build();
        assert!(enabled.is_suppressed(&f, &index));
    }

    #[test]
    fn test_malformed_inline_markers_reported_even_when_disabled() {
        let index = index_for("src/a.c", "// cppcheck-suppress a b\nx();\n");
        let registry = SuppressionRegistry::builder().build();
        assert_eq!(registry.diagnostics(&index).len(), 1);
    }

    #[test]
    fn test_filter_counts_and_keeps_order() {
        let registry = SuppressionRegistry::builder()
            .command_line("style*")
            .build();
        let filtered = registry.filter(
            vec![
                finding("a", "x.c", 1),
                finding("styleIssue", "x.c", 2),
                finding("b", "x.c", 3),
            ],
            &InlineIndex::new(),
        );
        assert_eq!(filtered.suppressed, 1);
        let ids: Vec<_> = filtered.kept.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_adding_rules_never_unsuppresses() {
        let findings = vec![
            finding("a", "src/x.c", 1),
            finding("b", "src/x.c", 2),
            finding("a", "src/y.c", 3).with_symbol("buf"),
        ];
        let sources = ["a:src/x.c", "b", "*:src/y.c:3", "a:*:9"];
        let index = InlineIndex::new();

        let mut previous = vec![false; findings.len()];
        for n in 1..=sources.len() {
            let registry = sources[..n]
                .iter()
                .fold(SuppressionRegistry::builder(), |b, s| b.command_line(s))
                .build();
            let now: Vec<bool> = findings
                .iter()
                .map(|f| registry.is_suppressed(f, &index))
                .collect();
            for (before, after) in previous.iter().zip(&now) {
                assert!(!before || *after);
            }
            previous = now;
        }
        assert!(previous.iter().all(|s| *s));
    }

    #[test]
    fn test_unmatched_reporting() {
        let index = index_for(
            "src/a.c",
            "// cppcheck-suppress used\nx();\n// cppcheck-suppress unused\ny();\n",
        );
        let registry = SuppressionRegistry::builder()
            .inline(true)
            .report_unused(true)
            .command_line("wild*")
            .command_line("literal:src/a.c:99")
            .build();

        let filtered = registry.filter(vec![finding("used", "src/a.c", 2)], &index);
        assert_eq!(filtered.suppressed, 1);
        let messages: Vec<_> = filtered.kept.iter().map(|f| f.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Unmatched suppression: literal:src/a.c:99",
                "Unmatched suppression: unused:src/a.c:4"
            ]
        );
        assert!(filtered
            .kept
            .iter()
            .all(|f| f.id == UNMATCHED_SUPPRESSION_ID && f.severity == Severity::Information));
    }

    #[test]
    fn test_unmatched_findings_can_be_suppressed() {
        let registry = SuppressionRegistry::builder()
            .report_unused(true)
            .command_line("literal:src/a.c")
            .command_line(UNMATCHED_SUPPRESSION_ID)
            .build();
        let filtered = registry.filter(Vec::new(), &InlineIndex::new());
        assert!(filtered.kept.is_empty());
        assert_eq!(filtered.suppressed, 1);
    }

    #[test]
    fn test_attach_remarks() {
        let index = index_for("src/a.c", "x(); // REMARK: checked\n");
        let mut findings = vec![finding("a", "src/a.c", 1), finding("a", "src/a.c", 2)];
        index.attach_remarks(&mut findings);
        assert_eq!(findings[0].remark.as_deref(), Some("checked"));
        assert!(findings[1].remark.is_none());
    }
}
