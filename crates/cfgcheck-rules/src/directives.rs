//! Checker that walks preprocessor directives under one configuration.
//!
//! # Findings
//!
//! - `preprocessorErrorDirective`: an `#error` reachable under the active
//!   configuration
//! - `syntaxError`: unbalanced conditionals or an `#if` condition that cannot
//!   be evaluated (the group is then treated as not taken)
//! - `normalCheckLevelMaxBranches`: a file has more conditional groups than
//!   the if-count threshold; later groups are skipped unless the check level
//!   is exhaustive
//! - `unusedMacro`: a macro defined in some analyzed file but referenced in
//!   none (whole-program)
//!
//! Under the `reduced` check level only the unit's own file is walked;
//! otherwise includes are followed in place.

use crate::expr::{self, Macro};

use cfgcheck_core::preprocessor::{self, Directive, SourceLine};
use cfgcheck_core::utils::path::{normalize, parent_dir};
use cfgcheck_core::{
    CheckLevel, Checker, CheckerFailure, Finding, Location, PassContext, Severity,
    TemplateExpansionGuard, UnitAnalysis, WholeProgramPartial,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Identifier of reachable `#error` findings.
pub const ERROR_DIRECTIVE_ID: &str = "preprocessorErrorDirective";

/// Identifier of malformed directive findings.
pub const SYNTAX_ERROR_ID: &str = "syntaxError";

/// Identifier of findings about skipped conditional groups.
pub const MAX_BRANCHES_ID: &str = "normalCheckLevelMaxBranches";

/// Identifier of whole-program unused macro findings.
pub const UNUSED_MACRO_ID: &str = "unusedMacro";

/// Include nesting beyond which a file is not entered.
const MAX_INCLUDE_DEPTH: usize = 200;

/// Reference checker over preprocessor directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveChecker;

impl DirectiveChecker {
    /// Creates the checker.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Checker for DirectiveChecker {
    fn name(&self) -> &'static str {
        "directives"
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn analyze(
        &self,
        ctx: &PassContext<'_>,
        _guard: &mut TemplateExpansionGuard,
    ) -> Result<UnitAnalysis, CheckerFailure> {
        let mut walk = Walk::new(ctx);
        walk.file(&ctx.unit.path)?;
        Ok(UnitAnalysis {
            findings: walk.findings,
            partial: walk.partial,
        })
    }

    fn conclude(&self, fact: &WholeProgramPartial) -> Vec<Finding> {
        fact.definitions
            .iter()
            .filter(|(name, _)| !fact.uses.contains(*name))
            .flat_map(|(name, locations)| {
                locations.iter().map(move |location| {
                    Finding::new(
                        UNUSED_MACRO_ID,
                        Severity::Style,
                        location.clone(),
                        format!("Macro '{name}' is defined but never used."),
                    )
                    .with_symbol(name.clone())
                })
            })
            .collect()
    }
}

/// One open `#if` group.
struct Group {
    keyword: String,
    line: usize,
    parent_active: bool,
    taken: bool,
    active: bool,
    seen_else: bool,
}

struct Walk<'a, 'c> {
    ctx: &'a PassContext<'c>,
    macros: BTreeMap<String, Macro>,
    includes: Vec<PathBuf>,
    findings: Vec<Finding>,
    partial: WholeProgramPartial,
}

impl<'a, 'c> Walk<'a, 'c> {
    fn new(ctx: &'a PassContext<'c>) -> Self {
        Self {
            ctx,
            macros: ctx
                .configuration
                .defines
                .iter()
                .map(|(name, value)| (name.clone(), Macro::object(value.clone())))
                .collect(),
            includes: Vec::new(),
            findings: Vec::new(),
            partial: WholeProgramPartial::new(),
        }
    }

    fn file(&mut self, path: &Path) -> Result<(), CheckerFailure> {
        if self.includes.len() >= MAX_INCLUDE_DEPTH || self.includes.iter().any(|p| p == path) {
            debug!("Not re-entering {}", path.display());
            return Ok(());
        }

        let content = self.ctx.read(path)?;
        let lines = preprocessor::source_lines(&content);
        let mut directives = preprocessor::directives(&lines).into_iter().peekable();
        let mut groups: Vec<Group> = Vec::new();
        let mut group_count = 0usize;
        let mut limited = false;
        let mut continued = false;

        self.includes.push(path.to_path_buf());

        for line in &lines {
            let is_continuation = continued;
            continued = line.code.trim_end().ends_with('\\');
            if is_continuation {
                continue;
            }

            let active = groups.last().map_or(true, |g| g.active);
            let Some(directive) = directives.next_if(|d| d.line == line.number) else {
                if active {
                    for ident in code_identifiers(&line.code) {
                        self.partial.reference(ident);
                    }
                }
                continue;
            };

            let location = Location::new(path, line.number, column(line));
            match directive.keyword.as_str() {
                "if" | "ifdef" | "ifndef" => {
                    self.reference_condition(&directive);
                    group_count += 1;
                    let skip = group_count > self.ctx.settings.max_if_count
                        && self.ctx.settings.check_level != CheckLevel::Exhaustive;
                    if skip && !limited && active {
                        limited = true;
                        self.findings.push(Finding::new(
                            MAX_BRANCHES_ID,
                            Severity::Information,
                            location.clone(),
                            "Limiting analysis of branches. Use --check-level=exhaustive to analyze all branches.",
                        ));
                    }
                    let taken = active && !skip && self.condition(&directive, &location);
                    groups.push(Group {
                        keyword: directive.keyword.clone(),
                        line: line.number,
                        parent_active: active && !skip,
                        taken,
                        active: taken,
                        seen_else: false,
                    });
                }
                "elif" => {
                    self.reference_condition(&directive);
                    let Some(group) = groups.last() else {
                        self.syntax_error(location, "#elif without #if");
                        continue;
                    };
                    if group.seen_else {
                        self.syntax_error(location, "#elif after #else");
                        continue;
                    }
                    let evaluate = group.parent_active && !group.taken;
                    let taken = evaluate && self.condition(&directive, &location);
                    if let Some(group) = groups.last_mut() {
                        group.active = taken;
                        group.taken |= taken;
                    }
                }
                "else" => match groups.last_mut() {
                    Some(group) if !group.seen_else => {
                        group.active = group.parent_active && !group.taken;
                        group.taken = true;
                        group.seen_else = true;
                    }
                    Some(_) => self.syntax_error(location, "#else after #else"),
                    None => self.syntax_error(location, "#else without #if"),
                },
                "endif" => {
                    if groups.pop().is_none() {
                        self.syntax_error(location, "#endif without #if");
                    }
                }
                _ if !active => {}
                "define" => self.define(&directive, location),
                "undef" => {
                    if let Some(name) = leading_identifier(&directive.rest) {
                        self.macros.remove(name);
                    }
                }
                "error" => {
                    let message = if directive.rest.is_empty() {
                        "#error".to_string()
                    } else {
                        format!("#error {}", directive.rest)
                    };
                    self.findings.push(Finding::new(
                        ERROR_DIRECTIVE_ID,
                        Severity::Error,
                        location,
                        message,
                    ));
                }
                "include" if self.ctx.settings.check_level != CheckLevel::Reduced => {
                    if let Some(target) = self.resolve(path, &directive.rest) {
                        self.file(&target)?;
                    }
                }
                _ => {}
            }
        }

        for group in groups {
            self.syntax_error(
                Location::new(path, group.line, 1),
                &format!("unterminated #{}", group.keyword),
            );
        }

        self.includes.pop();
        Ok(())
    }

    fn define(&mut self, directive: &Directive, location: Location) {
        let Some(name) = leading_identifier(&directive.rest) else {
            self.syntax_error(location, "#define without a macro name");
            return;
        };
        let after = &directive.rest[name.len()..];

        let (params, body) = match after.strip_prefix('(') {
            Some(list) => match list.split_once(')') {
                Some((params, body)) => (
                    Some(
                        params
                            .split(',')
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .collect::<Vec<_>>(),
                    ),
                    body.trim(),
                ),
                None => {
                    self.syntax_error(location, &format!("unterminated parameter list of {name}"));
                    return;
                }
            },
            None => (None, after.trim()),
        };

        for ident in code_identifiers(body) {
            let is_param = params.as_ref().is_some_and(|p| p.contains(&ident));
            if ident != name && !is_param && ident != "__VA_ARGS__" {
                self.partial.reference(ident);
            }
        }
        self.partial.define(name, location);
        let definition = match params {
            Some(params) => Macro::function(
                params.into_iter().map(ToString::to_string).collect(),
                body,
            ),
            None => Macro::object(body),
        };
        self.macros.insert(name.to_string(), definition);
    }

    fn reference_condition(&mut self, directive: &Directive) {
        let names = match directive.keyword.as_str() {
            "ifdef" | "ifndef" => leading_identifier(&directive.rest)
                .map(ToString::to_string)
                .into_iter()
                .collect(),
            _ => preprocessor::expression_identifiers(&directive.rest),
        };
        for name in names {
            self.partial.reference(name);
        }
    }

    fn condition(&mut self, directive: &Directive, location: &Location) -> bool {
        let name = || leading_identifier(&directive.rest).unwrap_or_default();
        match directive.keyword.as_str() {
            "ifdef" => self.macros.contains_key(name()),
            "ifndef" => !self.macros.contains_key(name()),
            _ => match expr::evaluate(&directive.rest, &self.macros) {
                Ok(value) => value != 0,
                Err(e) => {
                    self.syntax_error(
                        location.clone(),
                        &format!("failed to evaluate #{} condition: {e}", directive.keyword),
                    );
                    false
                }
            },
        }
    }

    /// Maps an include to one of the unit's resolved dependencies.
    fn resolve(&self, from: &Path, rest: &str) -> Option<PathBuf> {
        let (target, local) = if let Some(inner) = rest.strip_prefix('"') {
            (&inner[..inner.find('"')?], true)
        } else if let Some(inner) = rest.strip_prefix('<') {
            (&inner[..inner.find('>')?], false)
        } else {
            return None;
        };

        let deps = &self.ctx.unit.dependencies;
        let sibling = local.then(|| normalize(&parent_dir(from).join(target)));
        sibling
            .and_then(|candidate| deps.iter().find(|d| d.path == candidate))
            .or_else(|| deps.iter().find(|d| d.path.ends_with(target)))
            .map(|d| d.path.clone())
    }

    fn syntax_error(&mut self, location: Location, message: &str) {
        self.findings.push(Finding::new(
            SYNTAX_ERROR_ID,
            Severity::Error,
            location,
            message,
        ));
    }
}

/// 1-based column of the directive's `#`.
fn column(line: &SourceLine) -> usize {
    line.code.len() - line.code.trim_start().len() + 1
}

fn leading_identifier(text: &str) -> Option<&str> {
    let end = text
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(text.len());
    let ident = &text[..end];
    preprocessor::is_identifier(ident).then_some(ident)
}

/// Identifiers in a line of code, outside string and character literals.
fn code_identifiers(code: &str) -> Vec<&str> {
    let bytes = code.as_bytes();
    let mut result = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'"' || b == b'\'' {
            i += 1;
            while i < bytes.len() && bytes[i] != b {
                i += if bytes[i] == b'\\' { 2 } else { 1 };
            }
            i += 1;
        } else if b.is_ascii_alphabetic() || b == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            result.push(&code[start..i]);
        } else if b.is_ascii_digit() {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
        } else {
            i += 1;
        }
    }

    result
}
