//! Inline suppression markers in source comments.
//!
//! Supports:
//! - `// cppcheck-suppress id` on the line before the code, or trailing it
//! - `// cppcheck-suppress [id1,id2] symbolName=buf ; commentary`
//! - `// cppcheck-suppress-begin id` ... `// cppcheck-suppress-end id`
//! - `// cppcheck-suppress-file id`
//! - `// cppcheck-suppress-macro id` directly above `#define NAME`
//!
//! `REMARK: text` comments are collected alongside and attached to findings
//! on the line they annotate.

use super::rule::{is_valid_id, LineSelector, Origin, Scope, SuppressionRule};
use super::SuppressionError;
use crate::preprocessor::{self, SourceLine};

use std::collections::BTreeMap;
use std::path::Path;

/// Comment prefix shared by every marker.
pub const MARKER: &str = "cppcheck-suppress";

const REMARK: &str = "REMARK:";

/// What a scan of one file produced.
#[derive(Debug, Clone, Default)]
pub struct InlineSuppressions {
    /// Rules declared by well-formed markers.
    pub rules: Vec<SuppressionRule>,
    /// Remark text per annotated line.
    pub remarks: BTreeMap<usize, String>,
    /// Malformed markers.
    pub errors: Vec<SuppressionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Line,
    Begin,
    End,
    File,
    Macro,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Marker {
    kind: Kind,
    ids: Vec<String>,
    symbol: Option<String>,
}

/// Parses a comment as a marker. `None` when the comment is not one.
fn parse_marker(comment: &str) -> Option<Result<Marker, String>> {
    let first_line = comment.lines().next().unwrap_or_default().trim();
    let rest = first_line.strip_prefix(MARKER)?;

    let (kind, rest) = [
        ("-begin", Kind::Begin),
        ("-end", Kind::End),
        ("-file", Kind::File),
        ("-macro", Kind::Macro),
    ]
    .into_iter()
    .find_map(|(suffix, kind)| rest.strip_prefix(suffix).map(|r| (kind, r)))
    .unwrap_or((Kind::Line, rest));

    if !(rest.is_empty() || rest.starts_with(char::is_whitespace) || rest.starts_with('[')) {
        return None;
    }

    Some(parse_marker_body(kind, rest.trim_start()))
}

fn parse_marker_body(kind: Kind, body: &str) -> Result<Marker, String> {
    let (ids, mut rest): (Vec<String>, &str) = if let Some(list) = body.strip_prefix('[') {
        let end = list
            .find(']')
            .ok_or_else(|| "unterminated identifier list".to_string())?;
        let ids = list[..end]
            .split(',')
            .map(|id| id.trim().to_string())
            .collect();
        (ids, &list[end + 1..])
    } else {
        let end = body
            .find(|c: char| c.is_whitespace() || c == ';')
            .unwrap_or(body.len());
        (vec![body[..end].to_string()], &body[end..])
    };

    if ids.iter().all(String::is_empty) {
        return Err("missing identifier".to_string());
    }
    if let Some(bad) = ids.iter().find(|id| !is_valid_id(id)) {
        return Err(format!("invalid identifier `{bad}`"));
    }

    let mut symbol = None;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() || rest.starts_with(';') || rest.starts_with("//") {
            break;
        }
        let end = rest
            .find(|c: char| c.is_whitespace() || c == ';')
            .unwrap_or(rest.len());
        let token = &rest[..end];
        match token.strip_prefix("symbolName=") {
            Some(name) if !name.is_empty() => symbol = Some(name.to_string()),
            _ => return Err(format!("unexpected `{token}` after identifiers")),
        }
        rest = &rest[end..];
    }

    Ok(Marker { kind, ids, symbol })
}

struct Pending {
    line: usize,
    marker: Marker,
}

struct Scanner<'a> {
    path: &'a Path,
    file: String,
    out: InlineSuppressions,
    pending: Vec<Pending>,
    pending_remark: Option<String>,
    open_blocks: BTreeMap<String, Vec<(usize, Option<String>)>>,
}

impl<'a> Scanner<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            file: path.to_string_lossy().into_owned(),
            out: InlineSuppressions::default(),
            pending: Vec::new(),
            pending_remark: None,
            open_blocks: BTreeMap::new(),
        }
    }

    fn origin(&self, line: usize) -> Origin {
        Origin::Inline {
            path: self.path.to_path_buf(),
            line,
        }
    }

    fn error(&mut self, line: usize, message: impl Into<String>) {
        let origin = self.origin(line);
        self.out.errors.push(SuppressionError::new(origin, message.into()));
    }

    fn push_rules(&mut self, marker: &Marker, line: usize, scope: Scope, lines: LineSelector) {
        for id in &marker.ids {
            let mut rule = SuppressionRule::global(id.clone(), self.origin(line));
            rule.file = match scope {
                Scope::Macro(_) => None,
                _ => Some(self.file.clone()),
            };
            rule.scope = scope.clone();
            rule.lines = lines;
            rule.symbol.clone_from(&marker.symbol);
            self.out.rules.push(rule);
        }
    }

    fn run(mut self, lines: &[SourceLine]) -> InlineSuppressions {
        for (index, line) in lines.iter().enumerate() {
            for comment in &line.comments {
                if let Some(text) = comment.text.strip_prefix(REMARK) {
                    let text = text.trim().to_string();
                    if comment.trailing {
                        self.out.remarks.insert(line.number, text);
                    } else {
                        self.pending_remark = Some(text);
                    }
                    continue;
                }

                match parse_marker(&comment.text) {
                    None => {}
                    Some(Err(message)) => {
                        self.error(line.number, format!("malformed suppression marker: {message}"));
                    }
                    Some(Ok(marker)) => {
                        self.marker(marker, line, comment.trailing, &lines[index + 1..]);
                    }
                }
            }

            if line.has_code() {
                if let Some(remark) = self.pending_remark.take() {
                    self.out.remarks.entry(line.number).or_insert(remark);
                }
                for pending in std::mem::take(&mut self.pending) {
                    self.push_rules(
                        &pending.marker,
                        pending.line,
                        Scope::Line,
                        LineSelector::Exact(line.number),
                    );
                }
            }
        }

        for pending in std::mem::take(&mut self.pending) {
            self.error(pending.line, "suppression marker is not followed by code");
        }
        for (id, opens) in std::mem::take(&mut self.open_blocks) {
            for (open, _) in opens {
                self.error(open, format!("`{MARKER}-begin {id}` has no matching end marker"));
            }
        }
        self.out
    }

    fn marker(&mut self, marker: Marker, line: &SourceLine, trailing: bool, after: &[SourceLine]) {
        let number = line.number;
        match marker.kind {
            Kind::Line if trailing => {
                let lines = if line.code.trim() == "{" {
                    LineSelector::Range(number, number + 1)
                } else {
                    LineSelector::Exact(number)
                };
                self.push_rules(&marker, number, Scope::Line, lines);
            }
            Kind::Line => self.pending.push(Pending {
                line: number,
                marker,
            }),
            Kind::File => self.push_rules(&marker, number, Scope::File, LineSelector::Any),
            Kind::Begin => {
                for id in &marker.ids {
                    self.open_blocks
                        .entry(id.clone())
                        .or_default()
                        .push((number, marker.symbol.clone()));
                }
            }
            Kind::End => {
                for id in &marker.ids {
                    let open = self.open_blocks.get_mut(id).and_then(Vec::pop);
                    let Some((open, symbol)) = open else {
                        self.error(number, format!("`{MARKER}-end {id}` has no matching begin marker"));
                        continue;
                    };
                    let block = Marker {
                        kind: Kind::Begin,
                        ids: vec![id.clone()],
                        symbol,
                    };
                    self.push_rules(
                        &block,
                        open,
                        Scope::Block { open, close: number },
                        LineSelector::Any,
                    );
                }
                self.open_blocks.retain(|_, opens| !opens.is_empty());
            }
            Kind::Macro => match following_define(line, after) {
                Some(name) => {
                    self.push_rules(&marker, number, Scope::Macro(name), LineSelector::Any);
                }
                None => self.error(number, format!("`{MARKER}-macro` must precede a #define")),
            },
        }
    }
}

/// Name defined by the next line of code, if it is a `#define`.
fn following_define(line: &SourceLine, after: &[SourceLine]) -> Option<String> {
    let next = if line.has_code() {
        line
    } else {
        after.iter().find(|l| l.has_code())?
    };
    let directive = preprocessor::directives(std::slice::from_ref(next)).pop()?;
    if directive.keyword != "define" {
        return None;
    }
    let end = directive
        .rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(directive.rest.len());
    let name = &directive.rest[..end];
    preprocessor::is_identifier(name).then(|| name.to_string())
}

/// Scans one file's text for markers and remarks.
///
/// `path` should already be normalized; rules are restricted to it.
#[must_use]
pub fn scan(path: &Path, content: &str) -> InlineSuppressions {
    Scanner::new(path).run(&preprocessor::source_lines(content))
}
