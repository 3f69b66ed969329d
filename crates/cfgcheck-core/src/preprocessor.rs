//! Lightweight preprocessor directive scan.
//!
//! This is not a preprocessor: it splits source text into code and comments
//! and reads the directives the control plane needs (conditional variables,
//! includes, macro definitions). Expression evaluation and macro expansion
//! belong to the checker.

use std::collections::BTreeSet;

/// A comment found on a source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    /// Comment text without its `//`, `/*` or `*/` delimiters.
    pub text: String,
    /// Whether code precedes the comment on the same line.
    pub trailing: bool,
}

/// One physical source line split into code and comments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// Line number (1-indexed).
    pub number: usize,
    /// The line with comments removed.
    pub code: String,
    /// Comments that start on this line.
    pub comments: Vec<Comment>,
}

impl SourceLine {
    /// Whether the line contains anything besides comments and whitespace.
    #[must_use]
    pub fn has_code(&self) -> bool {
        !self.code.trim().is_empty()
    }
}

/// Splits source text into lines of code and comments.
///
/// String and character literals are respected so that `"//"` inside a
/// literal does not start a comment. A block comment is reported on the line
/// where it starts; the lines it spans contribute no code.
#[must_use]
pub fn source_lines(content: &str) -> Vec<SourceLine> {
    let mut lines = Vec::new();
    let mut block: Option<(usize, String, bool)> = None;

    for (index, raw) in content.lines().enumerate() {
        let number = index + 1;
        let chars: Vec<char> = raw.chars().collect();
        let mut code = String::new();
        let mut comments = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            if let Some((_, text, _)) = block.as_mut() {
                if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    i += 2;
                    if let Some((start, text, trailing)) = block.take() {
                        let comment = Comment {
                            text: text.trim().to_string(),
                            trailing,
                        };
                        if start == number {
                            comments.push(comment);
                        } else if let Some(line) =
                            lines.iter_mut().rev().find(|l: &&mut SourceLine| l.number == start)
                        {
                            line.comments.push(comment);
                        }
                    }
                } else {
                    text.push(chars[i]);
                    i += 1;
                }
                continue;
            }

            match chars[i] {
                '/' if chars.get(i + 1) == Some(&'/') => {
                    let text: String = chars[i + 2..].iter().collect();
                    comments.push(Comment {
                        text: text.trim().to_string(),
                        trailing: !code.trim().is_empty(),
                    });
                    break;
                }
                '/' if chars.get(i + 1) == Some(&'*') => {
                    block = Some((number, String::new(), !code.trim().is_empty()));
                    code.push(' ');
                    i += 2;
                }
                '\'' => {
                    let len = char_literal_len(&chars[i..]);
                    code.extend(&chars[i..i + len]);
                    i += len;
                }
                quote @ '"' => {
                    code.push(quote);
                    i += 1;
                    while i < chars.len() {
                        code.push(chars[i]);
                        if chars[i] == '\\' && i + 1 < chars.len() {
                            code.push(chars[i + 1]);
                            i += 2;
                            continue;
                        }
                        i += 1;
                        if chars[i - 1] == quote {
                            break;
                        }
                    }
                }
                c => {
                    code.push(c);
                    i += 1;
                }
            }
        }

        if let Some((_, text, _)) = block.as_mut() {
            text.push('\n');
        }

        lines.push(SourceLine {
            number,
            code,
            comments,
        });
    }

    lines
}

/// Length of the character literal opening `chars`, or 1 when the quote is
/// a lone apostrophe (prose in `#error`, digit separators).
fn char_literal_len(chars: &[char]) -> usize {
    match chars.get(1) {
        Some('\\') => {
            let mut i = 3;
            while i < chars.len() {
                match chars[i] {
                    '\\' => i += 2,
                    '\'' => return i + 1,
                    _ => i += 1,
                }
            }
            1
        }
        Some(_) if chars.get(2) == Some(&'\'') => 3,
        _ => 1,
    }
}

/// A preprocessor directive on a logical line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Line where the directive starts.
    pub line: usize,
    /// Directive keyword (`if`, `ifdef`, `define`, ...).
    pub keyword: String,
    /// Everything after the keyword, continuation lines joined.
    pub rest: String,
}

/// Extracts directives, joining backslash-continued lines.
#[must_use]
pub fn directives(lines: &[SourceLine]) -> Vec<Directive> {
    let mut result = Vec::new();
    let mut iter = lines.iter();

    while let Some(line) = iter.next() {
        let trimmed = line.code.trim_start();
        let Some(body) = trimmed.strip_prefix('#') else {
            continue;
        };

        let mut text = body.trim().to_string();
        while text.ends_with('\\') {
            text.pop();
            match iter.next() {
                Some(next) => {
                    text.push(' ');
                    text.push_str(next.code.trim());
                }
                None => break,
            }
        }

        let text = text.trim_start();
        let keyword_end = text
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(text.len());
        result.push(Directive {
            line: line.number,
            keyword: text[..keyword_end].to_string(),
            rest: text[keyword_end..].trim().to_string(),
        });
    }

    result
}

/// Returns the identifiers referenced by a preprocessor expression,
/// skipping numeric literals and the `defined` operator.
#[must_use]
pub fn expression_identifiers(expr: &str) -> Vec<String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut result = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            if ident.starts_with("__has_") {
                i += header_argument_len(&chars[i..]);
            } else if ident != "defined" {
                result.push(ident);
            }
        } else {
            i += 1;
        }
    }

    result
}

/// Length of a `__has_*` argument list written as a header name or string,
/// which holds no macro names. 0 for any other argument.
fn header_argument_len(chars: &[char]) -> usize {
    let open = chars.iter().take_while(|c| c.is_whitespace()).count();
    let Some(len) = parenthesized_len(&chars[open..]) else {
        return 0;
    };
    let quoted = chars[open + 1..]
        .iter()
        .find(|c| !c.is_whitespace())
        .is_some_and(|&c| matches!(c, '<' | '"'));
    if quoted {
        open + len
    } else {
        0
    }
}

/// Length of the parenthesized group opening `chars`, through its matching
/// `)`. `None` if `chars` does not start with `(` or the group is unclosed.
#[must_use]
pub fn parenthesized_len(chars: &[char]) -> Option<usize> {
    if chars.first() != Some(&'(') {
        return None;
    }
    let mut depth = 0usize;
    for (i, c) in chars.iter().enumerate() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Returns true if `name` is a valid C identifier.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn leading_identifier(text: &str) -> Option<String> {
    let end = text
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(text.len());
    let ident = &text[..end];
    is_identifier(ident).then(|| ident.to_string())
}

/// An `#include` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    /// Line of the directive.
    pub line: usize,
    /// Header name as written.
    pub target: String,
    /// `<...>` form rather than `"..."`.
    pub system: bool,
}

/// What the control plane needs to know about one file's directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveScan {
    /// Names referenced by `#if`, `#ifdef`, `#ifndef`, `#elif`.
    pub conditionals: BTreeSet<String>,
    /// Names given a definition with `#define`.
    pub defines: BTreeSet<String>,
    /// Include directives in source order.
    pub includes: Vec<Include>,
}

/// Scans one file's text.
#[must_use]
pub fn scan(content: &str) -> DirectiveScan {
    let lines = source_lines(content);
    let mut result = DirectiveScan::default();

    for directive in directives(&lines) {
        match directive.keyword.as_str() {
            "if" | "elif" => {
                result
                    .conditionals
                    .extend(expression_identifiers(&directive.rest));
            }
            "ifdef" | "ifndef" => {
                if let Some(name) = leading_identifier(&directive.rest) {
                    result.conditionals.insert(name);
                }
            }
            "define" => {
                if let Some(name) = leading_identifier(&directive.rest) {
                    result.defines.insert(name);
                }
            }
            "include" => {
                let rest = directive.rest.as_str();
                let parsed = if let Some(inner) = rest.strip_prefix('"') {
                    inner.find('"').map(|end| (&inner[..end], false))
                } else if let Some(inner) = rest.strip_prefix('<') {
                    inner.find('>').map(|end| (&inner[..end], true))
                } else {
                    None
                };
                if let Some((target, system)) = parsed {
                    result.includes.push(Include {
                        line: directive.line,
                        target: target.to_string(),
                        system,
                    });
                }
            }
            _ => {}
        }
    }

    result
}
