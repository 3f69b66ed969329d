//! Plain-text suppression grammar: `id[:file[:line]]`.
//!
//! Shared by suppression list files and `--suppress` flags. In list files,
//! `#` and `//` start a comment, either at the beginning of a line or after
//! a rule.

use super::rule::{is_valid_id, LineSelector, Origin, SuppressionRule};
use super::SuppressionError;
use crate::utils::path::normalize_str;

use std::path::Path;

/// Parses one rule.
///
/// Returns `Ok(None)` for text that is blank once comments are removed.
///
/// # Errors
///
/// Returns an error if the identifier is missing or invalid, the file part
/// is empty, or the line part is malformed.
pub fn parse_rule(text: &str, origin: Origin) -> Result<Option<SuppressionRule>, SuppressionError> {
    let text = strip_comment(text).trim();
    if text.is_empty() {
        return Ok(None);
    }

    let fail = |message: String| SuppressionError::new(origin.clone(), message);

    let (id, rest) = match text.split_once(':') {
        Some((id, rest)) => (id.trim(), Some(rest.trim())),
        None => (text, None),
    };
    if !is_valid_id(id) {
        return Err(fail(format!("invalid suppression id `{id}` in `{text}`")));
    }

    let mut rule = SuppressionRule::global(id, origin.clone());
    let Some(rest) = rest else {
        return Ok(Some(rule));
    };

    let (file, lines) = split_line_selector(rest).map_err(|m| fail(format!("{m} in `{text}`")))?;
    if file.is_empty() {
        return Err(fail(format!("empty file name in `{text}`")));
    }
    rule.file = Some(normalize_str(file));
    rule.lines = lines;
    Ok(Some(rule))
}

/// Parses a suppression list file.
///
/// Malformed lines are dropped and returned as errors; valid lines still
/// produce rules.
#[must_use]
pub fn parse_list(path: &Path, content: &str) -> (Vec<SuppressionRule>, Vec<SuppressionError>) {
    let mut rules = Vec::new();
    let mut errors = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let origin = Origin::SuppressionFile {
            path: path.to_path_buf(),
            line: index + 1,
        };
        match parse_rule(line, origin) {
            Ok(Some(rule)) => rules.push(rule),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }

    (rules, errors)
}

fn strip_comment(text: &str) -> &str {
    let cut = [text.find('#'), text.find("//")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(text.len());
    &text[..cut]
}

/// Splits `file[:line]`, tolerating `:` inside the file part (drive letters).
fn split_line_selector(rest: &str) -> Result<(&str, LineSelector), String> {
    let Some((file, tail)) = rest.rsplit_once(':') else {
        return Ok((rest, LineSelector::Any));
    };
    let tail = tail.trim();

    let looks_like_line =
        !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit() || matches!(c, '-' | '*'));
    if !looks_like_line {
        return Ok((rest, LineSelector::Any));
    }

    LineSelector::parse(tail)
        .map(|lines| (file.trim(), lines))
        .ok_or_else(|| format!("invalid line `{tail}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suppression::rule::Scope;

    fn parse(text: &str) -> Result<Option<SuppressionRule>, SuppressionError> {
        parse_rule(text, Origin::CommandLine)
    }

    #[test]
    fn test_id_only() {
        let rule = parse("uninitvar").unwrap().unwrap();
        assert_eq!(rule.id, "uninitvar");
        assert!(rule.file.is_none());
        assert_eq!(rule.lines, LineSelector::Any);
        assert_eq!(rule.scope, Scope::Global);
    }

    #[test]
    fn test_id_file_line() {
        let rule = parse("nullPointer:src/./a.c:12").unwrap().unwrap();
        assert_eq!(rule.file.as_deref(), Some("src/a.c"));
        assert_eq!(rule.lines, LineSelector::Exact(12));

        let rule = parse("nullPointer:src/*.c:3-9").unwrap().unwrap();
        assert_eq!(rule.lines, LineSelector::Range(3, 9));
    }

    #[test]
    fn test_drive_letter_paths() {
        let rule = parse(r"id:C:\src\a.c").unwrap().unwrap();
        assert_eq!(rule.file.as_deref(), Some("C:/src/a.c"));
        assert_eq!(rule.lines, LineSelector::Any);

        let rule = parse(r"id:C:\src\a.c:7").unwrap().unwrap();
        assert_eq!(rule.file.as_deref(), Some("C:/src/a.c"));
        assert_eq!(rule.lines, LineSelector::Exact(7));
    }

    #[test]
    fn test_comments_and_blanks() {
        assert!(parse("   ").unwrap().is_none());
        assert!(parse("# whole line").unwrap().is_none());
        assert!(parse("// whole line").unwrap().is_none());
        let rule = parse("uninitvar:a.c # why").unwrap().unwrap();
        assert_eq!(rule.file.as_deref(), Some("a.c"));
        let rule = parse("uninitvar // why").unwrap().unwrap();
        assert!(rule.file.is_none());
    }

    #[test]
    fn test_malformed_rules() {
        assert!(parse(":a.c").is_err());
        assert!(parse("bad id:a.c").is_err());
        assert!(parse("id::4").is_err());
        assert!(parse("id:a.c:9-2").is_err());
    }

    #[test]
    fn test_parse_list_keeps_valid_lines() {
        let content = "# header\nuninitvar\n\nbad id\nnullPointer:src/b.c:4 // trailing\n";
        let (rules, errors) = parse_list(Path::new("supp.txt"), content);
        assert_eq!(rules.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].origin.location().line, 4);
        assert_eq!(
            rules[1].origin,
            Origin::SuppressionFile {
                path: "supp.txt".into(),
                line: 5
            }
        );
    }
}
