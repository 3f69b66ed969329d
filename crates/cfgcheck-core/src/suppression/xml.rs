//! Structured suppression files.
//!
//! ```xml
//! <suppressions>
//!   <suppress>
//!     <id>uninitvar</id>
//!     <fileName>src/*.c</fileName>
//!     <lineNumber>12</lineNumber>
//!     <symbolName>buf</symbolName>
//!   </suppress>
//! </suppressions>
//! ```
//!
//! A document that is not well-formed produces a single error and no rules.
//! Entries without an `<id>`, or with unknown child elements, are dropped
//! with an error while their siblings still load.

use super::rule::{is_valid_id, LineSelector, Origin, SuppressionRule};
use super::SuppressionError;
use crate::utils::path::normalize_str;

use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;

#[derive(Debug, Default)]
struct Entry {
    line: usize,
    id: Option<String>,
    file: Option<String>,
    lines: Option<String>,
    symbol: Option<String>,
    problem: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    FileName,
    LineNumber,
    SymbolName,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"id" => Some(Self::Id),
            b"fileName" => Some(Self::FileName),
            b"lineNumber" => Some(Self::LineNumber),
            b"symbolName" => Some(Self::SymbolName),
            _ => None,
        }
    }
}

/// Parses a structured suppression document.
#[must_use]
pub fn parse(path: &Path, content: &str) -> (Vec<SuppressionRule>, Vec<SuppressionError>) {
    match read_entries(content) {
        Ok(entries) => {
            let mut rules = Vec::new();
            let mut errors = Vec::new();
            for entry in entries {
                let origin = Origin::SuppressionFile {
                    path: path.to_path_buf(),
                    line: entry.line,
                };
                match into_rule(entry, origin.clone()) {
                    Ok(rule) => rules.push(rule),
                    Err(message) => errors.push(SuppressionError::new(origin, message)),
                }
            }
            (rules, errors)
        }
        Err((line, message)) => {
            let origin = Origin::SuppressionFile {
                path: path.to_path_buf(),
                line,
            };
            (
                Vec::new(),
                vec![SuppressionError::new(
                    origin,
                    format!("malformed suppression file: {message}"),
                )],
            )
        }
    }
}

fn line_at(content: &str, offset: impl TryInto<usize>) -> usize {
    let offset = offset.try_into().unwrap_or(usize::MAX).min(content.len());
    content.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count() + 1
}

fn read_entries(content: &str) -> Result<Vec<Entry>, (usize, String)> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<Entry> = None;
    let mut field: Option<Field> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| (line_at(content, reader.error_position()), e.to_string()))?;
        let position = reader.buffer_position();

        match event {
            Event::Start(start) => {
                let tag = start.name().as_ref().to_vec();
                match (stack.len(), current.as_mut()) {
                    (1, None) if tag == b"suppress" => {
                        current = Some(Entry {
                            line: line_at(content, position),
                            ..Entry::default()
                        });
                    }
                    (2, Some(entry)) => {
                        field = Field::from_tag(&tag);
                        if field.is_none() && entry.problem.is_none() {
                            entry.problem = Some(format!(
                                "unknown element <{}> in <suppress>",
                                String::from_utf8_lossy(&tag)
                            ));
                        }
                    }
                    _ => {}
                }
                stack.push(tag);
            }
            Event::End(end) => {
                if stack.pop().as_deref() != Some(end.name().as_ref()) {
                    return Err((line_at(content, position), "mismatched closing tag".to_string()));
                }
                match stack.len() {
                    1 => {
                        if let Some(entry) = current.take() {
                            entries.push(entry);
                        }
                    }
                    2 => field = None,
                    _ => {}
                }
            }
            Event::Empty(empty) => {
                if stack.len() == 1 && empty.name().as_ref() == b"suppress" {
                    entries.push(Entry {
                        line: line_at(content, position),
                        ..Entry::default()
                    });
                }
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map_err(|e| (line_at(content, position), e.to_string()))?
                    .trim()
                    .to_string();
                if let (Some(entry), Some(field)) = (current.as_mut(), field) {
                    let slot = match field {
                        Field::Id => &mut entry.id,
                        Field::FileName => &mut entry.file,
                        Field::LineNumber => &mut entry.lines,
                        Field::SymbolName => &mut entry.symbol,
                    };
                    *slot = Some(value);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err((
            line_at(content, reader.buffer_position()),
            "unexpected end of document".to_string(),
        ));
    }
    Ok(entries)
}

fn into_rule(entry: Entry, origin: Origin) -> Result<SuppressionRule, String> {
    if let Some(problem) = entry.problem {
        return Err(problem);
    }
    let id = entry.id.ok_or_else(|| "<suppress> without <id>".to_string())?;
    if !is_valid_id(&id) {
        return Err(format!("invalid suppression id `{id}`"));
    }

    let mut rule = SuppressionRule::global(id, origin);
    rule.file = entry.file.filter(|f| !f.is_empty()).map(|f| normalize_str(&f));
    if let Some(lines) = entry.lines {
        rule.lines = LineSelector::parse(&lines)
            .ok_or_else(|| format!("invalid lineNumber `{lines}`"))?;
        if rule.file.is_none() && rule.lines != LineSelector::Any {
            return Err("<lineNumber> requires <fileName>".to_string());
        }
    }
    rule.symbol = entry.symbol.filter(|s| !s.is_empty());
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(content: &str) -> (Vec<SuppressionRule>, Vec<SuppressionError>) {
        parse(Path::new("supp.xml"), content)
    }

    #[test]
    fn test_parse_entries() {
        let (rules, errors) = parse_str(
            r"<?xml version='1.0'?>
<suppressions>
  <suppress>
    <id>uninitvar</id>
    <fileName>src\a.c</fileName>
    <lineNumber>12</lineNumber>
    <symbolName>buf</symbolName>
  </suppress>
  <suppress><id>nullPointer</id></suppress>
</suppressions>",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, "uninitvar");
        assert_eq!(rules[0].file.as_deref(), Some("src/a.c"));
        assert_eq!(rules[0].lines, LineSelector::Exact(12));
        assert_eq!(rules[0].symbol.as_deref(), Some("buf"));
        assert_eq!(rules[0].origin.location().line, 3);
        assert!(rules[1].file.is_none());
        assert_eq!(rules[1].origin.location().line, 9);
    }

    #[test]
    fn test_malformed_document_yields_no_rules() {
        let (rules, errors) = parse_str("<suppressions><suppress><id>x</id></suppressions>");
        assert!(rules.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("malformed"));

        let (rules, errors) = parse_str("<suppressions><suppress><id>x</id>");
        assert!(rules.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_bad_entry_does_not_drop_siblings() {
        let (rules, errors) = parse_str(
            "<suppressions>\n<suppress><fileName>a.c</fileName></suppress>\n<suppress><id>ok</id><colour>red</colour></suppress>\n<suppress><id>kept</id></suppress>\n</suppressions>",
        );
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "kept");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_escaped_text() {
        let (rules, errors) = parse_str(
            "<suppressions><suppress><id>x</id><fileName>a&amp;b.c</fileName></suppress></suppressions>",
        );
        assert!(errors.is_empty());
        assert_eq!(rules[0].file.as_deref(), Some("a&b.c"));
    }
}
