//! Anchored glob matching for paths and identifiers.
//!
//! Supported wildcards:
//! - `**` matches any sequence, including `/`
//! - `**/` matches zero or more whole path segments
//! - `*` matches any sequence not containing `/`
//! - `?` matches exactly one character other than `/`
//!
//! Backslashes in either argument are treated as `/` before matching.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    Star,
    GlobStar,
    /// `**/`: empty, or anything ending in `/`.
    Segments,
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern
        .chars()
        .map(|c| if c == '\\' { '/' } else { c })
        .collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                // Runs of three or more stars behave like `**`.
                let mut j = i;
                while chars.get(j) == Some(&'*') {
                    j += 1;
                }
                if chars.get(j) == Some(&'/') {
                    tokens.push(Token::Segments);
                    j += 1;
                } else {
                    tokens.push(Token::GlobStar);
                }
                i = j;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '?' => {
                tokens.push(Token::AnyChar);
                i += 1;
            }
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }

    tokens
}

/// Returns true if `pattern` matches the whole of `candidate`.
///
/// Total over all inputs: there is no error case.
///
/// # Examples
///
/// ```
/// use cfgcheck_core::pattern::matches;
///
/// assert!(matches("**", "any/thing"));
/// assert!(!matches("*.c", "a/b.c"));
/// assert!(matches("**/*.c", "a/b.c"));
/// assert!(matches("null*", "nullPointer"));
/// ```
#[must_use]
pub fn matches(pattern: &str, candidate: &str) -> bool {
    let tokens = tokenize(pattern);
    let text: Vec<char> = candidate
        .chars()
        .map(|c| if c == '\\' { '/' } else { c })
        .collect();

    // reachable[j]: the tokens consumed so far can match text[..j].
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;

    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match *token {
            Token::Literal(c) => {
                for j in 0..text.len() {
                    if reachable[j] && text[j] == c {
                        next[j + 1] = true;
                    }
                }
            }
            Token::AnyChar => {
                for j in 0..text.len() {
                    if reachable[j] && text[j] != '/' {
                        next[j + 1] = true;
                    }
                }
            }
            Token::Star => {
                for j in 0..=text.len() {
                    if reachable[j] || (j > 0 && next[j - 1] && text[j - 1] != '/') {
                        next[j] = true;
                    }
                }
            }
            Token::GlobStar => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= reachable[j];
                    next[j] = seen;
                }
            }
            Token::Segments => {
                let mut seen = false;
                for j in 0..=text.len() {
                    if reachable[j] {
                        next[j] = true;
                        seen = true;
                    }
                    if seen && j > 0 && text[j - 1] == '/' {
                        next[j] = true;
                    }
                }
            }
        }
        reachable = next;
    }

    reachable[text.len()]
}

/// Returns true if the pattern contains any wildcard character.
#[must_use]
pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_globstar_matches_everything() {
        for candidate in ["", "a", "a/b/c.c", "/abs/path", "x?y"] {
            assert!(matches("**", candidate), "{candidate}");
        }
    }

    #[test]
    fn test_star_does_not_cross_separator() {
        assert!(matches("*.c", "b.c"));
        assert!(!matches("*.c", "a/b.c"));
        assert!(matches("src/*.c", "src/b.c"));
        assert!(!matches("src/*.c", "src/x/b.c"));
    }

    #[test]
    fn test_recursive_patterns() {
        assert!(matches("**/*.c", "a/b.c"));
        assert!(matches("**/*.c", "a/b/c/d.c"));
        assert!(matches("**/*.c", "d.c"));
        assert!(matches("src/**/*.h", "src/x/y/z.h"));
        assert!(matches("src/**/*.h", "src/z.h"));
        assert!(!matches("src/**/*.h", "lib/z.h"));
        assert!(matches("**/build/**", "out/build/gen/a.c"));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches("a?c", "abc"));
        assert!(!matches("a?c", "a/c"));
        assert!(!matches("a?c", "ac"));
    }

    #[test]
    fn test_anchored() {
        assert!(!matches("b.c", "a/b.c"));
        assert!(!matches("a", "ab"));
        assert!(matches("", ""));
        assert!(!matches("", "a"));
    }

    #[test]
    fn test_separators_normalized() {
        assert!(matches(r"src\*.c", "src/a.c"));
        assert!(matches("src/*.c", r"src\a.c"));
    }

    #[test]
    fn test_identifier_patterns() {
        assert!(matches("*", "uninitvar"));
        assert!(matches("null*", "nullPointerRedundantCheck"));
        assert!(!matches("null*", "uninitvar"));
    }

    #[test]
    fn test_has_wildcard() {
        assert!(has_wildcard("src/*.c"));
        assert!(has_wildcard("a?.c"));
        assert!(!has_wildcard("src/a.c"));
    }
}
