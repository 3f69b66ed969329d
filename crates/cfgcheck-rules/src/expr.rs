//! Evaluation of `#if` and `#elif` conditions.
//!
//! Supports integer literals (decimal, octal, hex, binary, with `u`/`l`
//! suffixes), simple character literals, `defined NAME` and
//! `defined(NAME)`, object-like and function-like macro expansion
//! (including `__VA_ARGS__`), and the C operators usable in preprocessor
//! arithmetic. `__has_include(<x.h>)` and the other `__has_*` feature checks
//! evaluate to 0. Identifiers that remain after expansion evaluate to 0,
//! except `true` which is 1.

use cfgcheck_core::preprocessor::parenthesized_len;
use std::collections::BTreeMap;
use std::iter::Peekable;
use thiserror::Error;

/// Macro expansion depth after which evaluation gives up.
const MAX_EXPANSION_DEPTH: usize = 64;

/// Failure to evaluate a condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    /// Nothing to evaluate.
    #[error("empty expression")]
    Empty,
    /// A character that cannot start any token.
    #[error("unexpected character `{0}`")]
    UnexpectedChar(char),
    /// A malformed numeric or character literal.
    #[error("invalid literal `{0}`")]
    InvalidLiteral(String),
    /// `defined` not followed by a macro name.
    #[error("`defined` without a macro name")]
    MissingDefinedName,
    /// A token where an operand or operator was expected.
    #[error("unexpected `{0}`")]
    UnexpectedToken(String),
    /// The expression ended early.
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    /// Division or remainder by zero in an evaluated operand.
    #[error("division by zero")]
    DivisionByZero,
    /// Macros expanding into each other too deeply.
    #[error("macro expansion of `{0}` is too deep")]
    TooDeep(String),
    /// A function-like macro invoked with the wrong number of arguments.
    #[error("macro `{name}` expects {expected} argument(s), got {found}")]
    ArgumentCount {
        /// Macro name.
        name: String,
        /// Named parameters of the macro.
        expected: usize,
        /// Arguments given.
        found: usize,
    },
}

/// A macro definition as seen by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    /// Parameters of a function-like macro, `None` for an object-like one.
    /// A trailing `...` collects the remaining arguments as `__VA_ARGS__`.
    pub params: Option<Vec<String>>,
    /// Replacement text.
    pub body: String,
}

impl Macro {
    /// An object-like macro.
    #[must_use]
    pub fn object(body: impl Into<String>) -> Self {
        Self {
            params: None,
            body: body.into(),
        }
    }

    /// A function-like macro.
    #[must_use]
    pub fn function(params: Vec<String>, body: impl Into<String>) -> Self {
        Self {
            params: Some(params),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Num(i64),
    Ident(String),
    Op(&'static str),
    Open,
    Close,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Ident(name) => f.write_str(name),
            Self::Op(op) => f.write_str(op),
            Self::Open => f.write_str("("),
            Self::Close => f.write_str(")"),
        }
    }
}

const TWO_CHAR_OPS: [&str; 8] = ["||", "&&", "==", "!=", "<=", ">=", "<<", ">>"];
const ONE_CHAR_OPS: [&str; 15] = [
    "!", "~", "+", "-", "*", "/", "%", "<", ">", "&", "|", "^", "?", ":", ",",
];

/// Evaluates a condition against the macros currently defined.
///
/// # Errors
///
/// Returns an [`ExprError`] if the expression is malformed or divides by
/// zero in an evaluated operand.
pub fn evaluate(expr: &str, macros: &BTreeMap<String, Macro>) -> Result<i64, ExprError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(ExprError::Empty);
    }
    let mut stack = Vec::new();
    let expanded = expand(tokens, macros, &mut stack)?;
    if expanded.is_empty() {
        return Err(ExprError::Empty);
    }

    let mut parser = Parser {
        tokens: expanded,
        pos: 0,
    };
    let value = parser.ternary(true)?;
    match parser.tokens.get(parser.pos) {
        None => Ok(value),
        Some(token) => Err(ExprError::UnexpectedToken(token.to_string())),
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            tokens.push(Token::Num(parse_number(&literal)?));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            if ident.starts_with("__has_") {
                // Header names and strings in the argument are not tokens
                // of the expression, so the whole `__has_*(...)` is consumed here.
                let open = chars[i..].iter().take_while(|c| c.is_whitespace()).count();
                if let Some(len) = parenthesized_len(&chars[i + open..]) {
                    tokens.push(Token::Num(0));
                    i += open + len;
                    continue;
                }
            }
            tokens.push(Token::Ident(ident));
        } else if c == '\'' {
            let end = chars[i + 1..]
                .iter()
                .position(|&ch| ch == '\'')
                .map(|offset| i + 1 + offset)
                .ok_or_else(|| ExprError::InvalidLiteral(chars[i..].iter().collect()))?;
            let literal: String = chars[i + 1..end].iter().collect();
            tokens.push(Token::Num(parse_char(&literal)?));
            i = end + 1;
        } else if c == '(' {
            tokens.push(Token::Open);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::Close);
            i += 1;
        } else {
            let pair: String = chars[i..chars.len().min(i + 2)].iter().collect();
            if let Some(op) = TWO_CHAR_OPS.iter().find(|op| **op == pair) {
                tokens.push(Token::Op(*op));
                i += 2;
            } else if let Some(op) = ONE_CHAR_OPS
                .iter()
                .find(|op| op.starts_with(c) && op.len() == c.len_utf8())
            {
                tokens.push(Token::Op(*op));
                i += 1;
            } else {
                return Err(ExprError::UnexpectedChar(c));
            }
        }
    }

    Ok(tokens)
}

// Preprocessor arithmetic is done in the widest type; values above
// i64::MAX wrap like unsigned arithmetic reinterpreted as signed.
#[allow(clippy::cast_possible_wrap)]
fn parse_number(literal: &str) -> Result<i64, ExprError> {
    let digits = literal.trim_end_matches(['u', 'U', 'l', 'L']);
    let (radix, body) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if let Some(bin) = digits
        .strip_prefix("0b")
        .or_else(|| digits.strip_prefix("0B"))
    {
        (2, bin)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    u64::from_str_radix(body, radix)
        .map(|value| value as i64)
        .map_err(|_| ExprError::InvalidLiteral(literal.to_string()))
}

fn parse_char(literal: &str) -> Result<i64, ExprError> {
    let value = match literal {
        "\\n" => '\n',
        "\\t" => '\t',
        "\\r" => '\r',
        "\\0" => '\0',
        "\\\\" => '\\',
        "\\'" => '\'',
        _ => {
            let mut chars = literal.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c != '\\' => c,
                _ => return Err(ExprError::InvalidLiteral(format!("'{literal}'"))),
            }
        }
    };
    Ok(i64::from(u32::from(value)))
}

/// Replaces `defined` forms and macro names with their values. `stack`
/// holds the macros being expanded, which are not expanded again.
fn expand(
    tokens: Vec<Token>,
    macros: &BTreeMap<String, Macro>,
    stack: &mut Vec<String>,
) -> Result<Vec<Token>, ExprError> {
    let mut result = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        let Token::Ident(name) = token else {
            result.push(token);
            continue;
        };

        if name == "defined" {
            let parenthesized = iter.next_if_eq(&Token::Open).is_some();
            let Some(Token::Ident(target)) = iter.next() else {
                return Err(ExprError::MissingDefinedName);
            };
            if parenthesized && iter.next() != Some(Token::Close) {
                return Err(ExprError::MissingDefinedName);
            }
            result.push(Token::Num(i64::from(macros.contains_key(&target))));
            continue;
        }

        let Some(def) = macros.get(&name).filter(|_| !stack.contains(&name)) else {
            result.push(Token::Num(i64::from(name == "true")));
            continue;
        };
        if stack.len() >= MAX_EXPANSION_DEPTH {
            return Err(ExprError::TooDeep(name));
        }

        let mut body = tokenize(&def.body)?;
        if let Some(params) = &def.params {
            // A function-like macro name not followed by `(` is not an
            // invocation.
            if iter.peek() != Some(&Token::Open) {
                result.push(Token::Num(0));
                continue;
            }
            let args = bind(&name, params, arguments(&mut iter)?)?;
            let mut substitutions = BTreeMap::new();
            for (param, arg) in args {
                substitutions.insert(param, expand(arg, macros, stack)?);
            }
            body = body
                .into_iter()
                .flat_map(|token| match token {
                    Token::Ident(id) => match substitutions.get(&id) {
                        Some(arg) => arg.clone(),
                        None => vec![Token::Ident(id)],
                    },
                    other => vec![other],
                })
                .collect();
        }

        stack.push(name);
        let expanded = expand(body, macros, stack);
        stack.pop();
        result.extend(expanded?);
    }

    Ok(result)
}

/// Reads the parenthesized, comma-separated arguments of an invocation.
/// The next token must be the opening parenthesis.
fn arguments<I>(iter: &mut Peekable<I>) -> Result<Vec<Vec<Token>>, ExprError>
where
    I: Iterator<Item = Token>,
{
    iter.next();
    let mut args = vec![Vec::new()];
    let mut depth = 0usize;

    for token in iter.by_ref() {
        match token {
            Token::Close if depth == 0 => return Ok(args),
            Token::Op(",") if depth == 0 => args.push(Vec::new()),
            other => {
                match other {
                    Token::Open => depth += 1,
                    Token::Close => depth -= 1,
                    _ => {}
                }
                if let Some(last) = args.last_mut() {
                    last.push(other);
                }
            }
        }
    }

    Err(ExprError::UnexpectedEnd)
}

/// Pairs parameters with arguments.
fn bind(
    name: &str,
    params: &[String],
    mut args: Vec<Vec<Token>>,
) -> Result<BTreeMap<String, Vec<Token>>, ExprError> {
    let variadic = params.last().is_some_and(|p| p == "...");
    let named = params.len() - usize::from(variadic);
    // `F()` passes one empty argument, which is none for `F` without
    // named parameters.
    if named == 0 && args.len() == 1 && args[0].is_empty() {
        args.clear();
    }

    let count_ok = if variadic {
        args.len() >= named
    } else {
        args.len() == named
    };
    if !count_ok {
        return Err(ExprError::ArgumentCount {
            name: name.to_string(),
            expected: named,
            found: args.len(),
        });
    }

    let rest = args.split_off(named);
    let mut bound: BTreeMap<String, Vec<Token>> = params.iter().cloned().zip(args).collect();
    if variadic {
        let mut joined = Vec::new();
        for (i, arg) in rest.into_iter().enumerate() {
            if i > 0 {
                joined.push(Token::Op(","));
            }
            joined.extend(arg);
        }
        bound.insert("__VA_ARGS__".to_string(), joined);
    }
    Ok(bound)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" => 4,
        "&" => 5,
        "==" | "!=" => 6,
        "<" | ">" | "<=" | ">=" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        _ => return None,
    })
}

impl Parser {
    fn next(&mut self) -> Result<Token, ExprError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    /// `live` is false inside operands that C would not evaluate, where
    /// division by zero is harmless.
    fn ternary(&mut self, live: bool) -> Result<i64, ExprError> {
        let condition = self.binary(1, live)?;
        if self.peek_op() != Some("?") {
            return Ok(condition);
        }
        self.pos += 1;
        let then = self.ternary(live && condition != 0)?;
        match self.next()? {
            Token::Op(":") => {}
            other => return Err(ExprError::UnexpectedToken(other.to_string())),
        }
        let otherwise = self.ternary(live && condition == 0)?;
        Ok(if condition != 0 { then } else { otherwise })
    }

    fn binary(&mut self, min: u8, live: bool) -> Result<i64, ExprError> {
        let mut lhs = self.unary(live)?;

        while let Some(op) = self.peek_op() {
            let Some(prec) = precedence(op) else { break };
            if prec < min {
                break;
            }
            self.pos += 1;
            let rhs_live = match op {
                "||" => live && lhs == 0,
                "&&" => live && lhs != 0,
                _ => live,
            };
            let rhs = self.binary(prec + 1, rhs_live)?;
            lhs = apply(op, lhs, rhs, rhs_live)?;
        }

        Ok(lhs)
    }

    fn unary(&mut self, live: bool) -> Result<i64, ExprError> {
        match self.next()? {
            Token::Num(n) => Ok(n),
            Token::Op("!") => Ok(i64::from(self.unary(live)? == 0)),
            Token::Op("-") => Ok(self.unary(live)?.wrapping_neg()),
            Token::Op("+") => self.unary(live),
            Token::Op("~") => Ok(!self.unary(live)?),
            Token::Open => {
                let value = self.ternary(live)?;
                match self.next()? {
                    Token::Close => Ok(value),
                    other => Err(ExprError::UnexpectedToken(other.to_string())),
                }
            }
            other => Err(ExprError::UnexpectedToken(other.to_string())),
        }
    }
}

fn apply(op: &str, lhs: i64, rhs: i64, live: bool) -> Result<i64, ExprError> {
    let shift = u32::try_from(rhs.clamp(0, 63)).unwrap_or(0);
    Ok(match op {
        "||" => i64::from(lhs != 0 || rhs != 0),
        "&&" => i64::from(lhs != 0 && rhs != 0),
        "|" => lhs | rhs,
        "^" => lhs ^ rhs,
        "&" => lhs & rhs,
        "==" => i64::from(lhs == rhs),
        "!=" => i64::from(lhs != rhs),
        "<" => i64::from(lhs < rhs),
        ">" => i64::from(lhs > rhs),
        "<=" => i64::from(lhs <= rhs),
        ">=" => i64::from(lhs >= rhs),
        "<<" => lhs.wrapping_shl(shift),
        ">>" => lhs.wrapping_shr(shift),
        "+" => lhs.wrapping_add(rhs),
        "-" => lhs.wrapping_sub(rhs),
        "*" => lhs.wrapping_mul(rhs),
        "/" | "%" if rhs == 0 => {
            if live {
                return Err(ExprError::DivisionByZero);
            }
            0
        }
        "/" => lhs.wrapping_div(rhs),
        "%" => lhs.wrapping_rem(rhs),
        other => return Err(ExprError::UnexpectedToken(other.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn macros(pairs: &[(&str, &str)]) -> BTreeMap<String, Macro> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Macro::object(*v)))
            .collect()
    }

    fn function(params: &[&str], body: &str) -> Macro {
        Macro::function(params.iter().map(ToString::to_string).collect(), body)
    }

    fn eval(expr: &str) -> i64 {
        evaluate(expr, &BTreeMap::new()).expect("evaluates")
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3"), 7);
        assert_eq!(eval("(1 + 2) * 3"), 9);
        assert_eq!(eval("10 - 4 - 3"), 3);
        assert_eq!(eval("1 << 4 | 1"), 17);
        assert_eq!(eval("-3 < 2"), 1);
        assert_eq!(eval("!0 && ~0"), 1);
        assert_eq!(eval("7 % 4 == 3"), 1);
        assert_eq!(eval("1 ? 2 : 3"), 2);
        assert_eq!(eval("0 ? 2 : 0 ? 4 : 5"), 5);
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("0x1F"), 31);
        assert_eq!(eval("010"), 8);
        assert_eq!(eval("0b101"), 5);
        assert_eq!(eval("201103L"), 201_103);
        assert_eq!(eval("10UL"), 10);
        assert_eq!(eval("'A'"), 65);
        assert_eq!(eval("'\\n'"), 10);
        assert!(matches!(
            evaluate("08", &BTreeMap::new()),
            Err(ExprError::InvalidLiteral(_))
        ));
    }

    #[test]
    fn test_defined_forms() {
        let m = macros(&[("A", "1")]);
        assert_eq!(evaluate("defined A", &m), Ok(1));
        assert_eq!(evaluate("defined(A) && !defined(B)", &m), Ok(1));
        assert_eq!(evaluate("defined ( B )", &m), Ok(0));
        assert_eq!(
            evaluate("defined", &m),
            Err(ExprError::MissingDefinedName)
        );
        assert_eq!(
            evaluate("defined(A", &m),
            Err(ExprError::MissingDefinedName)
        );
    }

    #[test]
    fn test_macro_values_expand_textually() {
        let m = macros(&[
            ("VERSION", "VERSION_MAJOR * 100 + 2"),
            ("VERSION_MAJOR", "3"),
            ("SUM", "1 + 1"),
        ]);
        assert_eq!(evaluate("VERSION >= 302", &m), Ok(1));
        assert_eq!(evaluate("SUM * 2", &m), Ok(3));
        assert_eq!(evaluate("UNKNOWN", &m), Ok(0));
        assert_eq!(evaluate("true && !false", &m), Ok(1));
    }

    #[test]
    fn test_self_referential_macro_terminates() {
        let m = macros(&[("LOOP", "LOOP + 1"), ("A", "B"), ("B", "A")]);
        assert_eq!(evaluate("LOOP", &m), Ok(1));
        assert_eq!(evaluate("A", &m), Ok(0));
    }

    #[test]
    fn test_empty_macro_is_an_error() {
        let m = macros(&[("EMPTY", "")]);
        assert_eq!(evaluate("EMPTY", &m), Err(ExprError::Empty));
        assert_eq!(evaluate("   ", &m), Err(ExprError::Empty));
    }

    #[test]
    fn test_has_checks_are_false() {
        assert_eq!(eval("__has_include(<optional>) || 2"), 1);
        assert_eq!(eval("__has_include(<optional>)"), 0);
        assert_eq!(eval("__has_include(<stdio.h>)"), 0);
        assert_eq!(eval("__has_include(<sys/stat.h>) ? 1 : 2"), 2);
        assert_eq!(eval("__has_include (\"config/local.h\") || 3"), 1);
        assert_eq!(eval("!__has_include_next(<c++/v1/new>)"), 1);
        assert_eq!(eval("__has_cpp_attribute(nodiscard) >= 201603L"), 0);
        assert_eq!(eval("__has_builtin(__builtin_expect((x), (0))) + 4"), 4);
    }

    #[test]
    fn test_has_check_inside_macro_body() {
        let m = macros(&[("HAVE_OPTIONAL", "__has_include(<optional>)")]);
        assert_eq!(evaluate("HAVE_OPTIONAL", &m), Ok(0));
        assert_eq!(evaluate("!HAVE_OPTIONAL", &m), Ok(1));
    }

    #[test]
    fn test_function_like_macros() {
        let mut m = macros(&[("MINOR", "8")]);
        m.insert("VER".to_string(), function(&["a", "b"], "((a) * 100 + (b))"));
        m.insert("ZERO".to_string(), function(&[], "0"));
        m.insert("ID".to_string(), function(&["x"], "x"));

        assert_eq!(evaluate("VER(4, 8) >= 400", &m), Ok(1));
        assert_eq!(evaluate("VER(4, MINOR) == 408", &m), Ok(1));
        assert_eq!(evaluate("VER((1 + 1), (2 * (3))) ", &m), Ok(206));
        assert_eq!(evaluate("ID(VER(1, 2))", &m), Ok(102));
        assert_eq!(evaluate("ID(ID(7))", &m), Ok(7));
        assert_eq!(evaluate("ZERO() + 1", &m), Ok(1));
        assert_eq!(evaluate("defined(VER) && defined ID", &m), Ok(1));
    }

    #[test]
    fn test_function_like_name_without_arguments_is_zero() {
        let m = BTreeMap::from([("F".to_string(), function(&["x"], "x + 5"))]);
        assert_eq!(evaluate("F", &m), Ok(0));
        assert_eq!(evaluate("F + 2", &m), Ok(2));
    }

    #[test]
    fn test_variadic_macros() {
        let m = BTreeMap::from([
            ("FIRST".to_string(), function(&["a", "..."], "a")),
            ("COUNT".to_string(), function(&["..."], "(__VA_ARGS__ + 0)")),
        ]);
        assert_eq!(evaluate("FIRST(3, 4, 5)", &m), Ok(3));
        assert_eq!(evaluate("FIRST(6)", &m), Ok(6));
        assert_eq!(evaluate("COUNT(2 * 5)", &m), Ok(10));
    }

    #[test]
    fn test_bad_invocations() {
        let m = BTreeMap::from([("VER".to_string(), function(&["a", "b"], "a + b"))]);
        assert_eq!(
            evaluate("VER(1)", &m),
            Err(ExprError::ArgumentCount {
                name: "VER".to_string(),
                expected: 2,
                found: 1
            })
        );
        assert_eq!(evaluate("VER(1, (2)", &m), Err(ExprError::UnexpectedEnd));
    }

    #[test]
    fn test_division_by_zero_only_when_evaluated() {
        assert_eq!(
            evaluate("1 / 0", &BTreeMap::new()),
            Err(ExprError::DivisionByZero)
        );
        assert_eq!(eval("0 && 1 / 0"), 0);
        assert_eq!(eval("1 || 1 % 0"), 1);
        assert_eq!(eval("0 ? 1 / 0 : 4"), 4);
    }

    #[test]
    fn test_malformed_expressions() {
        let none = BTreeMap::new();
        assert_eq!(evaluate("1 +", &none), Err(ExprError::UnexpectedEnd));
        assert_eq!(
            evaluate("(1", &none),
            Err(ExprError::UnexpectedEnd)
        );
        assert_eq!(
            evaluate("1 2", &none),
            Err(ExprError::UnexpectedToken("2".to_string()))
        );
        assert_eq!(evaluate("1 @ 2", &none), Err(ExprError::UnexpectedChar('@')));
    }
}
