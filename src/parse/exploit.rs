//! Exploit lookup output parsing.
//!
//! The lookup tool prints one record per line, shaped like
//! `{"Title":"...","EDB-ID":"45233","Type":"remote","Path":"..."},`. Only
//! lines containing the `Title` field marker are candidates. Each candidate
//! is read with a small dedicated grammar: a brace-delimited list of
//! `key: value` pairs where keys are quoted strings and values are quoted
//! strings or bare scalars. Anything else (nesting, lists, expressions) is a
//! syntax error.

use std::collections::BTreeMap;
use tracing::warn;

use super::{MalformedLinePolicy, ParseAnomaly, ParseError};
use crate::storage::ExploitRecord;

/// Substring that makes a line a candidate record.
pub const FIELD_MARKER: &str = "Title";

/// Optional separator trailing a record line.
const SEPARATOR: char = ',';

/// Records and anomalies from one output buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExploitParse {
    pub records: Vec<ExploitRecord>,
    pub anomalies: Vec<ParseAnomaly>,
}

/// Whether `line` is a candidate record.
pub fn is_candidate(line: &str) -> bool {
    line.contains(FIELD_MARKER)
}

/// Parse one candidate line into an exploit record.
pub fn parse_exploit_line(line: &str) -> Result<ExploitRecord, ParseError> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_suffix(SEPARATOR).unwrap_or(trimmed);
    let mut fields = parse_record(trimmed)?;

    let mut take = |field: &'static str| fields.remove(field).ok_or(ParseError::MissingField(field));
    Ok(ExploitRecord {
        kind: take("Type")?,
        title: take("Title")?,
        path: take("Path")?,
    })
}

/// Parse a whole stdout buffer.
///
/// Under [`MalformedLinePolicy::Skip`] bad lines become anomalies; under
/// [`MalformedLinePolicy::FailFast`] the first one is returned as an error.
pub fn parse_exploit_output(
    origin: &str,
    output: &str,
    policy: MalformedLinePolicy,
) -> Result<ExploitParse, ParseError> {
    let mut parsed = ExploitParse::default();
    for line in output.lines().filter(|l| is_candidate(l)) {
        match parse_exploit_line(line) {
            Ok(record) => parsed.records.push(record),
            Err(error) => match policy {
                MalformedLinePolicy::FailFast => return Err(error),
                MalformedLinePolicy::Skip => {
                    warn!(origin, error = %error, "skipping malformed exploit line");
                    parsed.anomalies.push(ParseAnomaly::MalformedLine {
                        origin: origin.to_string(),
                        line: line.trim().to_string(),
                        error,
                    });
                }
            },
        }
    }
    Ok(parsed)
}

/// Parse `{ key: value, ... }` into a map of strings.
pub fn parse_record(input: &str) -> Result<BTreeMap<String, String>, ParseError> {
    let mut cursor = Cursor::new(input);
    let mut fields = BTreeMap::new();

    cursor.skip_ws();
    cursor.expect('{')?;
    cursor.skip_ws();
    if cursor.eat('}') {
        return cursor.finish(fields);
    }

    loop {
        cursor.skip_ws();
        let key = cursor.quoted()?;
        cursor.skip_ws();
        cursor.expect(':')?;
        cursor.skip_ws();
        let value = cursor.value()?;
        fields.insert(key, value);
        cursor.skip_ws();
        if cursor.eat(',') {
            continue;
        }
        cursor.expect('}')?;
        return cursor.finish(fields);
    }
}

struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    len: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            len: input.len(),
        }
    }

    fn column(&mut self) -> usize {
        self.chars.peek().map(|(i, _)| *i).unwrap_or(self.len)
    }

    fn skip_ws(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn eat(&mut self, expected: char) -> bool {
        self.chars.next_if(|(_, c)| *c == expected).is_some()
    }

    fn expect(&mut self, expected: char) -> Result<(), ParseError> {
        let column = self.column();
        match self.chars.next() {
            Some((_, c)) if c == expected => Ok(()),
            Some((_, c)) => Err(ParseError::syntax(
                column,
                format!("expected '{}', found '{}'", expected, c),
            )),
            None => Err(ParseError::syntax(
                column,
                format!("expected '{}', found end of line", expected),
            )),
        }
    }

    fn finish(
        mut self,
        fields: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, ParseError> {
        self.skip_ws();
        let column = self.column();
        match self.chars.next() {
            None => Ok(fields),
            Some(_) => Err(ParseError::syntax(column, "trailing content after record")),
        }
    }

    /// A single- or double-quoted string with backslash escapes.
    fn quoted(&mut self) -> Result<String, ParseError> {
        let column = self.column();
        let quote = match self.chars.next() {
            Some((_, c @ ('"' | '\''))) => c,
            _ => return Err(ParseError::syntax(column, "expected quoted string")),
        };

        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(ParseError::syntax(self.len, "unterminated string")),
                Some((_, c)) if c == quote => return Ok(out),
                Some((at, '\\')) => out.push(self.escape(at)?),
                Some((_, c)) => out.push(c),
            }
        }
    }

    fn escape(&mut self, at: usize) -> Result<char, ParseError> {
        match self.chars.next() {
            Some((_, 'n')) => Ok('\n'),
            Some((_, 't')) => Ok('\t'),
            Some((_, 'r')) => Ok('\r'),
            Some((_, 'b')) => Ok('\u{8}'),
            Some((_, 'f')) => Ok('\u{c}'),
            Some((_, 'u')) => {
                let code = self.hex4(at)?;
                let code = match code {
                    // High surrogate: the low half must follow as another \u escape.
                    0xD800..=0xDBFF => {
                        if !(self.eat('\\') && self.eat('u')) {
                            return Err(ParseError::syntax(at, "unpaired surrogate in unicode escape"));
                        }
                        let low = self.hex4(at)?;
                        if !(0xDC00..=0xDFFF).contains(&low) {
                            return Err(ParseError::syntax(at, "unpaired surrogate in unicode escape"));
                        }
                        0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00)
                    }
                    _ => code,
                };
                char::from_u32(code).ok_or_else(|| ParseError::syntax(at, "invalid unicode escape"))
            }
            Some((_, c @ ('"' | '\'' | '\\' | '/'))) => Ok(c),
            Some((_, c)) => Err(ParseError::syntax(at, format!("unknown escape '\\{}'", c))),
            None => Err(ParseError::syntax(at, "unterminated escape")),
        }
    }

    /// Four hex digits of a `\u` escape.
    fn hex4(&mut self, at: usize) -> Result<u32, ParseError> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .chars
                .next()
                .and_then(|(_, c)| c.to_digit(16))
                .ok_or_else(|| ParseError::syntax(at, "invalid unicode escape"))?;
            code = code * 16 + digit;
        }
        Ok(code)
    }

    /// A quoted string or a bare scalar (number, true, false, null).
    fn value(&mut self) -> Result<String, ParseError> {
        match self.chars.peek() {
            Some((_, '"' | '\'')) => self.quoted(),
            Some((column, c)) if matches!(*c, '{' | '[' | '(') => Err(ParseError::syntax(
                *column,
                "nested values are not supported",
            )),
            _ => {
                let column = self.column();
                let mut out = String::new();
                while let Some((_, c)) = self
                    .chars
                    .next_if(|(_, c)| c.is_ascii_alphanumeric() || matches!(*c, '.' | '-' | '+' | '_'))
                {
                    out.push(c);
                }
                if out.is_empty() {
                    return Err(ParseError::syntax(column, "expected value"));
                }
                Ok(out)
            }
        }
    }
}
