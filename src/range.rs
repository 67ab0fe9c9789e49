//! Argument parsing for the filtered range commands
//!
//! ```text
//! <CMD> subject filter first second [WITHSCORES] [LIMIT offset count] [WITHSCORES]
//! ```
//!
//! For forward commands `first`/`second` are min/max; reverse commands take
//! them as max/min.

use crate::error::{KvError, Result};
use crate::types::{OutputOptions, PageSpec, ScanDirection, ScoreRange, SetOpMode};

/// Parse a score window boundary: an optional leading `(` marks it exclusive,
/// the remainder must be a strict float literal (`+inf`/`-inf` included).
pub fn parse_score_bound(token: &[u8]) -> Result<(f64, bool)> {
    let (text, exclusive) = match token.split_first() {
        Some((b'(', rest)) => (rest, true),
        _ => (token, false),
    };
    let value = parse_strict_float(text).ok_or(KvError::InvalidBound)?;
    Ok((value, exclusive))
}

/// Strict float parsing: no surrounding whitespace, no trailing garbage, no NaN,
/// and no silent overflow to infinity or underflow to zero.
pub fn parse_strict_float(text: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(text).ok()?;
    if s.is_empty() || s.starts_with(|c: char| c.is_ascii_whitespace()) {
        return None;
    }

    let value: f64 = s.parse().ok()?;
    if value.is_nan() {
        return None;
    }
    if value.is_infinite() && !is_infinity_literal(s) {
        return None;
    }
    if value == 0.0 && has_nonzero_mantissa(s) {
        return None;
    }
    Some(value)
}

fn is_infinity_literal(s: &str) -> bool {
    let unsigned = s.strip_prefix(|c: char| c == '+' || c == '-').unwrap_or(s);
    unsigned.eq_ignore_ascii_case("inf") || unsigned.eq_ignore_ascii_case("infinity")
}

fn has_nonzero_mantissa(s: &str) -> bool {
    s.split(|c: char| c == 'e' || c == 'E')
        .next()
        .map_or(false, |mantissa| mantissa.bytes().any(|b| (b'1'..=b'9').contains(&b)))
}

/// Strict integer parsing: optional `-`, digits only, no leading zeros, no `+`.
pub fn parse_strict_i64(token: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(token).ok()?;
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.starts_with('0') && (digits.len() > 1 || s.starts_with('-')) {
        return None;
    }
    s.parse().ok()
}

/// Read position over an immutable argument slice
pub struct ArgCursor<'a> {
    args: &'a [Vec<u8>],
    pos: usize,
}

impl<'a> ArgCursor<'a> {
    pub fn new(args: &'a [Vec<u8>]) -> Self {
        Self { args, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.args.len() - self.pos
    }

    pub fn next(&mut self) -> Option<&'a [u8]> {
        let arg = self.args.get(self.pos)?;
        self.pos += 1;
        Some(arg.as_slice())
    }

    /// Consume the next argument if it equals `keyword`, ignoring ASCII case
    pub fn next_if_keyword(&mut self, keyword: &str) -> bool {
        match self.args.get(self.pos) {
            Some(arg) if arg.eq_ignore_ascii_case(keyword.as_bytes()) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }
}

/// Parse `[WITHSCORES] [LIMIT offset count] [WITHSCORES]`.
///
/// `command` only names the command in the arity error.
pub fn parse_range_options(command: &str, tokens: &[Vec<u8>]) -> Result<(PageSpec, OutputOptions)> {
    let mut cursor = ArgCursor::new(tokens);
    let mut page = PageSpec::default();
    let mut output = OutputOptions::default();

    if cursor.next_if_keyword("WITHSCORES") {
        output.with_scores = true;
    }

    if cursor.remaining() >= 3 && cursor.next_if_keyword("LIMIT") {
        let offset = cursor
            .next()
            .and_then(parse_strict_i64)
            .ok_or(KvError::InvalidLimitArg("offset"))?;
        let limit = cursor
            .next()
            .and_then(parse_strict_i64)
            .ok_or(KvError::InvalidLimitArg("limit"))?;
        page = PageSpec::new(offset, limit);
    }

    if !output.with_scores && cursor.remaining() == 1 && cursor.next_if_keyword("WITHSCORES") {
        output.with_scores = true;
    }

    if cursor.remaining() > 0 {
        return Err(KvError::Arity(command.to_lowercase()));
    }

    Ok((page, output))
}

/// A fully parsed filtered range request
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    /// Sorted set being filtered
    pub subject: String,
    /// Sorted set supplying the membership test
    pub filter: String,
    /// First boundary token, as given: `(value, exclusive)`
    pub first: (f64, bool),
    /// Second boundary token, as given
    pub second: (f64, bool),
    pub mode: SetOpMode,
    pub direction: ScanDirection,
    pub page: PageSpec,
    pub output: OutputOptions,
}

impl RangeQuery {
    /// Build an unpaginated query; `first`/`second` follow the command convention
    /// (min/max forward, max/min reverse).
    pub fn new(
        subject: impl Into<String>,
        filter: impl Into<String>,
        first: (f64, bool),
        second: (f64, bool),
        mode: SetOpMode,
        direction: ScanDirection,
    ) -> Self {
        Self {
            subject: subject.into(),
            filter: filter.into(),
            first,
            second,
            mode,
            direction,
            page: PageSpec::default(),
            output: OutputOptions::default(),
        }
    }

    pub fn with_page(mut self, offset: i64, limit: i64) -> Self {
        self.page = PageSpec::new(offset, limit);
        self
    }

    pub fn with_scores(mut self) -> Self {
        self.output.with_scores = true;
        self
    }

    /// Parse command arguments (command name excluded)
    pub fn parse(
        command: &str,
        args: &[Vec<u8>],
        mode: SetOpMode,
        direction: ScanDirection,
    ) -> Result<Self> {
        if args.len() < 4 {
            return Err(KvError::Arity(command.to_lowercase()));
        }

        let subject = key_arg(&args[0])?;
        let filter = key_arg(&args[1])?;

        if let Some(first_option) = args.get(4) {
            tracing::trace!(
                command,
                option = %String::from_utf8_lossy(first_option),
                "range options"
            );
        }
        let (page, output) = parse_range_options(command, &args[4..])?;

        let first = parse_score_bound(&args[2])?;
        let second = parse_score_bound(&args[3])?;

        Ok(Self {
            subject,
            filter,
            first,
            second,
            mode,
            direction,
            page,
            output,
        })
    }

    /// True when the request can be answered without touching any key:
    /// forward needs `first <= second`, reverse needs `first > second`.
    pub fn is_empty_window(&self) -> bool {
        self.direction.is_reverse() ^ (self.first.0 > self.second.0)
    }

    /// The window as lower/upper bounds for the range scan
    pub fn window(&self) -> ScoreRange {
        let ((lo, lo_ex), (hi, hi_ex)) = match self.direction {
            ScanDirection::Forward => (self.first, self.second),
            ScanDirection::Reverse => (self.second, self.first),
        };
        ScoreRange::new(lo, lo_ex, hi, hi_ex)
    }
}

fn key_arg(arg: &[u8]) -> Result<String> {
    std::str::from_utf8(arg)
        .map(str::to_string)
        .map_err(|_| KvError::InvalidKey)
}
