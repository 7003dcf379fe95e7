// Copyright 2024 tison <wander4096@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::ops::RangeInclusive;

use jiff::civil::DateTime;
use jiff::Timestamp;
use winnow::ascii::dec_uint;
use winnow::combinator::alt;
use winnow::combinator::eof;
use winnow::combinator::separated;
use winnow::error::ContextError;
use winnow::error::ErrMode;
use winnow::error::ErrorKind as WinnowErrorKind;
use winnow::error::FromExternalError;
use winnow::stream::Stream;
use winnow::PResult;
use winnow::Parser;

use crate::bitset::Bitset64;
use crate::fieldset::FieldSet;
use crate::Error;
use crate::ErrorKind;

/// Normalize a schedule expression to compact, single-spaced, upper-case
/// form.
///
/// ```rust
/// use schedcron::normalize_crontab;
///
/// assert_eq!(normalize_crontab("  *   * * * * *  "), "* * * * * *");
/// assert_eq!(normalize_crontab("0 30 9 * * mon-fri"), "0 30 9 * * MON-FRI");
/// ```
pub fn normalize_crontab(input: &str) -> String {
    input
        .split_ascii_whitespace()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// The result of compiling an expression: either a recurring [`FieldSet`] or
/// a one-shot fixed instant, possibly still needing a timezone to resolve.
#[derive(Debug, Clone)]
pub(crate) enum ParsedExpression {
    Recurring(FieldSet),
    OneShot(OneShotLiteral),
}

#[derive(Debug, Clone)]
pub(crate) enum OneShotLiteral {
    Absolute(Timestamp),
    Naive(DateTime),
}

/// Compile a schedule expression into its [`FieldSet`] or one-shot form.
///
/// `legacy_mode` (whether day-of-month/day-of-week combine with OR or AND
/// semantics) does not affect compilation itself — both modes accept the
/// same set of expressions — so it is carried by [`crate::Schedule`] and
/// consulted only by the advancer at match time.
pub(crate) fn compile(input: &str) -> Result<ParsedExpression, Error> {
    let normalized = normalize_crontab(input);

    log::debug!("normalized input {input:?} to {normalized:?}");

    if looks_like_iso8601(&normalized) {
        return parse_iso8601(&normalized).map(ParsedExpression::OneShot);
    }

    if let Some(expansion) = expand_alias(&normalized)? {
        return compile_fields(&expansion);
    }

    compile_fields(&normalized)
}

fn expand_alias(normalized: &str) -> Result<Option<String>, Error> {
    if !normalized.starts_with('@') {
        return Ok(None);
    }

    let expansion = match normalized {
        "@YEARLY" | "@ANNUALLY" => "0 0 0 1 1 *",
        "@MONTHLY" => "0 0 0 1 * *",
        "@WEEKLY" => "0 0 0 * * 0",
        "@DAILY" => "0 0 0 * * *",
        "@HOURLY" => "0 0 * * * *",
        other => {
            return Err(Error::kind(
                ErrorKind::UnknownAlias,
                format!("unknown alias {other}"),
            ))
        }
    };

    Ok(Some(expansion.to_string()))
}

fn compile_fields(normalized: &str) -> Result<ParsedExpression, Error> {
    let parts: Vec<&str> = normalized.split(' ').collect();
    if parts.len() != 6 {
        return Err(Error::kind(
            ErrorKind::WrongFieldCount,
            format!(
                "expected 6 fields (second minute hour day-of-month month day-of-week); \
                found {} in {normalized:?}",
                parts.len()
            ),
        ));
    }

    let mut offset = 0usize;
    let mut part_start = |part: &str| {
        let start = offset;
        offset += part.len() + 1;
        start
    };

    let seconds_part = parts[0];
    let seconds_start = part_start(seconds_part);
    reject_illegal_chars(seconds_part, false, false)?;
    let (seconds, _) = parse_seconds
        .parse(seconds_part)
        .map_err(|err| format_parse_error(normalized, seconds_start, err))?;

    let minutes_part = parts[1];
    let minutes_start = part_start(minutes_part);
    reject_illegal_chars(minutes_part, false, false)?;
    let (minutes, _) = parse_minutes
        .parse(minutes_part)
        .map_err(|err| format_parse_error(normalized, minutes_start, err))?;

    let hours_part = parts[2];
    let hours_start = part_start(hours_part);
    reject_illegal_chars(hours_part, false, false)?;
    let (hours, _) = parse_hours
        .parse(hours_part)
        .map_err(|err| format_parse_error(normalized, hours_start, err))?;

    let days_of_month_part = parts[3];
    let days_of_month_start = part_start(days_of_month_part);
    reject_illegal_chars(days_of_month_part, false, true)?;
    let (days_of_month, day_of_month_restricted, last_day_of_month) = parse_days_of_month
        .parse(days_of_month_part)
        .map_err(|err| format_parse_error(normalized, days_of_month_start, err))?;

    let months_part = parts[4];
    let months_start = part_start(months_part);
    reject_illegal_chars(months_part, true, false)?;
    let (months, _) = parse_months
        .parse(months_part)
        .map_err(|err| format_parse_error(normalized, months_start, err))?;

    let days_of_week_part = parts[5];
    let days_of_week_start = part_start(days_of_week_part);
    reject_illegal_chars(days_of_week_part, true, false)?;
    let (days_of_week, day_of_week_restricted) = parse_days_of_week
        .parse(days_of_week_part)
        .map_err(|err| format_parse_error(normalized, days_of_week_start, err))?;

    if seconds.is_empty()
        || minutes.is_empty()
        || hours.is_empty()
        || (days_of_month.is_empty() && !last_day_of_month)
        || months.is_empty()
        || days_of_week.is_empty()
    {
        return Err(Error::kind(
            ErrorKind::InvalidField,
            "a field's acceptance set must not be empty".to_string(),
        ));
    }

    Ok(ParsedExpression::Recurring(FieldSet {
        seconds,
        minutes,
        hours,
        days_of_month,
        last_day_of_month,
        day_of_month_restricted,
        months,
        days_of_week,
        day_of_week_restricted,
    }))
}

/// Rejects characters outside the field's allowed class before handing off
/// to the winnow grammar, so a stray character is reported precisely rather
/// than as a generic grammar mismatch.
fn reject_illegal_chars(field: &str, allow_letters: bool, allow_last: bool) -> Result<(), Error> {
    for c in field.chars() {
        let ok = c.is_ascii_digit()
            || matches!(c, ',' | '-' | '*' | '/')
            || (allow_last && c == 'L')
            || (allow_letters && c.is_ascii_uppercase());
        if !ok {
            return Err(Error::kind(
                ErrorKind::IllegalCharacter,
                format!("illegal character {c:?} in field {field:?}"),
            ));
        }
    }
    Ok(())
}

fn format_parse_error(
    input: &str,
    start: usize,
    parse_error: winnow::error::ParseError<&str, ContextError>,
) -> Error {
    let context = "failed to parse schedule expression";

    let offset = start + parse_error.offset();
    let indent = " ".repeat(offset);

    let error = parse_error.into_inner().to_string();
    let error = if error.is_empty() {
        "malformed expression"
    } else {
        &error
    };

    Error::kind(
        ErrorKind::InvalidField,
        format!("{context}:\n{input}\n{indent}^ {error}"),
    )
}

fn looks_like_iso8601(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 19 && b[4] == b'-' && b[7] == b'-' && b[10] == b'T' && b[13] == b':' && b[16] == b':'
}

fn parse_iso8601(s: &str) -> Result<OneShotLiteral, Error> {
    let has_offset = s.ends_with('Z') || s[19..].contains('+') || s[19..].contains('-');

    if has_offset {
        s.parse::<Timestamp>()
            .map(OneShotLiteral::Absolute)
            .map_err(|err| {
                Error::kind(
                    ErrorKind::InvalidIsoLiteral,
                    format!("invalid ISO-8601 literal {s:?}: {err}"),
                )
            })
    } else {
        s.parse::<DateTime>()
            .map(OneShotLiteral::Naive)
            .map_err(|err| {
                Error::kind(
                    ErrorKind::InvalidIsoLiteral,
                    format!("invalid ISO-8601 literal {s:?}: {err}"),
                )
            })
    }
}

#[derive(Debug, Clone)]
enum FieldAtom {
    Wildcard(Vec<u8>),
    Values(Vec<u8>),
    Last,
}

/// Collapses a list of atoms into `(acceptance set, restricted, saw "L")`.
/// `restricted` is false only when the field was written as a bare `*`.
fn finish_field_atoms(atoms: Vec<FieldAtom>) -> (Bitset64, bool, bool) {
    let wildcard_only = atoms.len() == 1 && matches!(atoms[0], FieldAtom::Wildcard(_));

    let mut values = Bitset64::empty();
    let mut last = false;
    for atom in atoms {
        match atom {
            FieldAtom::Wildcard(vs) | FieldAtom::Values(vs) => {
                values = values.union(&Bitset64::from_values(vs));
            }
            FieldAtom::Last => last = true,
        }
    }

    (values, !wildcard_only, last)
}

fn parse_seconds(input: &mut &str) -> PResult<(Bitset64, bool)> {
    do_parse_number_only(|| 0..=59, input)
}

fn parse_minutes(input: &mut &str) -> PResult<(Bitset64, bool)> {
    do_parse_number_only(|| 0..=59, input)
}

fn parse_hours(input: &mut &str) -> PResult<(Bitset64, bool)> {
    do_parse_number_only(|| 0..=23, input)
}

fn do_parse_number_only(
    range: fn() -> RangeInclusive<u8>,
    input: &mut &str,
) -> PResult<(Bitset64, bool)> {
    let atoms = parse_list(alt((
        parse_step(range, parse_single_number).map(FieldAtom::Values),
        parse_range(range, parse_single_number).map(FieldAtom::Values),
        parse_single_number(range).map(|n| FieldAtom::Values(vec![n])),
        parse_asterisk(range).map(FieldAtom::Wildcard),
    )))
    .parse_next(input)?;

    let (values, restricted, _) = finish_field_atoms(atoms);
    Ok((values, restricted))
}

fn parse_days_of_month(input: &mut &str) -> PResult<(Bitset64, bool, bool)> {
    let range = || 1..=31u8;

    let atoms = parse_list(alt((
        "L".map(|_| FieldAtom::Last),
        parse_step(range, parse_single_number).map(FieldAtom::Values),
        parse_range(range, parse_single_number).map(FieldAtom::Values),
        parse_single_number(range).map(|n| FieldAtom::Values(vec![n])),
        parse_asterisk(range).map(FieldAtom::Wildcard),
    )))
    .parse_next(input)?;

    Ok(finish_field_atoms(atoms))
}

fn parse_single_month<'a>(
    range: fn() -> RangeInclusive<u8>,
) -> impl Parser<&'a str, u8, ContextError> {
    alt((
        "JAN".map(|_| 1),
        "FEB".map(|_| 2),
        "MAR".map(|_| 3),
        "APR".map(|_| 4),
        "MAY".map(|_| 5),
        "JUN".map(|_| 6),
        "JUL".map(|_| 7),
        "AUG".map(|_| 8),
        "SEP".map(|_| 9),
        "OCT".map(|_| 10),
        "NOV".map(|_| 11),
        "DEC".map(|_| 12),
        parse_single_number(range),
    ))
}

fn parse_months(input: &mut &str) -> PResult<(Bitset64, bool)> {
    let range = || 1..=12u8;

    let atoms = parse_list(alt((
        parse_step(range, parse_single_month).map(FieldAtom::Values),
        parse_range(range, parse_single_month).map(FieldAtom::Values),
        parse_single_month(range).map(|n| FieldAtom::Values(vec![n])),
        parse_asterisk(range).map(FieldAtom::Wildcard),
    )))
    .parse_next(input)?;

    let (values, restricted, _) = finish_field_atoms(atoms);
    Ok((values, restricted))
}

fn parse_single_day_of_week<'a>(
    range: fn() -> RangeInclusive<u8>,
) -> impl Parser<&'a str, u8, ContextError> {
    alt((
        "SUN".map(|_| 0),
        "MON".map(|_| 1),
        "TUE".map(|_| 2),
        "WED".map(|_| 3),
        "THU".map(|_| 4),
        "FRI".map(|_| 5),
        "SAT".map(|_| 6),
        parse_single_number(range),
    ))
}

fn fold_sunday(values: Vec<u8>) -> Vec<u8> {
    values
        .into_iter()
        .map(|v| if v == 7 { 0 } else { v })
        .collect()
}

fn parse_days_of_week(input: &mut &str) -> PResult<(Bitset64, bool)> {
    let range = || 0..=7u8;

    let atoms = parse_list(alt((
        parse_step(range, parse_single_day_of_week).map(|vs| FieldAtom::Values(fold_sunday(vs))),
        parse_range(range, parse_single_day_of_week).map(|vs| FieldAtom::Values(fold_sunday(vs))),
        parse_single_day_of_week(range).map(|n| FieldAtom::Values(fold_sunday(vec![n]))),
        parse_asterisk(range).map(|vs| FieldAtom::Wildcard(fold_sunday(vs))),
    )))
    .parse_next(input)?;

    let (values, restricted, _) = finish_field_atoms(atoms);
    Ok((values, restricted))
}

fn parse_asterisk<'a>(
    range: fn() -> RangeInclusive<u8>,
) -> impl Parser<&'a str, Vec<u8>, ContextError> {
    "*".map(move |_| range().collect())
}

fn parse_single_number<'a>(
    range: fn() -> RangeInclusive<u8>,
) -> impl Parser<&'a str, u8, ContextError> {
    dec_uint.try_map_cut(move |n: u64| {
        let range = range();

        if n > u8::MAX as u64 {
            return Err(Error::kind(
                ErrorKind::OutOfRange,
                format!("value must be in range {range:?}; found {n}"),
            ));
        }

        let n = n as u8;
        if range.contains(&n) {
            Ok(n)
        } else {
            Err(Error::kind(
                ErrorKind::OutOfRange,
                format!("value must be in range {range:?}; found {n}"),
            ))
        }
    })
}

fn parse_range<'a, P>(
    range: fn() -> RangeInclusive<u8>,
    parse_single_range_bound: fn(fn() -> RangeInclusive<u8>) -> P,
) -> impl Parser<&'a str, Vec<u8>, ContextError>
where
    P: Parser<&'a str, u8, ContextError>,
{
    (
        parse_single_range_bound(range),
        "-",
        parse_single_range_bound(range),
    )
        .try_map_cut(move |(lo, _, hi): (u8, _, u8)| {
            let range = range();

            if lo > hi {
                return Err(Error::kind(
                    ErrorKind::InvalidRange,
                    format!("range must be in ascending order; found {lo}-{hi}"),
                ));
            }

            if range.contains(&lo) && range.contains(&hi) {
                Ok((lo..=hi).collect())
            } else {
                Err(Error::kind(
                    ErrorKind::InvalidRange,
                    format!("range must be in range {range:?}; found {lo}-{hi}"),
                ))
            }
        })
}

fn parse_step<'a, P>(
    range: fn() -> RangeInclusive<u8>,
    parse_single_range_bound: fn(fn() -> RangeInclusive<u8>) -> P,
) -> impl Parser<&'a str, Vec<u8>, ContextError>
where
    P: Parser<&'a str, u8, ContextError>,
{
    let range_end = *range().end();

    let possible_values = alt((
        parse_asterisk(range),
        parse_range(range, parse_single_range_bound),
        parse_single_range_bound(range).map(move |n| (n..=range_end).collect()),
    ));

    (possible_values, "/", dec_uint).try_map_cut(move |(candidates, _, step): (Vec<u8>, _, u64)| {
        let range = range();

        if step == 0 {
            return Err(Error::kind(
                ErrorKind::InvalidStep,
                "step must be greater than 0".to_string(),
            ));
        }

        if step > u8::MAX as u64 || !range.contains(&(step as u8)) {
            return Err(Error::kind(
                ErrorKind::InvalidStep,
                format!("step must be in range {range:?}; found {step}"),
            ));
        }

        let step = step as u8;
        Ok(candidates.into_iter().step_by(step as usize).collect())
    })
}

fn parse_list<'a, P>(parse_list_item: P) -> impl Parser<&'a str, Vec<FieldAtom>, ContextError>
where
    P: Parser<&'a str, FieldAtom, ContextError>,
{
    (separated(1.., parse_list_item, ","), eof).map(move |(ns, _): (Vec<FieldAtom>, _)| ns)
}

trait ParserExt<I, O, E>: Parser<I, O, E> {
    #[inline(always)]
    fn try_map_cut<G, O2, E2>(self, map: G) -> TryMapCut<Self, G, I, O, O2, E, E2>
    where
        Self: Sized,
        G: FnMut(O) -> Result<O2, E2>,
        I: Stream,
        E: FromExternalError<I, E2>,
    {
        TryMapCut::new(self, map)
    }
}

struct TryMapCut<F, G, I, O, O2, E, E2>
where
    F: Parser<I, O, E>,
    G: FnMut(O) -> Result<O2, E2>,
    I: Stream,
    E: FromExternalError<I, E2>,
{
    parser: F,
    map: G,
    i: core::marker::PhantomData<I>,
    o: core::marker::PhantomData<O>,
    o2: core::marker::PhantomData<O2>,
    e: core::marker::PhantomData<E>,
    e2: core::marker::PhantomData<E2>,
}

impl<F, G, I, O, O2, E, E2> TryMapCut<F, G, I, O, O2, E, E2>
where
    F: Parser<I, O, E>,
    G: FnMut(O) -> Result<O2, E2>,
    I: Stream,
    E: FromExternalError<I, E2>,
{
    #[inline(always)]
    fn new(parser: F, map: G) -> Self {
        Self {
            parser,
            map,
            i: Default::default(),
            o: Default::default(),
            o2: Default::default(),
            e: Default::default(),
            e2: Default::default(),
        }
    }
}

impl<F, G, I, O, O2, E, E2> Parser<I, O2, E> for TryMapCut<F, G, I, O, O2, E, E2>
where
    F: Parser<I, O, E>,
    G: FnMut(O) -> Result<O2, E2>,
    I: Stream,
    E: FromExternalError<I, E2>,
{
    #[inline]
    fn parse_next(&mut self, input: &mut I) -> PResult<O2, E> {
        let start = input.checkpoint();
        let o = self.parser.parse_next(input)?;

        (self.map)(o).map_err(|err| {
            input.reset(&start);
            ErrMode::from_external_error(input, WinnowErrorKind::Verify, err).cut()
        })
    }
}

impl<I, O, E, P> ParserExt<I, O, E> for P where P: Parser<I, O, E> {}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;
    use insta::assert_snapshot;

    use super::*;
    use crate::setup_logging;

    fn recurring(input: &str) -> FieldSet {
        match compile(input).unwrap() {
            ParsedExpression::Recurring(fields) => fields,
            ParsedExpression::OneShot(_) => panic!("expected a recurring expression"),
        }
    }

    #[test]
    fn test_compile_success() {
        setup_logging();

        assert_debug_snapshot!(recurring("* * * * * *"));
        assert_debug_snapshot!(recurring("0 2 4 * * *"));
        assert_debug_snapshot!(recurring("0 2 4 * * 0-6"));
        assert_debug_snapshot!(recurring("0 2 4 */3 * 0-6"));
        assert_debug_snapshot!(recurring("0 0 0 1 JAN-FEB *"));
        assert_debug_snapshot!(recurring("0 0 0 15,L * *"));
        assert_debug_snapshot!(recurring("0 0 0 * * MON-FRI"));
        assert_debug_snapshot!(recurring("0 0 0 1 11 4"));
    }

    #[test]
    fn test_compile_failed() {
        setup_logging();

        assert_snapshot!(compile("invalid 4 * * * *").unwrap_err());
        assert_snapshot!(compile("* 5-4 * * * *").unwrap_err());
        assert_snapshot!(compile("10086 * * * * *").unwrap_err());
        assert_snapshot!(compile("* 0-24 * * * *").unwrap_err());
        assert_snapshot!(compile("* * * 25 * *").unwrap_err());
        assert_snapshot!(compile("* * * * * *  *").unwrap_err());
        assert!(compile("* * * * * *").is_ok());
        assert_snapshot!(compile("@unknown").unwrap_err());
    }

    #[test]
    fn test_aliases_expand_as_documented() {
        setup_logging();

        assert_debug_snapshot!(recurring("@yearly"));
        assert_debug_snapshot!(recurring("@annually"));
        assert_debug_snapshot!(recurring("@monthly"));
        assert_debug_snapshot!(recurring("@weekly"));
        assert_debug_snapshot!(recurring("@daily"));
        assert_debug_snapshot!(recurring("@hourly"));
    }

    #[test]
    fn test_dow_dom_month_combination_always_compiles() {
        setup_logging();

        // Constraining day-of-week together with day-of-month and month
        // compiles regardless of legacy_mode; legacy_mode only changes how
        // the advancer combines day-of-month/day-of-week at match time (OR
        // vs AND — see the strict/legacy scenario tests in `scenarios.rs`),
        // never whether the expression is accepted at compile time.
        assert!(compile("0 0 0 1 11 4").is_ok());
        assert!(compile("0 0 0 * * 4").is_ok());
    }

    #[test]
    fn test_one_shot_literal() {
        setup_logging();

        match compile("2024-01-01T00:00:00Z").unwrap() {
            ParsedExpression::OneShot(OneShotLiteral::Absolute(_)) => {}
            other => panic!("expected an absolute one-shot literal, got {other:?}"),
        }

        match compile("2024-01-01T00:00:00").unwrap() {
            ParsedExpression::OneShot(OneShotLiteral::Naive(_)) => {}
            other => panic!("expected a naive one-shot literal, got {other:?}"),
        }

        assert!(compile("2024-13-01T00:00:00Z").is_err());
    }
}
