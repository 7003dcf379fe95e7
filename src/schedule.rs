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

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use jiff::tz::TimeZone;
use jiff::SignedDuration;
use jiff::Timestamp;

use crate::advance::advance;
use crate::driver::CatchPolicy;
use crate::driver::JobDriver;
use crate::driver::Timer;
use crate::fieldset::FieldSet;
use crate::parser;
use crate::parser::OneShotLiteral;
use crate::parser::ParsedExpression;
use crate::time::BrokenDownTime;
use crate::Error;
use crate::ErrorKind;

#[derive(Debug, Clone)]
enum Compiled {
    Recurring(FieldSet),
    OneShot(Timestamp),
}

/// Construction options for a [`Schedule`]. `legacy_mode` defaults to `true`
/// (the historical `cron(8)` OR combination of day-of-month/day-of-week);
/// every other option defaults to "unrestricted".
pub struct ScheduleOptions<C = ()> {
    /// The schedule produces no occurrence before this instant.
    pub start_at: Option<Timestamp>,
    /// The schedule produces no occurrence after this instant.
    pub stop_at: Option<Timestamp>,
    /// Caps the number of invocations a driver built from this schedule will
    /// make. `None` means unbounded.
    pub max_runs: Option<i64>,
    /// IANA timezone name the expression is evaluated in. `None` resolves to
    /// the host's local timezone.
    pub timezone: Option<String>,
    /// Whether day-of-month/day-of-week restrictions combine with OR (the
    /// `cron(8)` legacy behavior) instead of AND.
    pub legacy_mode: bool,
    /// Whether a driver built from this schedule starts paused.
    pub paused: bool,
    /// Whether overlapping invocations are skipped rather than run
    /// concurrently.
    pub protect: bool,
    /// What a driver does with a callback error.
    pub catch: CatchPolicy,
    /// Arbitrary user context threaded through to every callback invocation.
    pub context: C,
    /// A name to register the driver under so it is visible to
    /// [`crate::scheduled_jobs`]. Duplicate names are rejected.
    pub name: Option<String>,
}

impl<C: Default> Default for ScheduleOptions<C> {
    fn default() -> Self {
        ScheduleOptions {
            start_at: None,
            stop_at: None,
            max_runs: None,
            timezone: None,
            legacy_mode: true,
            paused: false,
            protect: false,
            catch: CatchPolicy::default(),
            context: C::default(),
            name: None,
        }
    }
}

#[derive(Default)]
struct ScheduleState {
    remaining_runs: Mutex<Option<i64>>,
    previous_run: Mutex<Option<Timestamp>>,
}

/// A compiled schedule expression plus its options.
///
/// Immutable after construction, with one exception: the run-count and
/// previous-fire bookkeeping are held behind an `Arc` so a [`JobDriver`] can
/// update them as it fires, and [`Schedule::next`]/[`Schedule::previous`]
/// observe the update.
pub struct Schedule<C = ()> {
    compiled: Compiled,
    pub(crate) legacy_mode: bool,
    timezone: TimeZone,
    pub(crate) start_at: Option<Timestamp>,
    stop_at: Option<Timestamp>,
    pub(crate) protect: bool,
    pub(crate) catch: CatchPolicy,
    pub(crate) context: C,
    name: Option<String>,
    pub(crate) paused_initial: bool,
    normalized: String,
    state: Arc<ScheduleState>,
}

impl<C> Schedule<C> {
    /// Compiles `expression` under `options`. The expression may be a
    /// six-field crontab pattern, one of the `@yearly`/`@monthly`/...
    /// aliases, or an ISO-8601 literal for a one-shot fire.
    pub fn new(expression: &str, options: ScheduleOptions<C>) -> Result<Self, Error> {
        let timezone = match &options.timezone {
            Some(name) => TimeZone::get(name).map_err(|err| {
                Error::kind(
                    ErrorKind::InvalidReference,
                    format!("unknown timezone {name:?}: {err}"),
                )
            })?,
            None => TimeZone::system(),
        };

        let parsed = parser::compile(expression)?;
        let compiled = match parsed {
            ParsedExpression::Recurring(fields) => Compiled::Recurring(fields),
            ParsedExpression::OneShot(OneShotLiteral::Absolute(ts)) => Compiled::OneShot(ts),
            ParsedExpression::OneShot(OneShotLiteral::Naive(dt)) => {
                let zoned = dt.to_zoned(timezone.clone()).map_err(|err| {
                    Error::kind(
                        ErrorKind::InvalidReference,
                        format!("one-shot literal does not resolve in {timezone:?}: {err}"),
                    )
                })?;
                Compiled::OneShot(zoned.timestamp())
            }
        };

        Ok(Schedule {
            normalized: parser::normalize_crontab(expression),
            compiled,
            legacy_mode: options.legacy_mode,
            timezone,
            start_at: options.start_at,
            stop_at: options.stop_at,
            protect: options.protect,
            catch: options.catch,
            context: options.context,
            name: options.name,
            paused_initial: options.paused,
            state: Arc::new(ScheduleState {
                remaining_runs: Mutex::new(options.max_runs),
                previous_run: Mutex::new(None),
            }),
        })
    }

    /// The next instant strictly after `from` (or now, if `from` is `None`)
    /// that this schedule accepts, or `None` if the schedule is exhausted
    /// (run budget spent, past `stop_at`, or — for recurring patterns — no
    /// occurrence exists within the search horizon).
    pub fn next(&self, from: Option<Timestamp>) -> Result<Option<Timestamp>, Error> {
        if matches!(*self.state.remaining_runs.lock().unwrap(), Some(r) if r <= 0) {
            return Ok(None);
        }

        let mut from = from.unwrap_or_else(Timestamp::now);
        if let Some(start_at) = self.start_at {
            let clamp = start_at
                .checked_sub(SignedDuration::from_millis(1))
                .unwrap_or(start_at);
            if from < clamp {
                from = clamp;
            }
        }

        let candidate = match &self.compiled {
            Compiled::OneShot(instant) => {
                let truncated = Timestamp::from_second(instant.as_second())
                    .map_err(|err| Error::kind(ErrorKind::InvalidReference, err.to_string()))?;
                (truncated > from).then_some(truncated)
            }
            Compiled::Recurring(fields) => {
                let zoned = from.to_zoned(self.timezone.clone());
                let bdt = BrokenDownTime::from_zoned(&zoned);
                match advance(fields, &bdt, self.legacy_mode) {
                    Some(next_bdt) => Some(next_bdt.to_zoned(&self.timezone)?.timestamp()),
                    None => None,
                }
            }
        };

        Ok(candidate.filter(|ts| self.stop_at.map(|stop| *ts <= stop).unwrap_or(true)))
    }

    /// Collects up to `n` successive occurrences starting after `from`,
    /// stopping early if the schedule is exhausted.
    pub fn next_n(&self, n: usize, from: Option<Timestamp>) -> Result<Vec<Timestamp>, Error> {
        let mut results = Vec::with_capacity(n);
        let mut cursor = from;
        for _ in 0..n {
            match self.next(cursor)? {
                Some(ts) => {
                    results.push(ts);
                    cursor = Some(ts);
                }
                None => break,
            }
        }
        Ok(results)
    }

    /// Milliseconds until the next occurrence after `from` (or now), clamped
    /// to zero if it has already passed.
    pub fn ms_to_next(&self, from: Option<Timestamp>) -> Result<Option<i64>, Error> {
        let from = from.unwrap_or_else(Timestamp::now);
        Ok(self
            .next(Some(from))?
            .map(|next| (next.as_millisecond() - from.as_millisecond()).max(0)))
    }

    /// The instant a driver built from this schedule most recently fired
    /// for, if any.
    pub fn previous(&self) -> Option<Timestamp> {
        *self.state.previous_run.lock().unwrap()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn record_fire(&self, at: Timestamp) {
        *self.state.previous_run.lock().unwrap() = Some(at);
    }

    /// Atomically claims one unit of run budget. Returns `false` (and claims
    /// nothing) once the budget reaches zero; always returns `true` when
    /// `max_runs` is unbounded.
    pub(crate) fn take_run_slot(&self) -> bool {
        let mut remaining = self.state.remaining_runs.lock().unwrap();
        match *remaining {
            Some(r) if r <= 0 => false,
            Some(r) => {
                *remaining = Some(r - 1);
                true
            }
            None => true,
        }
    }
}

impl<C: Clone + Send + Sync + 'static> Schedule<C> {
    /// Consumes this schedule and starts driving it: arms `timer` for the
    /// next occurrence, invokes `callback` on every non-paused fire, and
    /// re-arms. Returns the [`JobDriver`] controlling the resulting job.
    pub fn schedule<F>(self, timer: Arc<dyn Timer>, callback: F) -> Result<Arc<JobDriver<C>>, Error>
    where
        F: Fn(&JobDriver<C>, &C) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        JobDriver::spawn(self, timer, callback)
    }
}

impl<C> fmt::Display for Schedule<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized)
    }
}
