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

//! The field-cascade algorithm: given a compiled [`FieldSet`] and a reference
//! [`BrokenDownTime`], finds the smallest strictly-later instant the set
//! accepts.

use crate::fieldset::FieldSet;
use crate::time::BrokenDownTime;

/// How many calendar years beyond the reference instant the search may run
/// before giving up. Chosen to comfortably cover leap-day-on-a-given-weekday
/// patterns, which recur on a 28-year cycle, while still bounding genuinely
/// unsatisfiable patterns (e.g. "day 31 of February") to a finite search.
const YEAR_HORIZON: i16 = 100;

/// Advances `start` to the next instant accepted by `fields`, or `None` if
/// no such instant exists within the search horizon.
pub(crate) fn advance(
    fields: &FieldSet,
    start: &BrokenDownTime,
    legacy_mode: bool,
) -> Option<BrokenDownTime> {
    let mut t = *start;
    t.millisecond = 0;
    t.second += 1;
    t.carry_from_second();

    let horizon_year = t.year.saturating_add(YEAR_HORIZON);

    loop {
        if t.year > horizon_year {
            return None;
        }

        if advance_month(fields, &mut t) {
            continue;
        }
        if advance_day(fields, legacy_mode, &mut t) {
            continue;
        }
        if advance_hour(fields, &mut t) {
            continue;
        }
        if advance_minute(fields, &mut t) {
            continue;
        }
        if advance_second(fields, &mut t) {
            continue;
        }

        return Some(t);
    }
}

fn reset_time_of_day(fields: &FieldSet, t: &mut BrokenDownTime) {
    t.hour = fields.hours.min().expect("non-empty by compiler invariant") as i8;
    t.minute = fields.minutes.min().expect("non-empty by compiler invariant") as i8;
    t.second = fields.seconds.min().expect("non-empty by compiler invariant") as i8;
}

/// Resets only minute and second to their field minima. Used when a carry
/// lands on the hour field itself — resetting `hour` too would clobber the
/// very carry this reset is supposed to follow up on.
fn reset_minute_and_second(fields: &FieldSet, t: &mut BrokenDownTime) {
    t.minute = fields.minutes.min().expect("non-empty by compiler invariant") as i8;
    t.second = fields.seconds.min().expect("non-empty by compiler invariant") as i8;
}

/// Resets only second to its field minimum. Used when a carry lands on the
/// minute field itself — see [`reset_minute_and_second`].
fn reset_second(fields: &FieldSet, t: &mut BrokenDownTime) {
    t.second = fields.seconds.min().expect("non-empty by compiler invariant") as i8;
}

/// Returns `true` if `t` was changed.
fn advance_month(fields: &FieldSet, t: &mut BrokenDownTime) -> bool {
    let current = (t.month + 1) as u8;
    match fields.months.next_set_bit(current) {
        Some(m) if m == current => false,
        Some(m) => {
            t.month = m as i8 - 1;
            t.day = 1;
            reset_time_of_day(fields, t);
            true
        }
        None => {
            t.year += 1;
            t.month = fields.months.min().expect("non-empty by compiler invariant") as i8 - 1;
            t.day = 1;
            reset_time_of_day(fields, t);
            true
        }
    }
}

/// Returns `true` if `t` was changed. Unlike the other fields, day-of-month
/// combines with day-of-week under strict/legacy rules, so it cannot be
/// resolved with a single bitset jump — the days in a month are walked one
/// at a time, per §4.3.
fn advance_day(fields: &FieldSet, legacy_mode: bool, t: &mut BrokenDownTime) -> bool {
    let days_in_month = t.days_in_month() as u8;
    if fields.day_matches(t.day as u8, days_in_month, t.weekday(), legacy_mode) {
        return false;
    }
    t.day += 1;
    t.carry_from_day();
    reset_time_of_day(fields, t);
    true
}

fn advance_hour(fields: &FieldSet, t: &mut BrokenDownTime) -> bool {
    let current = t.hour as u8;
    match fields.hours.next_set_bit(current) {
        Some(h) if h == current => false,
        Some(h) => {
            t.hour = h as i8;
            t.minute = fields.minutes.min().expect("non-empty by compiler invariant") as i8;
            t.second = fields.seconds.min().expect("non-empty by compiler invariant") as i8;
            true
        }
        None => {
            t.day += 1;
            t.carry_from_day();
            reset_time_of_day(fields, t);
            true
        }
    }
}

fn advance_minute(fields: &FieldSet, t: &mut BrokenDownTime) -> bool {
    let current = t.minute as u8;
    match fields.minutes.next_set_bit(current) {
        Some(m) if m == current => false,
        Some(m) => {
            t.minute = m as i8;
            t.second = fields.seconds.min().expect("non-empty by compiler invariant") as i8;
            true
        }
        None => {
            t.hour += 1;
            t.carry_from_hour();
            reset_minute_and_second(fields, t);
            true
        }
    }
}

fn advance_second(fields: &FieldSet, t: &mut BrokenDownTime) -> bool {
    let current = t.second as u8;
    match fields.seconds.next_set_bit(current) {
        Some(s) if s == current => false,
        Some(s) => {
            t.second = s as i8;
            true
        }
        None => {
            t.minute += 1;
            t.carry_from_minute();
            reset_second(fields, t);
            true
        }
    }
}
