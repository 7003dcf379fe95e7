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

//! The numbered concrete scenarios from the schedule-expression reference
//! material, pinned to UTC so the calendar arithmetic is reproducible
//! regardless of the host's local timezone.

#![cfg(test)]

use jiff::civil::Date;
use jiff::civil::Time;
use jiff::tz::TimeZone;
use jiff::Timestamp;

use crate::setup_logging;
use crate::Schedule;
use crate::ScheduleOptions;

fn midnight_utc(year: i16, month: i8, day: i8) -> Timestamp {
    Date::new(year, month, day)
        .unwrap()
        .to_datetime(Time::new(0, 0, 0, 0).unwrap())
        .to_zoned(TimeZone::UTC)
        .unwrap()
        .timestamp()
}

fn utc_options<C: Default>() -> ScheduleOptions<C> {
    ScheduleOptions {
        timezone: Some("UTC".to_string()),
        ..Default::default()
    }
}

#[test]
fn yearly_alias_lands_on_new_years_day() {
    setup_logging();
    let schedule = Schedule::<()>::new("@yearly", utc_options()).unwrap();
    let from = midnight_utc(2022, 2, 17);
    let next_three = schedule.next_n(3, Some(from)).unwrap();
    assert_eq!(
        next_three,
        vec![
            midnight_utc(2023, 1, 1),
            midnight_utc(2024, 1, 1),
            midnight_utc(2025, 1, 1),
        ]
    );
}

#[test]
fn last_day_of_month_cycles_through_shrinking_and_growing_months() {
    setup_logging();
    let schedule = Schedule::<()>::new("0 0 0 L * *", utc_options()).unwrap();
    let from = midnight_utc(2022, 1, 1);
    let next_three = schedule.next_n(3, Some(from)).unwrap();
    assert_eq!(
        next_three,
        vec![
            midnight_utc(2022, 1, 31),
            midnight_utc(2022, 2, 28),
            midnight_utc(2022, 3, 31),
        ]
    );
}

#[test]
fn fifteenth_and_last_day_interleave() {
    setup_logging();
    let schedule = Schedule::<()>::new("0 0 0 15,L * *", utc_options()).unwrap();
    let from = midnight_utc(2022, 1, 1);
    let next_four = schedule.next_n(4, Some(from)).unwrap();
    assert_eq!(
        next_four,
        vec![
            midnight_utc(2022, 1, 15),
            midnight_utc(2022, 1, 31),
            midnight_utc(2022, 2, 15),
            midnight_utc(2022, 2, 28),
        ]
    );
}

#[test]
fn february_31st_never_occurs() {
    setup_logging();
    let schedule = Schedule::<()>::new("* * * 31 2 *", utc_options()).unwrap();
    let from = midnight_utc(2022, 1, 1);
    assert_eq!(schedule.next(Some(from)).unwrap(), None);
}

#[test]
fn strict_mode_requires_day_and_weekday_simultaneously() {
    setup_logging();
    let from = midnight_utc(2021, 10, 13);

    let strict = Schedule::<()>::new(
        "0 0 0 1 11 4",
        ScheduleOptions {
            legacy_mode: false,
            ..utc_options()
        },
    )
    .unwrap();
    let strict_next = strict.next(Some(from)).unwrap().unwrap();
    assert_eq!(strict_next, midnight_utc(2029, 11, 1));

    let legacy = Schedule::<()>::new(
        "0 0 0 1 11 4",
        ScheduleOptions {
            legacy_mode: true,
            ..utc_options()
        },
    )
    .unwrap();
    let legacy_next = legacy.next(Some(from)).unwrap().unwrap();
    assert_eq!(legacy_next, midnight_utc(2021, 11, 1));
}

#[test]
fn strict_mode_leap_day_on_saturday_is_rare() {
    setup_logging();
    let schedule = Schedule::<()>::new(
        "0 0 0 29 FEB SAT",
        ScheduleOptions {
            legacy_mode: false,
            ..utc_options()
        },
    )
    .unwrap();
    let from = midnight_utc(2021, 10, 13);
    let next = schedule.next(Some(from)).unwrap().unwrap();
    assert_eq!(next, midnight_utc(2048, 2, 29));
}

#[test]
fn case_insensitive_month_and_weekday_names() {
    setup_logging();
    let lower = Schedule::<()>::new(
        "0 0 0 29 feb sat",
        ScheduleOptions {
            legacy_mode: false,
            ..utc_options()
        },
    )
    .unwrap();
    let upper = Schedule::<()>::new(
        "0 0 0 29 FEB SAT",
        ScheduleOptions {
            legacy_mode: false,
            ..utc_options()
        },
    )
    .unwrap();
    assert_eq!(lower.to_string(), upper.to_string());
}

#[test]
fn every_second_for_a_year_lands_exactly_365_days_later() {
    setup_logging();
    let schedule = Schedule::<()>::new("0 0 0 * * *", utc_options()).unwrap();
    let from = midnight_utc(2022, 1, 1);
    let occurrences = schedule.next_n(365, Some(from)).unwrap();
    assert_eq!(occurrences.len(), 365);
    assert_eq!(*occurrences.last().unwrap(), midnight_utc(2023, 1, 1));
}
