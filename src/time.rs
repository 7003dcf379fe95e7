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

use jiff::civil::{Date, Time, Weekday};
use jiff::tz::TimeZone;
use jiff::Zoned;

use crate::ErrorKind;
use crate::Error;

/// A mutable calendar tuple, finest field to coarsest: millisecond up to
/// year.
///
/// Month is kept 0-based (`0` = January) so the field-cascade advancer can
/// treat it as a plain offset into the months bitset; day stays 1-based,
/// since there is no "day zero" in any calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BrokenDownTime {
    pub(crate) millisecond: i16,
    pub(crate) second: i8,
    pub(crate) minute: i8,
    pub(crate) hour: i8,
    pub(crate) day: i8,
    pub(crate) month: i8,
    pub(crate) year: i16,
}

impl BrokenDownTime {
    pub(crate) fn from_zoned(zoned: &Zoned) -> Self {
        BrokenDownTime {
            millisecond: (zoned.subsec_nanosecond() / 1_000_000) as i16,
            second: zoned.second(),
            minute: zoned.minute(),
            hour: zoned.hour(),
            day: zoned.day(),
            month: zoned.month() - 1,
            year: zoned.year(),
        }
    }

    pub(crate) fn to_zoned(&self, tz: &TimeZone) -> Result<Zoned, Error> {
        let date = Date::new(self.year, self.month + 1, self.day).map_err(|err| {
            Error::kind(
                ErrorKind::InvalidReference,
                format!("invalid calendar date in ({}, {}, {}): {err}", self.year, self.month + 1, self.day),
            )
        })?;
        let time = Time::new(self.hour, self.minute, self.second, 0).map_err(|err| {
            Error::kind(
                ErrorKind::InvalidReference,
                format!("invalid time of day {:02}:{:02}:{:02}: {err}", self.hour, self.minute, self.second),
            )
        })?;
        date.to_datetime(time)
            .to_zoned(tz.clone())
            .map_err(|err| Error::kind(ErrorKind::InvalidReference, format!("failed to resolve zoned time: {err}")))
    }

    /// Number of days in this tuple's (year, month), per the proleptic
    /// Gregorian calendar.
    pub(crate) fn days_in_month(&self) -> i8 {
        Date::new(self.year, self.month + 1, 1)
            .expect("month is always normalized to 1..=12 before this is called")
            .days_in_month()
    }

    pub(crate) fn weekday(&self) -> Weekday {
        Date::new(self.year, self.month + 1, self.day)
            .expect("day is always normalized to a valid calendar date before this is called")
            .weekday()
    }

    /// Carries second overflow (`second >= 60`) up through minute, hour, day,
    /// month and year, in that order.
    pub(crate) fn carry_from_second(&mut self) {
        while self.second >= 60 {
            self.second -= 60;
            self.minute += 1;
        }
        self.carry_from_minute();
    }

    pub(crate) fn carry_from_minute(&mut self) {
        while self.minute >= 60 {
            self.minute -= 60;
            self.hour += 1;
        }
        self.carry_from_hour();
    }

    pub(crate) fn carry_from_hour(&mut self) {
        while self.hour >= 24 {
            self.hour -= 24;
            self.day += 1;
        }
        self.carry_from_day();
    }

    pub(crate) fn carry_from_day(&mut self) {
        loop {
            self.carry_from_month();
            let days_in_month = self.days_in_month();
            if self.day <= days_in_month {
                break;
            }
            self.day -= days_in_month;
            self.month += 1;
        }
        self.carry_from_month();
    }

    pub(crate) fn carry_from_month(&mut self) {
        while self.month >= 12 {
            self.month -= 12;
            self.year += 1;
        }
    }
}
