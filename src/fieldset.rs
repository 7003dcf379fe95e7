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

use jiff::civil::Weekday;

use crate::bitset::Bitset64;

/// Converts a [`Weekday`] to the 0(Sunday)..=6(Saturday) numbering this crate
/// uses for its day-of-week field, matching the `crontab(5)` convention
/// rather than jiff's ISO (Monday = 1) numbering.
pub(crate) fn weekday_to_spec(weekday: Weekday) -> u8 {
    match weekday {
        Weekday::Sunday => 0,
        Weekday::Monday => 1,
        Weekday::Tuesday => 2,
        Weekday::Wednesday => 3,
        Weekday::Thursday => 4,
        Weekday::Friday => 5,
        Weekday::Saturday => 6,
    }
}

/// The compiled acceptance sets for the six crontab fields.
///
/// Every field except day-of-month is a plain bitset; day-of-month also
/// carries a `last_day_of_month` sentinel for the `L` atom, since "the last
/// day of the month" is not a fixed slot.
#[derive(Debug, Clone)]
pub(crate) struct FieldSet {
    pub(crate) seconds: Bitset64,
    pub(crate) minutes: Bitset64,
    pub(crate) hours: Bitset64,
    pub(crate) days_of_month: Bitset64,
    pub(crate) last_day_of_month: bool,
    pub(crate) day_of_month_restricted: bool,
    pub(crate) months: Bitset64,
    pub(crate) days_of_week: Bitset64,
    pub(crate) day_of_week_restricted: bool,
}

impl FieldSet {
    pub(crate) fn matches_day_of_month(&self, day: u8, days_in_month: u8) -> bool {
        (self.last_day_of_month && day == days_in_month) || self.days_of_month.contains(day)
    }

    pub(crate) fn matches_day_of_week(&self, weekday: Weekday) -> bool {
        self.days_of_week.contains(weekday_to_spec(weekday))
    }

    pub(crate) fn day_of_week_is_wildcard(&self) -> bool {
        !self.day_of_week_restricted
    }

    /// Whether `day` (given the month's length) satisfies the combination of
    /// day-of-month and day-of-week constraints, honoring strict/legacy mode.
    pub(crate) fn day_matches(
        &self,
        day: u8,
        days_in_month: u8,
        weekday: Weekday,
        legacy_mode: bool,
    ) -> bool {
        let dom_match = self.matches_day_of_month(day, days_in_month);
        if self.day_of_week_is_wildcard() {
            return dom_match;
        }

        let dow_match = self.matches_day_of_week(weekday);
        if !self.day_of_month_restricted {
            // Day-of-month was left as `*`; only the day-of-week constrains.
            dow_match
        } else if legacy_mode {
            dom_match || dow_match
        } else {
            dom_match && dow_match
        }
    }
}
