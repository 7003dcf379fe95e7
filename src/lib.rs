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

//! # schedcron
//!
//! A library to parse crontab-style schedule expressions and drive
//! recurring (or one-shot) jobs from them in-process.
//!
//! The pipeline mirrors the data flow of the system it reimplements: an
//! expression is compiled by [`parser`] into a [`fieldset::FieldSet`],
//! [`advance`] walks a [`time::BrokenDownTime`] forward to the next matching
//! instant, [`Schedule`] wraps that with start/stop/run-count bookkeeping,
//! and [`JobDriver`] repeatedly arms a caller-supplied timer against it.

mod advance;
mod bitset;
mod driver;
mod fieldset;
mod parser;
mod registry;
mod schedule;
#[cfg(test)]
mod scenarios;
mod time;

pub use driver::CatchPolicy;
pub use driver::DriverState;
pub use driver::JobDriver;
pub use driver::Timer;
pub use driver::TimerHandle;
pub use parser::normalize_crontab;
pub use registry::scheduled_jobs;
pub use registry::JobHandle;
pub use schedule::Schedule;
pub use schedule::ScheduleOptions;

/// The single public error type. Every fallible operation in this crate
/// returns this type; match on [`Error::to_string`] if a caller needs to
/// distinguish failure causes, the same way the parser's own tests do.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct Error(String);

impl Error {
    pub(crate) fn kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error(format!("{kind:?}: {}", message.into()))
    }
}

/// Internal taxonomy used only to tag [`Error`] messages consistently; never
/// exposed in the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    InvalidField,
    OutOfRange,
    InvalidRange,
    InvalidStep,
    IllegalCharacter,
    WrongFieldCount,
    UnknownAlias,
    InvalidIsoLiteral,
    InvalidReference,
    DuplicateName,
}

#[cfg(test)]
fn setup_logging() {
    use logforth::append;
    use logforth::filter::EnvFilter;
    use logforth::layout::TextLayout;
    use logforth::Dispatch;
    use logforth::Logger;

    static SETUP_LOGGING: std::sync::Once = std::sync::Once::new();
    SETUP_LOGGING.call_once(|| {
        Logger::new()
            .dispatch(
                Dispatch::new()
                    .filter(EnvFilter::from_default_env_or("DEBUG"))
                    .layout(TextLayout::default())
                    .append(append::Stderr),
            )
            .apply()
            .unwrap();
    });
}
