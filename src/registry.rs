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

//! A process-global, name-keyed view of every currently-live driver.
//!
//! The registry never owns a driver: it holds [`Weak`] references, so a
//! driver dropped by its owner disappears from [`scheduled_jobs`] on its own
//! without anyone having to unregister it explicitly. Explicit unregistration
//! on [`crate::JobDriver::stop`] just makes the name immediately reusable
//! rather than waiting for the `Arc` to actually drop.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::Weak;

use crate::Error;
use crate::ErrorKind;

/// The liveness marker shared between a [`crate::JobDriver`] and its
/// registry entry. Kept separate from the (generic) driver itself so the
/// registry can stay a single, non-generic global map.
pub(crate) struct DriverRecord {
    pub(crate) name: String,
    stopped: AtomicBool,
}

impl DriverRecord {
    pub(crate) fn new(name: String) -> Arc<Self> {
        Arc::new(DriverRecord {
            name,
            stopped: AtomicBool::new(false),
        })
    }

    pub(crate) fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

fn registry() -> &'static Mutex<HashMap<String, Weak<DriverRecord>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Weak<DriverRecord>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers `record` under its name, rejecting the call if a still-live
/// record with the same name already exists.
pub(crate) fn register(record: &Arc<DriverRecord>) -> Result<(), Error> {
    let mut map = registry().lock().unwrap();
    if let Some(existing) = map.get(&record.name) {
        if existing.upgrade().is_some() {
            return Err(Error::kind(
                ErrorKind::DuplicateName,
                format!("a job named {:?} is already registered", record.name),
            ));
        }
    }
    map.insert(record.name.clone(), Arc::downgrade(record));
    Ok(())
}

pub(crate) fn unregister(name: &str) {
    registry().lock().unwrap().remove(name);
}

/// A lightweight, name-and-liveness view of one registered job, returned by
/// [`scheduled_jobs`]. Does not expose the underlying driver: callers that
/// need control over a specific job should hold on to the `Arc<JobDriver<_>>`
/// [`crate::Schedule::schedule`] returned.
#[derive(Debug, Clone)]
pub struct JobHandle {
    name: String,
    live: bool,
}

impl JobHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this job's driver is still live and not yet stopped.
    pub fn is_live(&self) -> bool {
        self.live
    }
}

/// Enumerates every named job currently registered, i.e. every driver
/// constructed with a name that has not been stopped or dropped.
pub fn scheduled_jobs() -> Vec<JobHandle> {
    let map = registry().lock().unwrap();
    map.iter()
        .filter_map(|(name, weak)| {
            weak.upgrade().map(|record| JobHandle {
                name: name.clone(),
                live: !record.is_stopped(),
            })
        })
        .collect()
}
