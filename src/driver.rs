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
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use jiff::Timestamp;

use crate::registry;
use crate::registry::DriverRecord;
use crate::schedule::Schedule;
use crate::Error;

/// Host timers commonly saturate at 2^31 - 1 milliseconds.
const MAX_TIMER_DELAY_MS: u64 = (1u64 << 31) - 1;

/// The external timer collaborator a [`JobDriver`] arms on every tick.
/// Production embedders back this with their event loop; tests use a fake
/// clock so driver semantics can be asserted without real sleeps.
pub trait Timer: Send + Sync {
    fn schedule_after(&self, delay_ms: u64, fire: Box<dyn FnOnce() + Send>) -> Box<dyn TimerHandle>;
}

/// A handle to one armed timer fire, cancellable before it fires.
pub trait TimerHandle: Send {
    fn cancel(&self);
}

type CallbackError = Box<dyn std::error::Error + Send + Sync>;
type Callback<C> = dyn Fn(&JobDriver<C>, &C) -> Result<(), CallbackError> + Send + Sync;

/// Error policy for a failing callback invocation (§4.5's `catch` option).
pub enum CatchPolicy {
    /// Log the error and keep scheduling (default).
    Propagate,
    /// Swallow the error silently.
    Swallow,
    /// Hand the error to a user-supplied handler.
    Handler(Box<dyn Fn(CallbackError) + Send + Sync>),
}

impl fmt::Debug for CatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatchPolicy::Propagate => write!(f, "Propagate"),
            CatchPolicy::Swallow => write!(f, "Swallow"),
            CatchPolicy::Handler(_) => write!(f, "Handler(..)"),
        }
    }
}

impl Default for CatchPolicy {
    fn default() -> Self {
        CatchPolicy::Propagate
    }
}

/// The driver's externally-visible state (§3's state machine). `Busy` is
/// never stored directly — it is derived from whether an invocation is
/// currently in flight, layered on top of `Scheduled`/`Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Scheduled,
    Paused,
    Busy,
    Stopped,
}

/// Stateful controller that repeatedly arms a [`Timer`] from a [`Schedule`],
/// invokes the user callback, and tracks run state. Construct one via
/// [`Schedule::schedule`].
pub struct JobDriver<C> {
    schedule: Schedule<C>,
    timer: Arc<dyn Timer>,
    callback: Arc<Callback<C>>,
    mode: Mutex<DriverState>,
    busy: AtomicBool,
    current_run: Mutex<Option<Timestamp>>,
    cursor: Mutex<Timestamp>,
    next_instant: Mutex<Option<Timestamp>>,
    timer_handle: Mutex<Option<Box<dyn TimerHandle>>>,
    record: Arc<DriverRecord>,
    named: bool,
}

impl<C> fmt::Debug for JobDriver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDriver")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Clone + Send + Sync + 'static> JobDriver<C> {
    pub(crate) fn spawn<F>(
        schedule: Schedule<C>,
        timer: Arc<dyn Timer>,
        callback: F,
    ) -> Result<Arc<Self>, Error>
    where
        F: Fn(&JobDriver<C>, &C) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let named = schedule.name().is_some();
        let record = DriverRecord::new(schedule.name().unwrap_or_default().to_string());
        if named {
            registry::register(&record)?;
        }

        let initial_mode = if schedule.paused_initial {
            DriverState::Paused
        } else {
            DriverState::Scheduled
        };
        let start_cursor = schedule.start_at.unwrap_or_else(Timestamp::now);

        let driver = Arc::new(JobDriver {
            schedule,
            timer,
            callback: Arc::new(callback),
            mode: Mutex::new(initial_mode),
            busy: AtomicBool::new(false),
            current_run: Mutex::new(None),
            cursor: Mutex::new(start_cursor),
            next_instant: Mutex::new(None),
            timer_handle: Mutex::new(None),
            record,
            named,
        });

        driver.arm();
        Ok(driver)
    }

    fn arm(self: &Arc<Self>) {
        if *self.mode.lock().unwrap() == DriverState::Stopped {
            return;
        }

        let cursor = *self.cursor.lock().unwrap();
        let next = match self.schedule.next(Some(cursor)) {
            Ok(Some(ts)) => ts,
            Ok(None) => {
                log::debug!("job {:?} schedule exhausted; stopping", self.name());
                self.stop();
                return;
            }
            Err(err) => {
                log::warn!("job {:?} failed to compute next fire time: {err}", self.name());
                self.stop();
                return;
            }
        };
        *self.next_instant.lock().unwrap() = Some(next);

        let now = Timestamp::now();
        let remaining_ms = (next.as_millisecond() - now.as_millisecond()).max(0) as u64;
        let (delay_ms, is_checkpoint) = if remaining_ms > MAX_TIMER_DELAY_MS {
            (MAX_TIMER_DELAY_MS, true)
        } else {
            (remaining_ms, false)
        };

        log::debug!(
            "job {:?} arming for {next} ({delay_ms}ms, checkpoint={is_checkpoint})",
            self.name()
        );

        let this = Arc::clone(self);
        let handle = self.timer.schedule_after(
            delay_ms,
            Box::new(move || {
                if is_checkpoint {
                    this.arm();
                } else {
                    this.on_real_tick();
                }
            }),
        );
        *self.timer_handle.lock().unwrap() = Some(handle);
    }

    fn on_real_tick(self: &Arc<Self>) {
        let fired_at = self
            .next_instant
            .lock()
            .unwrap()
            .expect("timer armed before firing");
        *self.cursor.lock().unwrap() = fired_at;

        // Re-arm immediately: the cadence does not wait on callback completion.
        self.arm();

        let mode = *self.mode.lock().unwrap();
        if mode == DriverState::Stopped || mode == DriverState::Paused {
            return;
        }

        if !self.schedule.take_run_slot() {
            log::debug!("job {:?} exhausted its run budget; stopping", self.name());
            self.stop();
            return;
        }

        if self.protect_and_already_busy() {
            log::debug!(
                "job {:?} tick at {fired_at} skipped: previous invocation still running",
                self.name()
            );
            return;
        }

        *self.current_run.lock().unwrap() = Some(fired_at);
        self.invoke(fired_at);
    }

    fn protect_and_already_busy(&self) -> bool {
        if self.schedule.protect {
            self.busy.swap(true, Ordering::SeqCst)
        } else {
            self.busy.store(true, Ordering::SeqCst);
            false
        }
    }

    fn invoke(self: &Arc<Self>, fired_at: Timestamp) {
        let this = Arc::clone(self);
        std::thread::spawn(move || {
            log::debug!("job {:?} firing for {fired_at}", this.name());
            let result = (this.callback)(&this, &this.schedule.context);
            *this.current_run.lock().unwrap() = None;
            this.schedule.record_fire(fired_at);
            this.busy.store(false, Ordering::SeqCst);
            if let Err(err) = result {
                this.handle_callback_error(err);
            }
        });
    }

    fn handle_callback_error(&self, err: CallbackError) {
        match &self.schedule.catch {
            CatchPolicy::Propagate => log::error!("job {:?} callback failed: {err}", self.name()),
            CatchPolicy::Swallow => {
                log::debug!("job {:?} callback failed (swallowed): {err}", self.name())
            }
            CatchPolicy::Handler(handler) => handler(err),
        }
    }

    /// Cancels the armed timer and removes this driver from the registry.
    /// Terminal: once stopped a driver never re-arms.
    pub fn stop(self: &Arc<Self>) {
        *self.mode.lock().unwrap() = DriverState::Stopped;
        if let Some(handle) = self.timer_handle.lock().unwrap().take() {
            handle.cancel();
        }
        self.record.mark_stopped();
        if self.named {
            registry::unregister(&self.record.name);
        }
        log::info!("job {:?} stopped", self.name());
    }

    /// Returns `false` if the driver is already stopped.
    pub fn pause(&self) -> bool {
        let mut mode = self.mode.lock().unwrap();
        if *mode == DriverState::Stopped {
            return false;
        }
        *mode = DriverState::Paused;
        true
    }

    /// Returns `false` if the driver is already stopped.
    pub fn resume(&self) -> bool {
        let mut mode = self.mode.lock().unwrap();
        if *mode == DriverState::Stopped {
            return false;
        }
        *mode = DriverState::Scheduled;
        true
    }

    /// Invokes the callback once immediately, independent of pause/stop
    /// state, without altering the armed timer.
    pub fn trigger(self: &Arc<Self>) {
        let fired_at = Timestamp::now();
        if self.protect_and_already_busy() {
            log::debug!("job {:?} trigger skipped: invocation already running", self.name());
            return;
        }
        *self.current_run.lock().unwrap() = Some(fired_at);
        self.invoke(fired_at);
    }

    pub fn state(&self) -> DriverState {
        let mode = *self.mode.lock().unwrap();
        if mode == DriverState::Stopped {
            return DriverState::Stopped;
        }
        if self.busy.load(Ordering::SeqCst) {
            return DriverState::Busy;
        }
        mode
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), DriverState::Scheduled | DriverState::Busy)
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == DriverState::Stopped
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn current_run(&self) -> Option<Timestamp> {
        *self.current_run.lock().unwrap()
    }

    pub fn previous_run(&self) -> Option<Timestamp> {
        self.schedule.previous()
    }

    pub fn name(&self) -> Option<&str> {
        self.schedule.name()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Condvar;

    use super::*;
    use crate::setup_logging;
    use crate::ScheduleOptions;

    /// A deterministic timer test double: callers drive time forward
    /// explicitly via `advance`, rather than relying on real sleeps.
    #[derive(Default)]
    struct ManualTimer {
        pending: Mutex<Vec<PendingFire>>,
    }

    struct PendingFire {
        deadline_ms: u64,
        cancelled: Arc<AtomicBool>,
        fire: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    struct ManualTimerHandle {
        cancelled: Arc<AtomicBool>,
    }

    impl TimerHandle for ManualTimerHandle {
        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    impl Timer for ManualTimer {
        fn schedule_after(
            &self,
            delay_ms: u64,
            fire: Box<dyn FnOnce() + Send>,
        ) -> Box<dyn TimerHandle> {
            let cancelled = Arc::new(AtomicBool::new(false));
            self.pending.lock().unwrap().push(PendingFire {
                deadline_ms: delay_ms,
                cancelled: cancelled.clone(),
                fire: Mutex::new(Some(fire)),
            });
            Box::new(ManualTimerHandle { cancelled })
        }
    }

    impl ManualTimer {
        /// Fires every pending timer whose delay is `<= budget_ms`, in the
        /// order they were armed. New timers armed by a fired callback (the
        /// driver's re-arm) are not fired by this same call.
        fn advance(&self, budget_ms: u64) {
            let due: Vec<_> = {
                let mut pending = self.pending.lock().unwrap();
                let (due, rest): (Vec<_>, Vec<_>) = pending
                    .drain(..)
                    .partition(|p| p.deadline_ms <= budget_ms);
                *pending = rest;
                due
            };
            for entry in due {
                if !entry.cancelled.load(Ordering::SeqCst) {
                    if let Some(fire) = entry.fire.lock().unwrap().take() {
                        fire();
                    }
                }
            }
        }
    }

    #[test]
    fn pause_resume_stop_transitions() {
        setup_logging();

        let schedule =
            Schedule::<()>::new("* * * * * *", ScheduleOptions::default()).unwrap();
        let timer = Arc::new(ManualTimer::default());
        let driver = schedule
            .schedule(timer, |_driver, _ctx| Ok(()))
            .unwrap();

        assert!(driver.is_running());
        assert!(!driver.is_stopped());

        assert!(driver.pause());
        assert_eq!(driver.state(), DriverState::Paused);
        assert!(!driver.is_running());

        assert!(driver.resume());
        assert_eq!(driver.state(), DriverState::Scheduled);

        driver.stop();
        assert!(driver.is_stopped());
        assert!(!driver.pause());
        assert!(!driver.resume());
    }

    #[test]
    fn paused_driver_does_not_invoke_callback() {
        setup_logging();

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let schedule = Schedule::<()>::new(
            "* * * * * *",
            ScheduleOptions {
                paused: true,
                ..Default::default()
            },
        )
        .unwrap();
        let timer = Arc::new(ManualTimer::default());
        let driver = schedule
            .schedule(timer.clone(), move |_driver, _ctx| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert_eq!(driver.state(), DriverState::Paused);
        timer.advance(2_000);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn trigger_invokes_regardless_of_pause_state() {
        setup_logging();

        let (lock, cvar) = (Mutex::new(false), Condvar::new());
        let pair = Arc::new((lock, cvar));
        let pair_clone = pair.clone();

        let schedule = Schedule::<()>::new(
            "0 0 0 1 1 *",
            ScheduleOptions {
                paused: true,
                ..Default::default()
            },
        )
        .unwrap();
        let timer = Arc::new(ManualTimer::default());
        let driver = schedule
            .schedule(timer, move |_driver, _ctx| {
                let (lock, cvar) = &*pair_clone;
                *lock.lock().unwrap() = true;
                cvar.notify_all();
                Ok(())
            })
            .unwrap();

        driver.trigger();

        let (lock, cvar) = &*pair;
        let mut fired = lock.lock().unwrap();
        while !*fired {
            let (guard, timeout) = cvar
                .wait_timeout(fired, std::time::Duration::from_secs(1))
                .unwrap();
            fired = guard;
            if timeout.timed_out() {
                break;
            }
        }
        assert!(*fired, "trigger should invoke the callback even while paused");
    }

    #[test]
    fn protect_skips_a_trigger_while_the_previous_invocation_is_still_running() {
        setup_logging();

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let schedule = Schedule::<()>::new(
            "0 0 0 1 1 *",
            ScheduleOptions {
                paused: true,
                protect: true,
                ..Default::default()
            },
        )
        .unwrap();
        let timer = Arc::new(ManualTimer::default());
        let driver = schedule
            .schedule(timer, move |_driver, _ctx| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(200));
                Ok(())
            })
            .unwrap();

        driver.trigger();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(driver.is_busy(), "first trigger should still be running");

        // Overlapping trigger while busy: protect must skip it rather than
        // run the callback concurrently.
        driver.trigger();
        std::thread::sleep(std::time::Duration::from_millis(300));
        assert!(!driver.is_busy());
        assert_eq!(
            count.load(Ordering::SeqCst),
            1,
            "overlapping trigger should have been skipped while protect held busy"
        );

        // Once idle again, a trigger runs normally.
        driver.trigger();
        std::thread::sleep(std::time::Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn long_delay_is_clamped_and_transparent() {
        setup_logging();

        // Decades out, so the first arm necessarily exceeds the clamp ceiling.
        let schedule =
            Schedule::<()>::new("2100-01-01T00:00:00Z", ScheduleOptions::default()).unwrap();
        let timer = Arc::new(ManualTimer::default());
        let driver = schedule
            .schedule(timer.clone(), |_driver, _ctx| Ok(()))
            .unwrap();

        // One checkpoint should be armed for exactly the clamp ceiling.
        let pending_deadline = {
            let pending = timer.pending.lock().unwrap();
            pending.first().map(|p| p.deadline_ms)
        };
        assert_eq!(pending_deadline, Some(MAX_TIMER_DELAY_MS));
        assert!(driver.is_running());
    }
}
