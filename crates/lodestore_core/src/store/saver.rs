//! Debounced save coordination.
//!
//! # Responsibility
//! - Own save timing for one store: coalesce bursts of mutations into one
//!   deferred save, or run a save inline when durability is required now.
//! - Fire deferred saves on a dedicated background thread.
//!
//! # Invariants
//! - At most one deferred save is pending at any instant.
//! - `schedule` cancels and re-arms in one step under the timer lock, so a
//!   superseded deadline can never fire.
//! - `save_now` cancels any pending deferred save before running inline.
//! - A save already firing is never interrupted.
//! - A fire stays unclaimed until its callback reaches the store; until
//!   then it will still pick up any change made before it runs.

use log::debug;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Which path triggered a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Inline on the caller's thread, inside the caller's critical section.
    Immediate,
    /// Fired by the timer after the debounce window.
    Deferred,
}

impl SaveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Deferred => "deferred",
        }
    }
}

/// Observable timer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    Scheduled(Instant),
    Firing,
}

struct Timer {
    state: SaveState,
    // set by the fire callback once it holds the store lock
    claimed: bool,
    shutdown: bool,
}

struct Shared {
    timer: Mutex<Timer>,
    wake: Condvar,
}

impl Shared {
    // Timer holds plain data; a panic elsewhere cannot leave it inconsistent.
    fn lock(&self) -> MutexGuard<'_, Timer> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancellable, re-armable save timer bound to one fire callback.
pub struct SaveCoordinator {
    window: Duration,
    shared: Arc<Shared>,
}

impl SaveCoordinator {
    /// Starts the timer thread. `on_fire` runs on that thread every time a
    /// deferred save comes due.
    pub fn spawn<F>(label: &str, window: Duration, on_fire: F) -> io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            timer: Mutex::new(Timer {
                state: SaveState::Idle,
                claimed: false,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("lodestore-saver-{label}"))
            .spawn(move || run_timer(&worker, on_fire))?;

        Ok(Self { window, shared })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn state(&self) -> SaveState {
        self.shared.lock().state
    }

    /// Arms a deferred save one window from now, replacing any pending one.
    ///
    /// While a save is firing the new deadline is queued behind it.
    pub fn schedule(&self) {
        let deadline = Instant::now() + self.window;
        let mut timer = self.shared.lock();
        timer.state = SaveState::Scheduled(deadline);
        drop(timer);
        self.shared.wake.notify_all();
    }

    /// Drops the pending deferred save without firing it.
    ///
    /// Returns `false` when nothing was pending, including while firing.
    pub fn cancel(&self) -> bool {
        let mut timer = self.shared.lock();
        if let SaveState::Scheduled(_) = timer.state {
            timer.state = SaveState::Idle;
            drop(timer);
            self.shared.wake.notify_all();
            return true;
        }
        false
    }

    /// Marks the current fire as having started its save.
    pub fn claim_fire(&self) {
        let mut timer = self.shared.lock();
        if timer.state == SaveState::Firing {
            timer.claimed = true;
        }
    }

    /// True while a fire is underway but has not started its save yet, so
    /// it will still write whatever is staged now.
    pub fn fire_pending(&self) -> bool {
        let timer = self.shared.lock();
        timer.state == SaveState::Firing && !timer.claimed
    }

    /// Cancels any pending deferred save, then runs `save` on the caller's
    /// thread and returns its result.
    pub fn save_now<T>(&self, save: impl FnOnce() -> T) -> T {
        if self.cancel() {
            debug!("event=save_cancel module=saver status=ok reason=immediate_save");
        }
        save()
    }
}

impl Drop for SaveCoordinator {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
    }
}

fn run_timer<F: Fn()>(shared: &Shared, on_fire: F) {
    let mut timer = shared.lock();
    loop {
        if timer.shutdown {
            return;
        }

        match timer.state {
            SaveState::Scheduled(deadline) => {
                let now = Instant::now();
                if now < deadline {
                    timer = shared
                        .wake
                        .wait_timeout(timer, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                    continue;
                }

                timer.state = SaveState::Firing;
                timer.claimed = false;
                drop(timer);
                on_fire();
                timer = shared.lock();
                timer.claimed = false;
                if timer.state == SaveState::Firing {
                    timer.state = SaveState::Idle;
                }
            }
            SaveState::Idle | SaveState::Firing => {
                timer = shared
                    .wake
                    .wait(timer)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}
