//! Blocking rendezvous primitives shared by ports and component threads.
//!
//! Both primitives are built on a `Mutex` + `Condvar` pair, the same way the
//! queue elements guard their buffer lists.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A counting semaphore.
///
/// Used for every rendezvous where the signal may arrive before or after
/// the wait begins (population, depopulation, flush completion). A binary
/// flag would lose a release that races ahead of its waiter; a count does
/// not.
#[derive(Debug, Default)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore with `permits` initial permits.
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Add one permit, waking a waiter.
    pub fn release(&self) {
        let mut permits = self.permits.lock().unwrap();
        *permits += 1;
        self.available.notify_one();
    }

    /// Block until a permit is available and take it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.available.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    /// Take a permit, waiting at most `timeout` (forever when `None`).
    ///
    /// Returns `false` if the deadline passed without a permit.
    pub fn acquire_timeout(&self, timeout: Option<Duration>) -> bool {
        let Some(timeout) = timeout else {
            self.acquire();
            return true;
        };
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .available
                .wait_timeout(permits, deadline - now)
                .unwrap();
            permits = guard;
        }
        *permits -= 1;
        true
    }

    /// Take a permit if one is immediately available.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock().unwrap();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Current number of permits.
    pub fn permits(&self) -> usize {
        *self.permits.lock().unwrap()
    }
}

/// Wake-up channel for a component's worker thread.
///
/// Every event the worker might care about (a buffer arriving, a flush
/// starting, a state flip) rings the doorbell. The worker takes a ticket
/// *before* inspecting shared state and sleeps only if nothing rang since,
/// so a ring between inspection and sleep is never lost.
#[derive(Debug, Default)]
pub struct Doorbell {
    generation: Mutex<u64>,
    rung: Condvar,
}

impl Doorbell {
    /// Create a new doorbell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation, to be passed to [`wait`](Self::wait).
    pub fn ticket(&self) -> u64 {
        *self.generation.lock().unwrap()
    }

    /// Wake every sleeper.
    pub fn ring(&self) {
        let mut generation = self.generation.lock().unwrap();
        *generation = generation.wrapping_add(1);
        self.rung.notify_all();
    }

    /// Sleep until the doorbell rings after `ticket` was taken.
    pub fn wait(&self, ticket: u64) {
        let mut generation = self.generation.lock().unwrap();
        while *generation == ticket {
            generation = self.rung.wait(generation).unwrap();
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`.
    ///
    /// Returns `true` if the doorbell rang.
    pub fn wait_timeout(&self, ticket: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock().unwrap();
        while *generation == ticket {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.rung.wait_timeout(generation, deadline - now).unwrap();
            generation = guard;
        }
        true
    }
}
