// src/core/forwarding/circuit.rs

//! Per-engine-instance circuit breaker (§4.8 "Circuit breaker"). Pure atomic
//! state so a breaker check never has to suspend.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::{Duration, Instant};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
/// A single probe attempt is in flight. Only the caller whose `try_acquire`
/// won the `OPEN -> HALF_OPEN` transition is in this state; every other
/// concurrent caller is rejected until the probe resolves.
const HALF_OPEN: u8 = 2;

/// Rejection returned by `try_acquire` while the breaker is open.
#[derive(Debug, Clone, Copy)]
pub struct BreakerOpen {
    pub retry_after_secs: u64,
}

pub struct CircuitBreaker {
    threshold: u32,
    reset_timeout: Duration,
    failures: AtomicU32,
    state: AtomicU8,
    open_since: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    /// `threshold == 0` disables the breaker entirely: every request attempts.
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            threshold,
            reset_timeout,
            failures: AtomicU32::new(0),
            state: AtomicU8::new(CLOSED),
            open_since: Mutex::new(None),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.threshold == 0
    }

    /// Checks whether a new attempt may proceed. When the reset timeout has
    /// elapsed on an open breaker, exactly one caller wins the `CAS` into
    /// `half_open` and is allowed through as the probe; every other caller
    /// racing it (or arriving while the probe is still outstanding) is
    /// rejected. Does not itself record the outcome of the attempt — call
    /// `record_success`/`record_failure` after.
    pub fn try_acquire(&self) -> Result<(), BreakerOpen> {
        if self.is_disabled() {
            return Ok(());
        }

        match self.state.load(Ordering::SeqCst) {
            CLOSED => Ok(()),
            HALF_OPEN => Err(BreakerOpen { retry_after_secs: 0 }),
            OPEN => {
                let since = *self.open_since.lock();
                let Some(since) = since else {
                    // Defensive: state says open but no timestamp recorded — treat as closed.
                    self.state.store(CLOSED, Ordering::SeqCst);
                    return Ok(());
                };
                let elapsed = since.elapsed();
                if elapsed < self.reset_timeout {
                    let remaining = self.reset_timeout - elapsed;
                    return Err(BreakerOpen {
                        retry_after_secs: remaining.as_secs(),
                    });
                }
                match self
                    .state
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::SeqCst, Ordering::SeqCst)
                {
                    Ok(_) => Ok(()),
                    Err(_) => Err(BreakerOpen { retry_after_secs: 0 }),
                }
            }
            _ => unreachable!("circuit breaker state is one of CLOSED/OPEN/HALF_OPEN"),
        }
    }

    pub fn record_success(&self) {
        if self.is_disabled() {
            return;
        }
        self.failures.store(0, Ordering::SeqCst);
        self.state.store(CLOSED, Ordering::SeqCst);
        *self.open_since.lock() = None;
    }

    pub fn record_failure(&self) {
        if self.is_disabled() {
            return;
        }
        match self.state.load(Ordering::SeqCst) {
            HALF_OPEN => {
                self.open_since.lock().replace(Instant::now());
                self.state.store(OPEN, Ordering::SeqCst);
            }
            _ => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.threshold {
                    self.open_since.lock().replace(Instant::now());
                    self.state.store(OPEN, Ordering::SeqCst);
                }
            }
        }
    }
}
