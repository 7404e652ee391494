//! Duty-cycle availability model for the downstream notification service.
//!
//! The downstream is simulated as a square wave: up for `up_secs`, then down
//! for `down_secs`, then up again. Transitions are evaluated lazily on each
//! query rather than by a timer, so the state only moves when someone asks.
//!
//! Several whole periods elapsing between two queries collapse into a single
//! toggle. Missed transitions are not replayed.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

/// Anything that can answer "is the downstream accepting deliveries now?".
pub trait HealthSignal: Send + Sync {
    fn is_up(&self, now: DateTime<Utc>) -> bool;
}

/// Snapshot of the simulated downstream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityState {
    pub is_up: bool,
    /// When the current up/down period began.
    pub since: DateTime<Utc>,
}

/// Deterministic up/down simulation driven by elapsed wall-clock time.
#[derive(Debug)]
pub struct AvailabilityModel {
    up_period: TimeDelta,
    down_period: TimeDelta,
    state: Mutex<AvailabilityState>,
}

impl AvailabilityModel {
    /// Start in the "up" state at `started_at`.
    pub fn new(up_secs: u64, down_secs: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            up_period: period_of(up_secs),
            down_period: period_of(down_secs),
            state: Mutex::new(AvailabilityState {
                is_up: true,
                since: started_at,
            }),
        }
    }

    /// Return whether the downstream is up at `now`, flipping state first if
    /// the current period has been exceeded.
    pub fn query(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        // Full precision: 5.9s into a 5s period is past it.
        let elapsed = now.signed_duration_since(state.since);
        let period = if state.is_up {
            self.up_period
        } else {
            self.down_period
        };

        if elapsed > period {
            state.is_up = !state.is_up;
            state.since = now;
            tracing::info!(
                is_up = state.is_up,
                elapsed_ms = elapsed.num_milliseconds(),
                "Downstream availability changed"
            );
        }

        state.is_up
    }

    pub fn state(&self) -> AvailabilityState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn period_of(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

impl HealthSignal for AvailabilityModel {
    fn is_up(&self, now: DateTime<Utc>) -> bool {
        self.query(now)
    }
}
