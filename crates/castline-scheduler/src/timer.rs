//! Cancellable timers.
//!
//! Every wait in the engine (pacing between sends, retry backoff, the gap
//! between cycles) goes through a [`Timer`] together with a [`StopSignal`], so a
//! stop request interrupts the wait without touching a send that is in flight.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::watch;

/// Why a [`Timer::sleep`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    Stopped,
}

/// Clock + cancellable sleep.
#[async_trait]
pub trait Timer: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for `duration` unless `stop` fires first.
    async fn sleep(&self, duration: Duration, stop: &StopSignal) -> Wake;
}

/// Wall clock + tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration, stop: &StopSignal) -> Wake {
        if stop.is_stopped() {
            return Wake::Stopped;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Wake::Elapsed,
            _ = stop.stopped() => Wake::Stopped,
        }
    }
}

/// Owner side of a stop signal.
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Fire the signal. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a stop signal.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires. Pending forever if the handle is dropped unfired.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Longest wait a deadline can express. Keeps stored timestamps within
/// four-digit years.
pub const MAX_DEADLINE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + wait`, saturating at [`MAX_DEADLINE`] past `now`.
pub fn deadline(now: DateTime<Utc>, wait: Duration) -> DateTime<Utc> {
    chrono::TimeDelta::from_std(wait.min(MAX_DEADLINE))
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Uniformly random duration in `[min, max]`, millisecond resolution.
pub fn jitter(min: Duration, max: Duration) -> Duration {
    let lo = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
    let hi = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}
