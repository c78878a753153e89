//! Test doubles: a virtual-clock timer and a scripted transport.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use castline_core::traits::TransportClient;
use castline_core::types::TransportError;
use chrono::{DateTime, Utc};

use crate::timer::{StopSignal, Timer, Wake};

/// Virtual clock. Sleeps return immediately, advance the clock, and are recorded.
pub struct ManualTimer {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Timer for ManualTimer {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration, stop: &StopSignal) -> Wake {
        if stop.is_stopped() {
            return Wake::Stopped;
        }
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
        if stop.is_stopped() {
            Wake::Stopped
        } else {
            Wake::Elapsed
        }
    }
}

/// Transport that replays scripted results per destination (default: success)
/// and records every attempt.
pub struct ScriptedTransport {
    authenticated: AtomicBool,
    scripts: Mutex<HashMap<String, VecDeque<Result<(), TransportError>>>>,
    attempts: Mutex<Vec<(String, String)>>,
    latency: Mutex<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            authenticated: AtomicBool::new(true),
            scripts: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Queue results for a destination; once drained, sends succeed.
    pub fn script(&self, destination_id: &str, results: Vec<Result<(), TransportError>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(destination_id.to_string())
            .or_default()
            .extend(results);
    }

    /// Make every send take this long (tokio time) before returning.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::SeqCst);
    }

    /// Destination ids in attempt order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl TransportClient for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn send(&self, destination_id: &str, text: &str) -> Result<(), TransportError> {
        self.attempts
            .lock()
            .unwrap()
            .push((destination_id.to_string(), text.to_string()));
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(destination_id)
            .and_then(VecDeque::pop_front);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        next.unwrap_or(Ok(()))
    }
}
