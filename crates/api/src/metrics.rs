use query::TurnState;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Process-lifetime request counters. Quality metrics live in the
/// evaluation store; these only cover the HTTP surface.
pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Chat turns
    chat_turns: AtomicUsize,
    clarifications: AtomicUsize,
    fallback_answers: AtomicUsize,

    // Timing (in microseconds)
    total_chat_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            chat_turns: AtomicUsize::new(0),
            clarifications: AtomicUsize::new(0),
            fallback_answers: AtomicUsize::new(0),
            total_chat_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `fallback` is an answered turn that no source backed.
    pub fn record_chat(&self, duration: Duration, state: TurnState, fallback: bool) {
        self.chat_turns.fetch_add(1, Ordering::Relaxed);
        self.total_chat_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if state == TurnState::AwaitingClarification {
            self.clarifications.fetch_add(1, Ordering::Relaxed);
        }
        if fallback {
            self.fallback_answers.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let chat_turns = self.chat_turns.load(Ordering::Relaxed);
        let total_us = self.total_chat_time_us.load(Ordering::Relaxed) as f64;
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            chat_turns,
            clarifications: self.clarifications.load(Ordering::Relaxed),
            fallback_answers: self.fallback_answers.load(Ordering::Relaxed),
            avg_chat_time_ms: if chat_turns > 0 {
                total_us / chat_turns as f64 / 1000.0 // Convert to ms
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub chat_turns: usize,
    pub clarifications: usize,
    pub fallback_answers: usize,
    pub avg_chat_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
