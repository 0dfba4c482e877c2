//! Exchange timers
//!
//! Timers never touch exchange state. When one fires, the scheduler hands
//! its [`TimerKey`] back to the serialized worker, which then calls
//! `QuickModeEngine::handle_timer`.

use super::message::Cookies;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// What a timer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    /// Resend the last message of the exchange
    Resend,
    /// Give up on the exchange
    Phase2Timeout,
}

/// Identity of a pending timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    /// IKE SA the exchange runs under
    pub cookies: Cookies,
    /// Message ID of the exchange
    pub msg_id: u32,
    /// Timer purpose
    pub event: TimerEvent,
}

impl TimerKey {
    /// Resend timer of an exchange
    pub fn resend(cookies: Cookies, msg_id: u32) -> Self {
        TimerKey {
            cookies,
            msg_id,
            event: TimerEvent::Resend,
        }
    }

    /// Whole-exchange timer
    pub fn phase2_timeout(cookies: Cookies, msg_id: u32) -> Self {
        TimerKey {
            cookies,
            msg_id,
            event: TimerEvent::Phase2Timeout,
        }
    }
}

/// Timer service used by the engine
///
/// Scheduling an already pending key replaces it.
pub trait Scheduler: Send + Sync {
    /// Fire `key` after `delay`
    fn schedule(&self, key: TimerKey, delay: Duration);

    /// Cancel a pending timer; unknown keys are ignored
    fn cancel(&self, key: &TimerKey);
}

/// Scheduler that only records requests, for driving timers by hand
#[derive(Debug, Default)]
pub struct ManualScheduler {
    pending: Mutex<HashMap<TimerKey, Duration>>,
}

impl ManualScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay of a pending timer
    pub fn delay(&self, key: &TimerKey) -> Option<Duration> {
        self.lock().get(key).copied()
    }

    /// Whether a timer is pending
    pub fn is_pending(&self, key: &TimerKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Remove a pending timer so it can be fired by the caller
    pub fn fire(&self, key: &TimerKey) -> Option<TimerKey> {
        self.lock().remove(key).map(|_| *key)
    }

    /// Number of pending timers
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no timer is pending
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TimerKey, Duration>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, key: TimerKey, delay: Duration) {
        self.lock().insert(key, delay);
    }

    fn cancel(&self, key: &TimerKey) {
        self.lock().remove(key);
    }
}
