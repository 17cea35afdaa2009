use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

/// Number of leading characters that identify a message.
pub const MESSAGE_KEY_LEN: usize = 10;
pub const MAX_THROTTLE_SIZE: usize = 1024;

/// Remembers recently reported message prefixes so repeated alerts are
/// suppressed within a cooldown window. Bounded; the oldest key goes first.
#[derive(Debug, Default)]
pub struct Throttle {
    last_reported: HashMap<String, DateTime<Utc>>,
    order: VecDeque<String>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `message` was already reported within `period`.
    /// Otherwise records it and returns `false`.
    pub fn should_throttle(&mut self, message: &str, period: TimeDelta, now: DateTime<Utc>) -> bool {
        let key = message_key(message);

        if let Some(last) = self.last_reported.get(&key) {
            if now.signed_duration_since(*last) < period {
                debug!("Message has been throttled: {}", message);
                return true;
            }
        }

        if self.last_reported.insert(key.clone(), now).is_none() {
            self.order.push_back(key);
            if self.order.len() > MAX_THROTTLE_SIZE {
                if let Some(oldest) = self.order.pop_front() {
                    self.last_reported.remove(&oldest);
                }
            }
        }

        false
    }

    pub fn len(&self) -> usize {
        self.last_reported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_reported.is_empty()
    }
}

fn message_key(message: &str) -> String {
    message.chars().take(MESSAGE_KEY_LEN).collect()
}
