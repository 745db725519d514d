//! Interruptible sleep with a movable deadline.
//!
//! The owning loop calls [`SleepScheduler::sleep_until`] with the latest
//! deadline it knows about. Anyone who learns of an earlier one calls
//! [`SleepScheduler::wake_at`]; the deadline moves forward and the sleeper
//! re-arms its timer. A wake that lands while the loop is between sleeps is
//! kept and shortens the next sleep.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

use crate::utils::time::millis_until;

#[derive(Default)]
pub struct SleepScheduler {
    deadline: Mutex<Option<Instant>>,
    notify: Notify,
}

impl SleepScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings the deadline forward to `at` if that is earlier than the current
    /// one (or if nothing is pending). Returns whether the deadline moved.
    pub fn wake_at(&self, at: Instant) -> bool {
        let moved = match self.deadline.lock() {
            Ok(mut deadline) => match *deadline {
                Some(current) if current <= at => false,
                _ => {
                    *deadline = Some(at);
                    true
                }
            },
            Err(_) => true,
        };
        if moved {
            self.notify.notify_one();
        }
        moved
    }

    pub fn wake_at_datetime(&self, at: &DateTime<Utc>) -> bool {
        self.wake_at(Instant::now() + Duration::from_millis(millis_until(at)))
    }

    pub fn wake_now(&self) {
        self.wake_at(Instant::now());
    }

    /// Sleeps until `target` or any earlier deadline registered through
    /// [`wake_at`](Self::wake_at), whichever comes first.
    pub async fn sleep_until(&self, target: Instant) {
        if let Ok(mut deadline) = self.deadline.lock() {
            *deadline = Some(deadline.map_or(target, |current| current.min(target)));
        }

        loop {
            let current = match self.deadline.lock() {
                Ok(deadline) => deadline.unwrap_or(target),
                Err(_) => target,
            };
            if current <= Instant::now() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(current) => break,
                _ = self.notify.notified() => continue,
            }
        }

        if let Ok(mut deadline) = self.deadline.lock() {
            *deadline = None;
        }
    }
}
