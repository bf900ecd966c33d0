//! Per-chat inactivity timers.
//!
//! Each `touch()` aborts the chat's pending timer and schedules a new one. When a
//! timer runs out (no activity for the period), the expiry callback runs once
//! for that chat.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::warn;

type Callback = Arc<dyn Fn(i64) + Send + Sync>;

struct Slot {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slots {
    next_generation: u64,
    by_chat: HashMap<i64, Slot>,
}

/// Cancellable timers keyed by chat ID.
pub struct InactivityTimers {
    period: Duration,
    slots: Arc<Mutex<Slots>>,
    on_expire: Callback,
}

impl InactivityTimers {
    pub fn new<F>(period: Duration, on_expire: F) -> Self
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        Self {
            period,
            slots: Arc::new(Mutex::new(Slots::default())),
            on_expire: Arc::new(on_expire),
        }
    }

    /// Reschedule the chat's timer. Must be called from within a tokio runtime.
    pub fn touch(&self, chat_id: i64) {
        let Ok(mut slots) = self.slots.lock() else {
            warn!("Inactivity timers lock poisoned");
            return;
        };

        slots.next_generation += 1;
        let generation = slots.next_generation;

        let period = self.period;
        let callback = self.on_expire.clone();
        let shared = self.slots.clone();
        let handle = tokio::spawn(async move {
            sleep(period).await;
            // A superseded timer neither clears the slot nor fires
            let current = match shared.lock() {
                Ok(mut slots) if slots.by_chat.get(&chat_id).is_some_and(|s| s.generation == generation) => {
                    slots.by_chat.remove(&chat_id);
                    true
                }
                _ => false,
            };
            if current {
                callback(chat_id);
            }
        });

        if let Some(previous) = slots.by_chat.insert(chat_id, Slot { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancel the chat's timer, if any.
    #[cfg(test)]
    pub fn cancel(&self, chat_id: i64) {
        if let Ok(mut slots) = self.slots.lock()
            && let Some(slot) = slots.by_chat.remove(&chat_id)
        {
            slot.handle.abort();
        }
    }

    /// Number of chats with a pending timer.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.slots.lock().map(|s| s.by_chat.len()).unwrap_or(0)
    }
}

impl Drop for InactivityTimers {
    fn drop(&mut self) {
        if let Ok(mut slots) = self.slots.lock() {
            for (_, slot) in slots.by_chat.drain() {
                slot.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(period_ms: u64) -> (InactivityTimers, Arc<AtomicUsize>, Arc<Mutex<Vec<i64>>>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let fired = Arc::new(Mutex::new(Vec::new()));
        let counter_clone = counter.clone();
        let fired_clone = fired.clone();
        let timers = InactivityTimers::new(Duration::from_millis(period_ms), move |chat_id| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            fired_clone.lock().unwrap().push(chat_id);
        });
        (timers, counter, fired)
    }

    #[tokio::test]
    async fn test_fires_after_period() {
        let (timers, counter, fired) = counting(50);
        timers.touch(7);

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(timers.pending(), 1);

        sleep(Duration::from_millis(100)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(*fired.lock().unwrap(), vec![7]);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test]
    async fn test_touch_reschedules() {
        let (timers, counter, _) = counting(50);

        for _ in 0..5 {
            timers.touch(1);
            sleep(Duration::from_millis(20)).await;
        }

        // Still being reset
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chats_are_independent() {
        let (timers, counter, fired) = counting(30);
        timers.touch(1);
        timers.touch(2);
        assert_eq!(timers.pending(), 2);

        sleep(Duration::from_millis(80)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let mut chats = fired.lock().unwrap().clone();
        chats.sort();
        assert_eq!(chats, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_cancel() {
        let (timers, counter, _) = counting(30);
        timers.touch(1);
        timers.cancel(1);
        assert_eq!(timers.pending(), 0);

        sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let (timers, counter, _) = counting(30);
        timers.touch(1);
        drop(timers);

        sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
