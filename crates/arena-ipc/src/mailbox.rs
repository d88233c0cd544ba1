//! Bounded, non-blocking handoff between execution contexts.
//!
//! A [`Mailbox`] is shared by cloning. Both ends can be driven from plain
//! threads (`write`/`read`, which park on a `Condvar`) or from async tasks
//! (`write_async`/`read_async`, which wait on a `tokio::sync::Notify`), so
//! the game thread and the networking runtime can hand values to each
//! other without either side knowing how the other one waits.
//!
//! The capacity is small, usually 1. A full mailbox never blocks forever:
//! a write either lands within its patience or hands the item back in
//! [`MailboxFull`], and the caller decides whether to drop or retry.
//! [`Mailbox::push_latest`] is the overwrite path for latest-value data.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// A write did not land within its patience. Carries the rejected item.
pub struct MailboxFull<T>(pub T);

impl<T> MailboxFull<T> {
    /// Takes the rejected item back.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for MailboxFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MailboxFull(..)")
    }
}

impl<T> fmt::Display for MailboxFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("mailbox full")
    }
}

impl<T> std::error::Error for MailboxFull<T> {}

struct Shared<T> {
    slots: Mutex<VecDeque<T>>,
    capacity: usize,
    /// Parked threads waiting for an item / for room.
    readable: Condvar,
    writable: Condvar,
    /// Async tasks waiting for an item / for room.
    readable_async: Notify,
    writable_async: Notify,
}

/// A bounded handoff slot. Cloning yields another handle to the same slot.
pub struct Mailbox<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("len", &self.len())
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::single()
    }
}

impl<T> Mailbox<T> {
    /// A mailbox holding at most `capacity` unread items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                readable: Condvar::new(),
                writable: Condvar::new(),
                readable_async: Notify::new(),
                writable_async: Notify::new(),
            }),
        }
    }

    /// A single-slot mailbox.
    pub fn single() -> Self {
        Self::new(1)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of unread items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // The queue is always in a valid state between operations, so a
    // panic elsewhere while holding the lock leaves nothing to repair.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.shared
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_readers(&self) {
        self.shared.readable.notify_one();
        self.shared.readable_async.notify_waiters();
    }

    fn wake_writers(&self) {
        self.shared.writable.notify_one();
        self.shared.writable_async.notify_waiters();
    }

    /// Places `item` if there is room, without waiting.
    pub fn try_write(&self, item: T) -> Result<(), MailboxFull<T>> {
        let mut slots = self.lock();
        if slots.len() >= self.shared.capacity {
            return Err(MailboxFull(item));
        }
        slots.push_back(item);
        drop(slots);
        self.wake_readers();
        Ok(())
    }

    /// Places `item`, parking the thread up to `patience` for room.
    pub fn write(&self, item: T, patience: Duration) -> Result<(), MailboxFull<T>> {
        let deadline = Instant::now() + patience;
        let mut slots = self.lock();
        while slots.len() >= self.shared.capacity {
            let now = Instant::now();
            if now >= deadline {
                return Err(MailboxFull(item));
            }
            slots = self
                .shared
                .writable
                .wait_timeout(slots, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        slots.push_back(item);
        drop(slots);
        self.wake_readers();
        Ok(())
    }

    /// Places `item`, suspending the task up to `patience` for room.
    pub async fn write_async(
        &self,
        item: T,
        patience: Duration,
    ) -> Result<(), MailboxFull<T>> {
        let deadline = tokio::time::Instant::now() + patience;
        let mut item = item;
        loop {
            // Register interest before checking, so a read that lands
            // between the check and the await still wakes us.
            let room = self.shared.writable_async.notified();
            tokio::pin!(room);
            room.as_mut().enable();

            match self.try_write(item) {
                Ok(()) => return Ok(()),
                Err(MailboxFull(back)) => item = back,
            }
            if tokio::time::timeout_at(deadline, room).await.is_err() {
                return self.try_write(item);
            }
        }
    }

    /// Places `item` unconditionally. If the mailbox is full the oldest
    /// unread item is evicted and returned.
    pub fn push_latest(&self, item: T) -> Option<T> {
        let mut slots = self.lock();
        let evicted = if slots.len() >= self.shared.capacity {
            slots.pop_front()
        } else {
            None
        };
        slots.push_back(item);
        drop(slots);
        self.wake_readers();
        evicted
    }

    /// Takes the oldest unread item, without waiting.
    pub fn try_read(&self) -> Option<T> {
        let item = self.lock().pop_front();
        if item.is_some() {
            self.wake_writers();
        }
        item
    }

    /// Takes the oldest unread item, parking the thread up to `patience`.
    pub fn read(&self, patience: Duration) -> Option<T> {
        let deadline = Instant::now() + patience;
        let mut slots = self.lock();
        loop {
            if let Some(item) = slots.pop_front() {
                drop(slots);
                self.wake_writers();
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slots = self
                .shared
                .readable
                .wait_timeout(slots, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Takes the oldest unread item, suspending the task up to `patience`.
    pub async fn read_async(&self, patience: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + patience;
        loop {
            let arrival = self.shared.readable_async.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            if let Some(item) = self.try_read() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return self.try_read();
            }
        }
    }

    /// Takes every unread item, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let items: Vec<T> = self.lock().drain(..).collect();
        if !items.is_empty() {
            self.wake_writers();
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn test_single_slot_rejects_second_write_until_read() {
        let mb = Mailbox::single();
        assert!(mb.write(1, SHORT).is_ok());

        let rejected = mb.write(2, SHORT).unwrap_err();
        assert_eq!(rejected.into_inner(), 2);

        assert_eq!(mb.read(SHORT), Some(1));
        assert!(mb.write(2, SHORT).is_ok());
        assert_eq!(mb.read(SHORT), Some(2));
    }

    #[test]
    fn test_read_empty_returns_none_after_patience() {
        let mb: Mailbox<u8> = Mailbox::single();
        let start = Instant::now();
        assert_eq!(mb.read(SHORT), None);
        assert!(start.elapsed() >= SHORT);
    }

    #[test]
    fn test_zero_patience_does_not_wait() {
        let mb = Mailbox::single();
        mb.try_write("a").unwrap();
        assert!(mb.write("b", Duration::ZERO).is_err());
        assert_eq!(mb.read(Duration::ZERO), Some("a"));
        assert_eq!(mb.read(Duration::ZERO), None);
    }

    #[test]
    fn test_capacity_is_at_least_one() {
        let mb: Mailbox<()> = Mailbox::new(0);
        assert_eq!(mb.capacity(), 1);
    }

    #[test]
    fn test_bounded_fifo_order() {
        let mb = Mailbox::new(3);
        for i in 0..3 {
            mb.try_write(i).unwrap();
        }
        assert!(mb.try_write(3).is_err());
        assert_eq!(mb.len(), 3);
        assert_eq!(mb.drain(), vec![0, 1, 2]);
        assert!(mb.is_empty());
    }

    #[test]
    fn test_push_latest_evicts_oldest() {
        let mb = Mailbox::single();
        assert_eq!(mb.push_latest("old"), None);
        assert_eq!(mb.push_latest("new"), Some("old"));
        assert_eq!(mb.try_read(), Some("new"));
    }

    #[test]
    fn test_blocked_writer_lands_once_reader_drains() {
        let mb = Mailbox::single();
        mb.try_write(1).unwrap();

        let writer = {
            let mb = mb.clone();
            thread::spawn(move || mb.write(2, Duration::from_secs(5)).is_ok())
        };
        thread::sleep(SHORT);
        assert_eq!(mb.read(SHORT), Some(1));

        assert!(writer.join().unwrap());
        assert_eq!(mb.read(Duration::from_secs(1)), Some(2));
    }

    #[test]
    fn test_blocked_reader_wakes_on_write() {
        let mb = Mailbox::single();
        let reader = {
            let mb = mb.clone();
            thread::spawn(move || mb.read(Duration::from_secs(5)))
        };
        thread::sleep(SHORT);
        mb.try_write("hi").unwrap();
        assert_eq!(reader.join().unwrap(), Some("hi"));
    }

    #[tokio::test]
    async fn test_async_write_times_out_when_full() {
        let mb = Mailbox::single();
        mb.write_async(1, SHORT).await.unwrap();
        let err = mb.write_async(2, SHORT).await.unwrap_err();
        assert_eq!(err.0, 2);
    }

    #[tokio::test]
    async fn test_async_read_sees_write_from_thread() {
        let mb = Mailbox::single();
        let writer = {
            let mb = mb.clone();
            thread::spawn(move || {
                thread::sleep(SHORT);
                mb.write(7u32, Duration::from_secs(1)).is_ok()
            })
        };
        assert_eq!(mb.read_async(Duration::from_secs(5)).await, Some(7));
        assert!(writer.join().unwrap());
    }

    #[tokio::test]
    async fn test_async_writer_wakes_when_thread_reads() {
        let mb = Mailbox::single();
        mb.try_write(1u32).unwrap();
        let reader = {
            let mb = mb.clone();
            thread::spawn(move || {
                thread::sleep(SHORT);
                mb.read(Duration::from_secs(1))
            })
        };
        mb.write_async(2, Duration::from_secs(5)).await.unwrap();
        assert_eq!(reader.join().unwrap(), Some(1));
        assert_eq!(mb.try_read(), Some(2));
    }
}
