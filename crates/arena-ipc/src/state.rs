//! The shared, lock-protected engine state register.

use std::fmt::Debug;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// An engine state machine value.
pub trait EngineState: Copy + Eq + Debug + Send + 'static {
    /// Whether this state accepts no further transitions.
    fn is_terminal(&self) -> bool;
}

struct Shared<S> {
    value: Mutex<S>,
    changed: Condvar,
}

/// A state value observed by both the caller thread and the worker.
///
/// Transitions are monotonic with respect to the terminal state: once a
/// terminal state is stored, every further `set` is refused.
pub struct StateRegister<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for StateRegister<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: EngineState> Debug for StateRegister<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StateRegister").field(&self.get()).finish()
    }
}

impl<S: EngineState> StateRegister<S> {
    pub fn new(initial: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                value: Mutex::new(initial),
                changed: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, S> {
        self.shared
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn get(&self) -> S {
        *self.lock()
    }

    /// Stores `next` unless the register already holds a terminal state.
    /// Returns whether the value was stored.
    pub fn set(&self, next: S) -> bool {
        let mut value = self.lock();
        if value.is_terminal() {
            tracing::trace!(current = ?*value, refused = ?next, "state is terminal");
            return false;
        }
        if *value != next {
            tracing::debug!(from = ?*value, to = ?next, "state transition");
            *value = next;
            drop(value);
            self.shared.changed.notify_all();
        }
        true
    }

    /// Stores `next` only if the current state is `expected`.
    pub fn compare_and_set(&self, expected: S, next: S) -> bool {
        let mut value = self.lock();
        if *value != expected || value.is_terminal() {
            return false;
        }
        if expected != next {
            tracing::debug!(from = ?expected, to = ?next, "state transition");
            *value = next;
            drop(value);
            self.shared.changed.notify_all();
        }
        true
    }

    /// Parks the thread until `pred` holds for the current state, or
    /// `timeout` elapses. Returns the matching state.
    pub fn wait_until(
        &self,
        mut pred: impl FnMut(S) -> bool,
        timeout: Duration,
    ) -> Option<S> {
        let deadline = Instant::now() + timeout;
        let mut value = self.lock();
        loop {
            if pred(*value) {
                return Some(*value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            value = self
                .shared
                .changed
                .wait_timeout(value, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
        Off,
    }

    impl EngineState for Light {
        fn is_terminal(&self) -> bool {
            matches!(self, Light::Off)
        }
    }

    #[test]
    fn test_set_and_get() {
        let reg = StateRegister::new(Light::Red);
        assert!(reg.set(Light::Green));
        assert_eq!(reg.get(), Light::Green);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let reg = StateRegister::new(Light::Red);
        assert!(reg.set(Light::Off));
        assert!(!reg.set(Light::Green));
        assert!(!reg.compare_and_set(Light::Off, Light::Red));
        assert_eq!(reg.get(), Light::Off);
    }

    #[test]
    fn test_compare_and_set_requires_expected() {
        let reg = StateRegister::new(Light::Red);
        assert!(!reg.compare_and_set(Light::Green, Light::Off));
        assert_eq!(reg.get(), Light::Red);
        assert!(reg.compare_and_set(Light::Red, Light::Green));
        assert_eq!(reg.get(), Light::Green);
    }

    #[test]
    fn test_clones_share_the_value() {
        let a = StateRegister::new(Light::Red);
        let b = a.clone();
        b.set(Light::Green);
        assert_eq!(a.get(), Light::Green);
    }

    #[test]
    fn test_wait_until_wakes_on_change() {
        let reg = StateRegister::new(Light::Red);
        let setter = {
            let reg = reg.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                reg.set(Light::Green);
            })
        };
        let seen = reg.wait_until(|s| s == Light::Green, Duration::from_secs(5));
        assert_eq!(seen, Some(Light::Green));
        setter.join().unwrap();
    }

    #[test]
    fn test_wait_until_times_out() {
        let reg = StateRegister::new(Light::Red);
        let seen = reg.wait_until(|s| s == Light::Green, Duration::from_millis(20));
        assert_eq!(seen, None);
    }
}
