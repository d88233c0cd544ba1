//! Isolated execution contexts with bounded shutdown.
//!
//! A [`Worker`] is a named OS thread. [`Worker::spawn_async`] gives the
//! thread its own current-thread Tokio runtime, a single-threaded
//! cooperative scheduler that shares nothing with the caller except what
//! the closure captures. [`Worker::spawn_blocking`] is a plain thread for
//! work that may block.
//!
//! Stopping a worker is always cooperative first: the owner flips a
//! shared state register and then calls [`Worker::join`], which waits
//! with an escalating timeout before forcing the runtime down and, as a
//! last resort, detaching the thread.

use std::future::Future;
use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// How long [`Worker::join`] waits before escalating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownPolicy {
    /// Wait of the first graceful attempt. Each later attempt doubles it.
    pub first_wait: Duration,
    /// Number of graceful attempts before forcing.
    pub attempts: u32,
    /// How long a forced abort may take before the thread is detached.
    pub abort_grace: Duration,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            first_wait: Duration::from_millis(500),
            attempts: 3,
            abort_grace: Duration::from_millis(500),
        }
    }
}

/// How a worker ended, from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerExit {
    /// Finished on its own within the graceful attempts.
    Graceful,
    /// Finished after its runtime was forced down.
    Forced,
    /// Still running; the thread was detached.
    Detached,
}

/// Set when the thread body returns or unwinds.
#[derive(Default)]
struct Finished {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Finished {
    fn mark(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cv.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            done = self
                .cv
                .wait_timeout(done, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Marks the worker finished even if the body panics.
struct FinishGuard(Arc<Finished>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.mark();
    }
}

/// Handle to a running worker thread.
pub struct Worker {
    name: String,
    handle: Option<JoinHandle<()>>,
    finished: Arc<Finished>,
    /// Present for async workers: tells the runtime to drop everything.
    abort: Option<Arc<Notify>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl Worker {
    /// Spawns a thread running `make_task()` on its own current-thread
    /// runtime.
    ///
    /// `make_task` runs on the new thread, so the future it returns does
    /// not need to be `Send`. The future runs inside a `LocalSet`, so it
    /// may spawn further tasks with `tokio::task::spawn_local`. Once it
    /// completes, or is aborted, every task it left behind is dropped.
    pub fn spawn_async<F, Fut>(
        name: impl Into<String>,
        abort_grace: Duration,
        make_task: F,
    ) -> io::Result<Self>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let name = name.into();
        let finished = Arc::new(Finished::default());
        let abort = Arc::new(Notify::new());

        let handle = {
            let finished = Arc::clone(&finished);
            let abort = Arc::clone(&abort);
            let name = name.clone();
            thread::Builder::new().name(name.clone()).spawn(move || {
                let _guard = FinishGuard(finished);
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(worker = %name, error = %e, "failed to build runtime");
                        return;
                    }
                };
                let local = tokio::task::LocalSet::new();
                local.block_on(&runtime, async {
                    tokio::select! {
                        () = make_task() => {}
                        () = abort.notified() => {
                            tracing::warn!(worker = %name, "worker aborted");
                        }
                    }
                });
                // Dropping the set cancels every task still spawned on it.
                drop(local);
                runtime.shutdown_timeout(abort_grace);
                tracing::debug!(worker = %name, "worker runtime shut down");
            })?
        };

        tracing::debug!(worker = %name, "worker spawned");
        Ok(Self {
            name,
            handle: Some(handle),
            finished,
            abort: Some(abort),
        })
    }

    /// Spawns a plain thread running `body`.
    pub fn spawn_blocking<F>(name: impl Into<String>, body: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let finished = Arc::new(Finished::default());

        let handle = {
            let finished = Arc::clone(&finished);
            thread::Builder::new().name(name.clone()).spawn(move || {
                let _guard = FinishGuard(finished);
                body();
            })?
        };

        tracing::debug!(worker = %name, "worker spawned");
        Ok(Self {
            name,
            handle: Some(handle),
            finished,
            abort: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the thread body has returned.
    pub fn is_finished(&self) -> bool {
        self.finished.is_set()
    }

    /// Waits for the worker to end, escalating per `policy`.
    ///
    /// The caller is expected to have already asked the worker to stop.
    /// Never blocks longer than the sum of the policy's waits.
    pub fn join(mut self, policy: ShutdownPolicy) -> WorkerExit {
        let mut wait = policy.first_wait;
        for attempt in 1..=policy.attempts.max(1) {
            if self.finished.wait(wait) {
                self.reap();
                tracing::debug!(worker = %self.name, attempt, "worker exited");
                return WorkerExit::Graceful;
            }
            tracing::debug!(
                worker = %self.name,
                attempt,
                waited_ms = wait.as_millis() as u64,
                "worker still running"
            );
            wait = wait.saturating_mul(2);
        }

        if let Some(abort) = &self.abort {
            tracing::warn!(worker = %self.name, "worker did not exit, forcing");
            abort.notify_one();
            // The runtime gets abort_grace to drop its tasks; allow the
            // same again for the thread itself to unwind.
            if self.finished.wait(policy.abort_grace.saturating_mul(2)) {
                self.reap();
                return WorkerExit::Forced;
            }
        }

        tracing::error!(worker = %self.name, "worker unresponsive, detaching thread");
        self.handle.take();
        WorkerExit::Detached
    }

    fn reap(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(worker = %self.name, "worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn quick() -> ShutdownPolicy {
        ShutdownPolicy {
            first_wait: Duration::from_millis(50),
            attempts: 2,
            abort_grace: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_async_worker_runs_its_task() {
        let ran = Arc::new(AtomicBool::new(false));
        let worker = {
            let ran = Arc::clone(&ran);
            Worker::spawn_async("t-run", Duration::from_millis(100), move || async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                ran.store(true, Ordering::SeqCst);
            })
            .unwrap()
        };
        assert_eq!(worker.join(quick()), WorkerExit::Graceful);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cooperative_stop_is_graceful() {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let stop = Arc::clone(&stop);
            Worker::spawn_async("t-coop", Duration::from_millis(100), move || async move {
                while !stop.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .unwrap()
        };
        stop.store(true, Ordering::SeqCst);
        assert_eq!(worker.join(quick()), WorkerExit::Graceful);
    }

    #[test]
    fn test_stuck_async_worker_is_forced() {
        // Never looks at any stop signal, but does yield.
        let worker = Worker::spawn_async("t-stuck", Duration::from_millis(100), || async {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .unwrap();
        assert_eq!(worker.join(quick()), WorkerExit::Forced);
    }

    #[test]
    fn test_blocking_worker_that_never_returns_is_detached() {
        let release = Arc::new(AtomicBool::new(false));
        let worker = {
            let release = Arc::clone(&release);
            Worker::spawn_blocking("t-hang", move || {
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
            })
            .unwrap()
        };
        assert_eq!(worker.join(quick()), WorkerExit::Detached);
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_panicking_worker_counts_as_exited() {
        let worker = Worker::spawn_blocking("t-panic", || panic!("boom")).unwrap();
        assert_eq!(worker.join(quick()), WorkerExit::Graceful);
    }

    #[test]
    fn test_local_tasks_are_dropped_with_the_worker() {
        let worker = Worker::spawn_async("t-local", Duration::from_millis(100), || async {
            tokio::task::spawn_local(async {
                loop {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        })
        .unwrap();
        assert_eq!(worker.join(quick()), WorkerExit::Graceful);
    }

    #[test]
    fn test_exit_ordering() {
        assert!(WorkerExit::Graceful < WorkerExit::Forced);
        assert_eq!(WorkerExit::Forced.max(WorkerExit::Detached), WorkerExit::Detached);
    }

    #[test]
    fn test_is_finished() {
        let worker = Worker::spawn_blocking("t-fin", || {}).unwrap();
        assert!(worker.finished.wait(Duration::from_secs(1)));
        assert!(worker.is_finished());
        assert_eq!(worker.name(), "t-fin");
    }

    #[test]
    fn test_shutdown_policy_serde() {
        let policy = ShutdownPolicy::default();
        let json = serde_json::to_string(&policy).unwrap();
        let back: ShutdownPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
