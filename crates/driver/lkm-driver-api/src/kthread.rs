//! Cooperatively stopped background worker (`kthread_create` /
//! `wake_up_process` / `kthread_stop`).
//!
//! A [`KThread`] runs a unit of work, then sleeps for a fixed interval, until
//! it is asked to stop. The stop flag is checked before each unit of work and
//! again before each sleep, so a stop request is honoured within one
//! interval. The sleep itself is not interrupted.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use lkm_core::sync::StopFlag;
use lkm_core::{pr_debug, pr_err};

use crate::error::DriverError;
use crate::services::{TaskJoin, TaskSpawner};

/// Lifecycle of a [`KThread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KThreadState {
    /// Created but not yet woken.
    Created = 0,
    /// Running its loop.
    Running = 1,
    /// Stop requested, loop not yet exited.
    StopRequested = 2,
    /// The loop has exited, or the thread never ran.
    Terminated = 3,
}

impl KThreadState {
    const fn from_u8(val: u8) -> Self {
        match val {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::StopRequested,
            _ => Self::Terminated,
        }
    }
}

struct Shared {
    stop: StopFlag,
    state: AtomicU8,
    iterations: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: KThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> KThreadState {
        KThreadState::from_u8(self.state.load(Ordering::Acquire))
    }
}

type Entry = Box<dyn FnOnce() + Send + 'static>;

/// A background worker owned by a module.
pub struct KThread {
    name: String,
    shared: Arc<Shared>,
    spawner: Arc<dyn TaskSpawner>,
    pending: Option<Entry>,
    join: Option<Box<dyn TaskJoin>>,
}

impl KThread {
    /// Creates a worker without starting it.
    ///
    /// Once woken, the worker calls `work(i)` for `i = 0, 1, 2, …`, sleeping
    /// `interval_ms` between calls.
    pub fn create<W>(
        spawner: Arc<dyn TaskSpawner>,
        name: &str,
        interval_ms: u64,
        mut work: W,
    ) -> Self
    where
        W: FnMut(u64) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            stop: StopFlag::new(),
            state: AtomicU8::new(KThreadState::Created as u8),
            iterations: AtomicU64::new(0),
        });

        let entry: Entry = {
            let shared = Arc::clone(&shared);
            let spawner = Arc::clone(&spawner);
            Box::new(move || {
                let mut i = 0;
                while !shared.stop.should_stop() {
                    work(i);
                    i += 1;
                    shared.iterations.store(i, Ordering::Release);
                    if shared.stop.should_stop() {
                        break;
                    }
                    spawner.msleep(interval_ms);
                }
                shared.set_state(KThreadState::Terminated);
            })
        };

        Self {
            name: name.to_string(),
            shared,
            spawner,
            pending: Some(entry),
            join: None,
        }
    }

    /// Creates and wakes a worker.
    ///
    /// # Errors
    ///
    /// [`DriverError::SpawnDenied`] if the host refuses the thread.
    pub fn run<W>(
        spawner: Arc<dyn TaskSpawner>,
        name: &str,
        interval_ms: u64,
        work: W,
    ) -> Result<Self, DriverError>
    where
        W: FnMut(u64) + Send + 'static,
    {
        let mut thread = Self::create(spawner, name, interval_ms, work);
        thread.wake()?;
        Ok(thread)
    }

    /// Starts the worker.
    ///
    /// # Errors
    ///
    /// [`DriverError::SpawnDenied`] if the host refuses the thread, after
    /// which the worker is [`KThreadState::Terminated`].
    /// [`DriverError::InvalidState`] if it was already woken or stopped.
    pub fn wake(&mut self) -> Result<(), DriverError> {
        let entry = self.pending.take().ok_or(DriverError::InvalidState)?;
        self.shared.set_state(KThreadState::Running);
        match self.spawner.spawn(&self.name, entry) {
            Ok(join) => {
                pr_debug!("kthread `{}` started", self.name);
                self.join = Some(join);
                Ok(())
            }
            Err(e) => {
                pr_err!("kthread `{}`: cannot start: {e} ({})", self.name, e.errno());
                self.shared.set_state(KThreadState::Terminated);
                Err(DriverError::SpawnDenied(e))
            }
        }
    }

    /// Stops the worker, waits for it to exit and returns the number of
    /// completed iterations.
    pub fn stop(mut self) -> u64 {
        self.shutdown();
        self.iterations()
    }

    /// Completed iterations so far.
    pub fn iterations(&self) -> u64 {
        self.shared.iterations.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> KThreadState {
        self.shared.state()
    }

    /// Returns the thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a read-only view that stays valid after the worker is gone.
    pub fn monitor(&self) -> KThreadMonitor {
        KThreadMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    fn shutdown(&mut self) {
        self.shared.stop.request();
        if let Some(join) = self.join.take() {
            if self.shared.state() == KThreadState::Running {
                self.shared.set_state(KThreadState::StopRequested);
            }
            join.join();
            pr_debug!(
                "kthread `{}` stopped after {} iterations",
                self.name,
                self.iterations()
            );
        }
        // Never woken: discard the entry without running it.
        self.pending = None;
        self.shared.set_state(KThreadState::Terminated);
    }
}

impl Drop for KThread {
    fn drop(&mut self) {
        if self.state() != KThreadState::Terminated || self.join.is_some() {
            self.shutdown();
        }
    }
}

impl fmt::Debug for KThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KThread")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("iterations", &self.iterations())
            .finish_non_exhaustive()
    }
}

/// Observes a [`KThread`] without owning it.
#[derive(Clone)]
pub struct KThreadMonitor {
    shared: Arc<Shared>,
}

impl KThreadMonitor {
    /// Completed iterations so far.
    pub fn iterations(&self) -> u64 {
        self.shared.iterations.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> KThreadState {
        self.shared.state()
    }
}

impl fmt::Debug for KThreadMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KThreadMonitor")
            .field("state", &self.state())
            .field("iterations", &self.iterations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpawnError;
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    struct StdJoin(thread::JoinHandle<()>);

    impl TaskJoin for StdJoin {
        fn join(self: Box<Self>) {
            let _ = self.0.join();
        }
    }

    /// Spawns real threads with a short sleep, or refuses every spawn.
    struct Spawner {
        deny: bool,
        sleeps: Mutex<Vec<u64>>,
    }

    impl Spawner {
        fn new(deny: bool) -> Arc<Self> {
            Arc::new(Self {
                deny,
                sleeps: Mutex::new(Vec::new()),
            })
        }
    }

    impl TaskSpawner for Spawner {
        fn spawn(&self, name: &str, entry: Entry) -> Result<Box<dyn TaskJoin>, SpawnError> {
            if self.deny {
                return Err(SpawnError::Denied);
            }
            let handle = thread::Builder::new()
                .name(name.to_string())
                .spawn(entry)
                .map_err(|_| SpawnError::OutOfMemory)?;
            Ok(Box::new(StdJoin(handle)))
        }

        fn msleep(&self, ms: u64) {
            self.sleeps.lock().unwrap().push(ms);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn runs_until_stopped() {
        let spawner = Spawner::new(false);
        let (tx, rx) = mpsc::channel();
        let worker = KThread::run(spawner.clone(), "worker", 5, move |i| {
            let _ = tx.send(i);
        })
        .unwrap();
        assert_eq!(rx.recv().unwrap(), 0);
        assert_eq!(rx.recv().unwrap(), 1);
        assert_eq!(rx.recv().unwrap(), 2);
        let monitor = worker.monitor();
        let total = worker.stop();
        assert!(total >= 3);
        assert_eq!(monitor.state(), KThreadState::Terminated);
        assert_eq!(monitor.iterations(), total);
        assert!(spawner.sleeps.lock().unwrap().iter().all(|&ms| ms == 5));
    }

    #[test]
    fn never_woken_runs_nothing() {
        let spawner = Spawner::new(false);
        let worker = KThread::create(spawner, "idle", 1, |_| panic!("must not run"));
        assert_eq!(worker.state(), KThreadState::Created);
        let monitor = worker.monitor();
        assert_eq!(worker.stop(), 0);
        assert_eq!(monitor.state(), KThreadState::Terminated);
    }

    #[test]
    fn denied_spawn_terminates() {
        let spawner = Spawner::new(true);
        let mut worker = KThread::create(spawner, "denied", 1, |_| {});
        assert_eq!(
            worker.wake(),
            Err(DriverError::SpawnDenied(SpawnError::Denied))
        );
        assert_eq!(worker.state(), KThreadState::Terminated);
        assert_eq!(worker.wake(), Err(DriverError::InvalidState));
    }

    #[test]
    fn drop_stops_and_joins() {
        let spawner = Spawner::new(false);
        let (tx, rx) = mpsc::channel();
        let worker = KThread::run(spawner, "dropped", 1, move |i| {
            let _ = tx.send(i);
        })
        .unwrap();
        rx.recv().unwrap();
        let monitor = worker.monitor();
        drop(worker);
        assert_eq!(monitor.state(), KThreadState::Terminated);
        let seen = monitor.iterations();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(monitor.iterations(), seen);
    }
}
