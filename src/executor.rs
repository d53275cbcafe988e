//! Periodic worker framework
//!
//! Each independent subsystem (breaker evaluation, health probing, client
//! reporting) runs on its own named OS thread: a `setup` phase retried with
//! bounded backoff, then a fixed-cadence loop. Cancellation is a shared flag
//! checked at loop head; the inter-tick wait parks on a condvar so shutdown
//! interrupts it immediately instead of sleeping out the period.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::Result;

/// A named task driven at a fixed cadence by a dedicated worker thread.
pub trait PeriodicTask: Send {
    /// Worker thread name.
    fn name(&self) -> &'static str;

    /// One-time initialization before the loop starts.
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Cadence of the loop.
    fn period(&self) -> Duration;

    /// One loop iteration. Errors are logged; the loop continues.
    fn tick(&mut self) -> Result<()>;
}

/// Shared cancellation signal: a flag plus a condvar so waiting workers wake
/// as soon as shutdown is requested.
#[derive(Debug)]
struct Shutdown {
    flag: Mutex<bool>,
    signal: Condvar,
}

impl Shutdown {
    fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn set(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.signal.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.flag.lock()
    }

    /// Park for up to `period`. Returns true when shutdown was requested.
    fn wait(&self, period: Duration) -> bool {
        let mut flag = self.flag.lock();
        if *flag {
            return true;
        }
        self.signal.wait_for(&mut flag, period);
        *flag
    }
}

/// Owns the worker threads and their shared shutdown signal.
#[derive(Debug)]
pub struct Executor {
    shutdown: Arc<Shutdown>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Executor {
    /// Create an executor with no workers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(Shutdown::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Start a named worker for `task`. A failing `setup` is retried up to
    /// `init_retry_times` with exponential backoff before the worker gives
    /// up; the first tick runs one period after setup completes.
    pub fn spawn(&self, mut task: Box<dyn PeriodicTask>, init_retry_times: u32) -> Result<()> {
        let shutdown = Arc::clone(&self.shutdown);
        let handle = std::thread::Builder::new()
            .name(task.name().to_string())
            .spawn(move || {
                if !run_setup(task.as_mut(), init_retry_times, &shutdown) {
                    return;
                }
                info!(worker = task.name(), period_ms = task.period().as_millis() as u64, "worker started");
                loop {
                    if shutdown.wait(task.period()) {
                        break;
                    }
                    if let Err(e) = task.tick() {
                        warn!(worker = task.name(), error = %e, "worker tick failed");
                    }
                }
                debug!(worker = task.name(), "worker stopped");
            })?;
        self.workers.lock().push(handle);
        Ok(())
    }

    /// Stop every worker and join it. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.set();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.join() {
                error!("worker panicked: {e:?}");
            }
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run `setup` with bounded retries. Returns false when the worker should
/// exit without entering its loop.
fn run_setup(task: &mut dyn PeriodicTask, init_retry_times: u32, shutdown: &Shutdown) -> bool {
    let mut backoff = ExponentialBackoff {
        initial_interval: Duration::from_millis(100),
        max_interval: Duration::from_secs(10),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    };
    let mut attempts = 0u32;

    loop {
        if shutdown.is_set() {
            return false;
        }
        match task.setup() {
            Ok(()) => return true,
            Err(e) => {
                attempts += 1;
                if attempts > init_retry_times {
                    error!(
                        worker = task.name(),
                        attempts,
                        error = %e,
                        "worker setup failed, giving up"
                    );
                    return false;
                }
                let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(10));
                warn!(
                    worker = task.name(),
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "worker setup failed, retrying"
                );
                if shutdown.wait(delay) {
                    return false;
                }
            }
        }
    }
}
