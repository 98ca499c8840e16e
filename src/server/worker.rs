//! Background worker lifecycle: idempotent start, cooperative stop, join.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::utils::CacheSyncError;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Flags observable from outside the worker.
#[derive(Debug, Default)]
struct WorkerFlags {
    /// Set by `create_*()`, cleared when the worker exits.
    started: AtomicBool,

    /// True while the worker's loop body is executing.
    running: AtomicBool,
}

/// Marks a worker as stopped when dropped, also if its body panics.
struct ExitGuard(Arc<WorkerFlags>, &'static str);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
        self.0.started.store(false, Ordering::Release);
        pf_debug!("{} worker exited", self.1);
    }
}

/// Handle to one background worker whose body produces an outcome `T`.
pub struct WorkerHandle<T> {
    name: &'static str,
    flags: Arc<WorkerFlags>,

    /// Stop signal; the body checks it at every loop top.
    tx_stop: watch::Sender<bool>,

    join_handle: Mutex<Option<JoinHandle<T>>>,
}

impl<T> WorkerHandle<T>
where
    T: Send + 'static,
{
    pub fn new(name: &'static str) -> Self {
        let (tx_stop, _) = watch::channel(false);
        WorkerHandle {
            name,
            flags: Arc::new(WorkerFlags::default()),
            tx_stop,
            join_handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_started(&self) -> bool {
        self.flags.started.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.flags.running.load(Ordering::Acquire)
    }

    /// Claims the start flag. Returns `Ok(None)` if already started,
    /// otherwise the runtime to spawn on and a fresh stop receiver.
    fn claim_start(
        &self,
    ) -> Result<Option<(Handle, watch::Receiver<bool>)>, CacheSyncError> {
        if self.flags.started.swap(true, Ordering::AcqRel) {
            return Ok(None);
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.flags.started.store(false, Ordering::Release);
                return logged_err!("Create {} worker fail: {}", self.name, e);
            }
        };
        self.tx_stop.send_replace(false);
        Ok(Some((runtime, self.tx_stop.subscribe())))
    }

    fn store_join_handle(&self, join_handle: JoinHandle<T>) {
        let mut slot =
            self.join_handle.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(join_handle);
    }

    /// Starts the worker as an async task unless already started. Returns
    /// true if a new task got spawned.
    pub fn create_task<F, Fut>(&self, body: F) -> Result<bool, CacheSyncError>
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let Some((runtime, rx_stop)) = self.claim_start()? else {
            return Ok(false);
        };
        let flags = self.flags.clone();
        let name = self.name;
        let body = body(rx_stop);
        let join_handle = runtime.spawn(async move {
            let _guard = ExitGuard(flags.clone(), name);
            flags.running.store(true, Ordering::Release);
            body.await
        });
        self.store_join_handle(join_handle);
        pf_debug!("{} worker created", self.name);
        Ok(true)
    }

    /// Starts the worker on a dedicated blocking thread unless already
    /// started. Returns true if a new thread got spawned.
    pub fn create_blocking<F>(&self, body: F) -> Result<bool, CacheSyncError>
    where
        F: FnOnce(watch::Receiver<bool>) -> T + Send + 'static,
    {
        let Some((runtime, rx_stop)) = self.claim_start()? else {
            return Ok(false);
        };
        let flags = self.flags.clone();
        let name = self.name;
        let join_handle = runtime.spawn_blocking(move || {
            let _guard = ExitGuard(flags.clone(), name);
            flags.running.store(true, Ordering::Release);
            body(rx_stop)
        });
        self.store_join_handle(join_handle);
        pf_debug!("{} worker created", self.name);
        Ok(true)
    }

    /// Asks the worker to stop at its next loop top. In-flight calls run to
    /// completion or their own timeout.
    pub fn request_stop(&self) {
        self.tx_stop.send_replace(true);
    }

    /// Waits for the worker to exit and returns its outcome. `None` if it
    /// was never started, was already awaited, or panicked.
    pub async fn await_stopped(&self) -> Option<T> {
        let join_handle = {
            let mut slot =
                self.join_handle.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        }?;
        match join_handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                pf_error!("{} worker join error: {}", self.name, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod worker_tests {
    use super::*;
    use tokio::time::{self, Duration};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn task_start_once() -> Result<(), CacheSyncError> {
        let worker: WorkerHandle<u32> = WorkerHandle::new("test");
        assert!(!worker.is_started());
        assert!(worker.create_task(|mut rx_stop| async move {
            let mut ticks = 0;
            loop {
                let stopped = *rx_stop.borrow();
                if stopped {
                    break;
                }
                ticks += 1;
                tokio::select! {
                    _ = time::sleep(Duration::from_millis(10)) => {},
                    _ = rx_stop.changed() => {},
                }
            }
            ticks
        })?);
        assert!(worker.is_started());
        // second start is a no-op
        assert!(!worker.create_task(|_| async { 0 })?);

        time::sleep(Duration::from_millis(50)).await;
        assert!(worker.is_running());
        worker.request_stop();
        let ticks = worker.await_stopped().await;
        assert!(ticks.is_some_and(|t| t > 0));
        assert!(!worker.is_running());
        assert!(!worker.is_started());
        assert_eq!(worker.await_stopped().await, None);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_runs_to_end() -> Result<(), CacheSyncError> {
        let worker: WorkerHandle<&'static str> = WorkerHandle::new("blocking");
        assert!(worker.create_blocking(|_| "done")?);
        assert_eq!(worker.await_stopped().await, Some("done"));
        assert!(!worker.is_started());
        // may be started again after it exited
        assert!(worker.create_blocking(|rx_stop| {
            if *rx_stop.borrow() {
                "stopped"
            } else {
                "again"
            }
        })?);
        assert_eq!(worker.await_stopped().await, Some("again"));
        Ok(())
    }

    #[test]
    fn no_runtime() {
        let worker: WorkerHandle<()> = WorkerHandle::new("orphan");
        assert!(worker.create_blocking(|_| ()).is_err());
        assert!(!worker.is_started());
    }
}
