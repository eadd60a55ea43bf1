//! Restartable background task with at most one live execution.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use futures::{
    FutureExt,
    future::{BoxFuture, Future},
};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::ControlError;

/// How long a config change waits for the running loop to wind down.
pub const RESTART_DEADLINE: Duration = Duration::from_secs(5);

/// Loop body executed by a [`TaskRunner`].
///
/// The callback receives a fresh token per execution and must return once
/// the token is cancelled, after releasing whatever hardware it acquired.
pub type TaskFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct TaskHandle {
    id: u64,
    cancel: CancellationToken,
    done: CancellationToken,
    /// Launch a fresh execution when this one ends.
    restart_pending: bool,
}

struct Inner {
    name: String,
    task: TaskFn,
    active: Mutex<Option<TaskHandle>>,
    next_id: AtomicU64,
}

impl Inner {
    /// Spawns a new execution into the empty `slot`.
    fn launch(self: &Arc<Self>, slot: &mut Option<TaskHandle>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        *slot = Some(TaskHandle {
            id,
            cancel: cancel.clone(),
            done: done.clone(),
            restart_pending: false,
        });

        let inner = Arc::clone(self);
        let fut = (self.task)(cancel);

        tokio::spawn(async move {
            info!("Starting task: {}", inner.name);
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => info!("Task '{}' completed", inner.name),
                Ok(Err(e)) => error!("Task '{}' failed: {:#}", inner.name, e),
                Err(_) => error!("Task '{}' panicked", inner.name),
            }

            let mut slot = lock(&inner.active);
            let restart = slot
                .as_ref()
                .filter(|handle| handle.id == id)
                .map(|handle| handle.restart_pending);
            match restart {
                Some(true) => {
                    info!("Restarting task '{}'", inner.name);
                    inner.launch(&mut slot);
                }
                Some(false) => *slot = None,
                None => {}
            }
            drop(slot);
            done.cancel();
        });
    }
}

/// Owns one cancellable execution of a callback at a time.
///
/// `start` is idempotent while a task is alive. `stop` is the only way to
/// cancel it and never waits longer than the caller's deadline. A restart is
/// `stop` followed by `start`; the callback reads its configuration when it
/// begins, so each execution sees the latest snapshot.
///
/// # Example
///
/// ```no_run
/// use picpd::task_runner::TaskRunner;
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let runner = TaskRunner::new("ticker", |cancel| async move {
///     cancel.cancelled().await;
///     Ok(())
/// });
///
/// runner.start();
/// runner.stop(Duration::from_secs(5)).await?;
/// # Ok(())
/// # }
/// ```
pub struct TaskRunner {
    inner: Arc<Inner>,
}

impl TaskRunner {
    pub fn new<F, Fut>(name: impl Into<String>, task: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                task: Arc::new(move |cancel| task(cancel).boxed()),
                active: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Spawns the callback unless an execution is already alive.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut slot = lock(&self.inner.active);
        if slot.is_some() {
            debug!("Task '{}' already running", self.inner.name);
            return;
        }
        self.inner.launch(&mut slot);
    }

    /// Starts a fresh execution once the live one ends, or right away when
    /// nothing is running.
    pub fn start_after_current(&self) {
        let mut slot = lock(&self.inner.active);
        if let Some(handle) = slot.as_mut() {
            debug!("Task '{}' will restart once it ends", self.inner.name);
            handle.restart_pending = true;
            return;
        }
        self.inner.launch(&mut slot);
    }

    /// Cancels the live execution and waits for it to finish.
    ///
    /// Returns immediately when nothing is running. On deadline expiry a
    /// [`ControlError::Timeout`] is returned and the task keeps its slot
    /// until it actually ends, so a following `start` is a no-op. A pending
    /// [`start_after_current`](Self::start_after_current) is dropped.
    pub async fn stop(&self, deadline: Duration) -> Result<()> {
        let done = {
            let mut slot = lock(&self.inner.active);
            match slot.as_mut() {
                None => return Ok(()),
                Some(handle) => {
                    handle.restart_pending = false;
                    handle.cancel.cancel();
                    handle.done.clone()
                }
            }
        };

        tokio::time::timeout(deadline, done.cancelled())
            .await
            .map_err(|_| ControlError::Timeout {
                task: self.inner.name.clone(),
                deadline,
            })?;

        info!("Task '{}' stopped", self.inner.name);
        Ok(())
    }

    /// Applies a config change and restarts the task so it picks it up.
    ///
    /// `apply` runs first and a failure leaves the task untouched. If the
    /// live execution then misses `deadline`, `revert` restores the previous
    /// config, a fresh execution is queued behind the draining one, and the
    /// timeout is returned.
    pub async fn reconfigure<A, R>(&self, deadline: Duration, apply: A, revert: R) -> Result<()>
    where
        A: Future<Output = Result<()>>,
        R: Future<Output = Result<()>>,
    {
        apply.await?;

        if let Err(e) = self.stop(deadline).await {
            warn!(
                "Task '{}' missed its restart deadline, restoring previous config",
                self.inner.name
            );
            if let Err(revert_err) = revert.await {
                error!(
                    "Task '{}' failed to restore previous config: {revert_err:#}",
                    self.inner.name
                );
            }
            self.start_after_current();
            return Err(e);
        }

        self.start();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.active).is_some()
    }
}

fn lock(slot: &Mutex<Option<TaskHandle>>) -> MutexGuard<'_, Option<TaskHandle>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn counting_runner(started: Arc<AtomicUsize>, live: Arc<AtomicUsize>) -> TaskRunner {
        TaskRunner::new("counter", move |cancel| {
            let started = Arc::clone(&started);
            let live = Arc::clone(&live);
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                live.fetch_add(1, Ordering::SeqCst);
                cancel.cancelled().await;
                live.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn stop_on_idle_runner_succeeds_immediately() {
        let runner = TaskRunner::new("idle", |_| async { Ok(()) });

        let result = runner.stop(Duration::from_millis(1)).await;

        assert!(result.is_ok());
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn double_start_keeps_one_active_task() {
        let started = Arc::new(AtomicUsize::new(0));
        let live = Arc::new(AtomicUsize::new(0));
        let runner = counting_runner(Arc::clone(&started), Arc::clone(&live));

        runner.start();
        runner.start();
        sleep(Duration::from_millis(20)).await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert!(runner.is_running());

        runner.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn restart_runs_a_new_execution() {
        let started = Arc::new(AtomicUsize::new(0));
        let live = Arc::new(AtomicUsize::new(0));
        let runner = counting_runner(Arc::clone(&started), Arc::clone(&live));

        runner.start();
        sleep(Duration::from_millis(10)).await;
        runner.stop(Duration::from_secs(1)).await.unwrap();
        runner.start();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(live.load(Ordering::SeqCst), 1);

        runner.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn stop_times_out_on_wedged_task() {
        let runner = TaskRunner::new("wedged", |_cancel| async {
            sleep(Duration::from_millis(300)).await;
            Ok(())
        });

        runner.start();
        let err = runner.stop(Duration::from_millis(20)).await.unwrap_err();

        assert_eq!(
            err.downcast_ref::<ControlError>(),
            Some(&ControlError::Timeout {
                task: "wedged".to_string(),
                deadline: Duration::from_millis(20),
            })
        );
        assert!(runner.is_running());

        runner.stop(Duration::from_secs(2)).await.unwrap();
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn natural_completion_frees_the_slot() {
        let runner = TaskRunner::new("oneshot", |_| async { Ok(()) });

        runner.start();
        sleep(Duration::from_millis(20)).await;

        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn failing_or_panicking_task_frees_the_slot() {
        let failing = TaskRunner::new("failing", |_| async { anyhow::bail!("sensor gone") });
        let panicking = TaskRunner::new("panicking", |_| async {
            panic!("boom");
        });

        failing.start();
        panicking.start();
        sleep(Duration::from_millis(20)).await;

        assert!(!failing.is_running());
        assert!(!panicking.is_running());
    }

    fn wedged_runner(started: Arc<AtomicUsize>, hold: Duration) -> TaskRunner {
        TaskRunner::new("wedged", move |_cancel| {
            let started = Arc::clone(&started);
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                sleep(hold).await;
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn start_after_current_relaunches_when_wedged_task_ends() {
        let started = Arc::new(AtomicUsize::new(0));
        let runner = wedged_runner(Arc::clone(&started), Duration::from_millis(100));

        runner.start();
        assert!(runner.stop(Duration::from_millis(10)).await.is_err());
        runner.start_after_current();
        sleep(Duration::from_millis(150)).await;

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert!(runner.is_running());

        runner.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn start_after_current_on_idle_runner_starts_now() {
        let started = Arc::new(AtomicUsize::new(0));
        let live = Arc::new(AtomicUsize::new(0));
        let runner = counting_runner(Arc::clone(&started), Arc::clone(&live));

        runner.start_after_current();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        runner.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn stop_drops_a_queued_restart() {
        let started = Arc::new(AtomicUsize::new(0));
        let runner = wedged_runner(Arc::clone(&started), Duration::from_millis(60));

        runner.start();
        runner.start_after_current();
        runner.stop(Duration::from_secs(1)).await.unwrap();
        sleep(Duration::from_millis(20)).await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn reconfigure_reverts_and_requeues_on_timeout() {
        let started = Arc::new(AtomicUsize::new(0));
        let runner = wedged_runner(Arc::clone(&started), Duration::from_millis(100));
        let value = Arc::new(Mutex::new(1));
        let set = |v: u32| {
            let value = Arc::clone(&value);
            async move {
                *value.lock().unwrap() = v;
                Ok::<(), anyhow::Error>(())
            }
        };

        runner.start();
        let err = runner
            .reconfigure(Duration::from_millis(10), set(2), set(1))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ControlError>(),
            Some(ControlError::Timeout { .. })
        ));
        assert_eq!(*value.lock().unwrap(), 1);

        sleep(Duration::from_millis(150)).await;
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert!(runner.is_running());

        runner.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn reconfigure_keeps_task_when_apply_fails() {
        let started = Arc::new(AtomicUsize::new(0));
        let live = Arc::new(AtomicUsize::new(0));
        let runner = counting_runner(Arc::clone(&started), Arc::clone(&live));

        runner.start();
        sleep(Duration::from_millis(10)).await;
        let result = runner
            .reconfigure(
                Duration::from_secs(1),
                async { Err::<(), _>(anyhow::anyhow!("rejected")) },
                async { Ok::<(), anyhow::Error>(()) },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(live.load(Ordering::SeqCst), 1);

        runner.stop(Duration::from_secs(1)).await.unwrap();
    }
}
