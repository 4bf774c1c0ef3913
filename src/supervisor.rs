//! Task supervisor
//!
//! A [`Group`] runs a set of named long-lived tasks. Each task is registered
//! together with a cleanup callback that makes it return, typically by
//! cancelling a [`CancellationToken`] the task is waiting on.
//!
//! ```text
//! run() ─┬─ spawn task 1 ─┐
//!        ├─ spawn task 2 ─┼─ first task returns ─▶ call every cleanup ─▶ wait for all tasks
//!        └─ spawn task N ─┘                                              │
//!                                                                        ▼
//!                                                          first task's result
//! ```
//!
//! Every task runs on its own tokio task, so a panic in one of them surfaces as
//! a join error instead of tearing down the others. Cleanups are isolated with
//! `catch_unwind` for the same reason.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::time::Duration;

use anyhow::anyhow;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::task::JoinError;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type Cleanup = Box<dyn FnOnce() + Send>;

struct Actor {
    name: String,
    task: TaskFuture,
    cleanup: Cleanup,
}

/// A set of tasks that live and die together
#[derive(Default)]
pub struct Group {
    actors: Vec<Actor>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and the callback that interrupts it.
    ///
    /// The cleanup is called exactly once when the group shuts down, also for
    /// the task that caused the shutdown and for tasks that already returned.
    pub fn add<F, C>(&mut self, name: impl Into<String>, task: F, cleanup: C)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.actors.push(Actor {
            name: name.into(),
            task: Box::pin(task),
            cleanup: Box::new(cleanup),
        });
    }

    /// Register a task that stops when `token` is cancelled.
    pub fn add_cancellable<F>(&mut self, name: impl Into<String>, token: CancellationToken, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add(name, task, move || token.cancel());
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Run all tasks until the first one returns.
    ///
    /// Returns the result of that first task once every other task has
    /// returned as well.
    pub async fn run(self) -> anyhow::Result<()> {
        if self.actors.is_empty() {
            return Ok(());
        }

        let mut names = Vec::with_capacity(self.actors.len());
        let mut cleanups = Vec::with_capacity(self.actors.len());
        let mut running = FuturesUnordered::new();

        for (index, actor) in self.actors.into_iter().enumerate() {
            debug!(task = %actor.name, "starting task");
            let handle = tokio::spawn(actor.task);
            names.push(actor.name);
            cleanups.push(actor.cleanup);
            running.push(async move { (index, handle.await) });
        }

        let Some((index, first)) = running.next().await else {
            return Ok(());
        };
        let result = outcome(&names[index], first);
        match &result {
            Ok(()) => info!(task = %names[index], "task finished, shutting down"),
            Err(e) => error!(task = %names[index], "task failed, shutting down: {e:#}"),
        }

        for (name, cleanup) in names.iter().zip(cleanups) {
            if catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
                error!(task = %name, "cleanup panicked");
            }
        }

        while let Some((index, joined)) = running.next().await {
            match outcome(&names[index], joined) {
                Ok(()) => debug!(task = %names[index], "task stopped"),
                Err(e) => warn!(task = %names[index], "task stopped with error: {e:#}"),
            }
        }

        result
    }
}

fn outcome(name: &str, joined: Result<anyhow::Result<()>, JoinError>) -> anyhow::Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(anyhow!("task {name} panicked")),
        Err(_) => Err(anyhow!("task {name} was aborted")),
    }
}

/// Call `f` immediately and then on every tick of `period` until `cancel`
/// fires. An error returned by `f` ends the loop, so does a zero `period`.
pub async fn repeat<F, Fut>(period: Duration, cancel: CancellationToken, mut f: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    if period.is_zero() {
        return Err(anyhow!("repeat period must be positive"));
    }
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = f() => result?,
        }
    }
}

/// Waits for a termination signal.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
