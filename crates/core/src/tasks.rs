//! Deferred work scheduled during a request and run after its response.
//!
//! Handlers collect [`BackgroundTask`]s in a request-scoped [`Deferred`]
//! queue. Once the response body is serialized the queue is handed to the
//! [`TaskRunner`], whose worker spawns every task onto a `JoinSet`. Tasks run
//! at most once, in no particular order, and are never retried. A failing or
//! panicking task is logged and does not affect its siblings.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::Error;

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'static>>;

/// What a deferred task is for. Used for logging and test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Re-derive a caller's full context with every sub-cache bypassed.
    Refresh,
    /// Store a freshly assembled context.
    CacheWrite,
    /// Push the caller to the CRM and link the CRM id locally.
    SystemUpdate,
    /// Log the call, bump the contact and the day's metrics.
    RecordCall,
    /// Drop cache entries made stale by a mutation.
    Invalidate,
    /// Write call, transcript or appointment records.
    Persist,
    /// Send the call trace to the tracing service.
    Trace,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Refresh => "refresh",
            TaskKind::CacheWrite => "cache_write",
            TaskKind::SystemUpdate => "system_update",
            TaskKind::RecordCall => "record_call",
            TaskKind::Invalidate => "invalidate",
            TaskKind::Persist => "persist",
            TaskKind::Trace => "trace",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct BackgroundTask {
    kind: TaskKind,
    label: String,
    fut: TaskFuture,
}

impl fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl BackgroundTask {
    pub fn new<F>(kind: TaskKind, label: impl Into<String>, fut: F) -> Self
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self { kind, label: label.into(), fut: Box::pin(fut) }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the task to completion and log its outcome.
    pub async fn run(self) -> Result<(), Error> {
        let BackgroundTask { kind, label, fut } = self;
        let result = fut.await;
        match &result {
            Ok(()) => tracing::debug!(%kind, %label, "background task completed"),
            Err(e) => tracing::error!(%kind, %label, error = %e, "background task failed"),
        }
        result
    }
}

/// Request-scoped queue of tasks to run after the response.
#[derive(Debug, Default)]
pub struct Deferred {
    tasks: Vec<BackgroundTask>,
}

impl Deferred {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, task: BackgroundTask) {
        tracing::trace!(kind = %task.kind, label = %task.label, "task scheduled");
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        self.tasks.iter().map(BackgroundTask::kind).collect()
    }

    /// Number of queued tasks of `kind`.
    pub fn count(&self, kind: TaskKind) -> usize {
        self.tasks.iter().filter(|t| t.kind == kind).count()
    }

    pub fn into_tasks(self) -> Vec<BackgroundTask> {
        self.tasks
    }

    /// Run every task on the current task, one after another.
    ///
    /// Used where no worker is running (the CLI, tests). Returns how many
    /// tasks failed.
    pub async fn run_inline(self) -> usize {
        let mut failed = 0;
        for task in self.tasks {
            if task.run().await.is_err() {
                failed += 1;
            }
        }
        failed
    }
}

enum Message {
    Run(BackgroundTask),
    Shutdown,
}

/// Background worker that drains submitted [`Deferred`] queues.
#[derive(Debug)]
pub struct TaskRunner {
    tx: mpsc::UnboundedSender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Run(task) => f.debug_tuple("Run").field(task).finish(),
            Message::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl TaskRunner {
    /// Spawn the worker on the current runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(work(rx));
        Self { tx, worker: Mutex::new(Some(worker)) }
    }

    /// Hand a request's queue to the worker. Returns the number of tasks
    /// accepted; tasks submitted after shutdown are dropped.
    pub fn submit(&self, deferred: Deferred) -> usize {
        let mut accepted = 0;
        for task in deferred.into_tasks() {
            match self.tx.send(Message::Run(task)) {
                Ok(()) => accepted += 1,
                Err(mpsc::error::SendError(message)) => {
                    if let Message::Run(task) = message {
                        tracing::warn!(kind = %task.kind, label = %task.label, "task runner stopped, dropping task");
                    }
                }
            }
        }
        accepted
    }

    /// Stop accepting tasks and wait for the in-flight ones to finish.
    pub async fn shutdown(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        let _ = self.tx.send(Message::Shutdown);
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "task runner worker aborted");
        }
        tracing::info!("task runner stopped");
    }
}

async fn work(mut rx: mpsc::UnboundedReceiver<Message>) {
    let mut running: JoinSet<Result<(), Error>> = JoinSet::new();
    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(Message::Run(task)) => {
                    running.spawn(task.run());
                }
                Some(Message::Shutdown) | None => break,
            },
            Some(joined) = running.join_next(), if !running.is_empty() => reap(joined),
        }
    }

    rx.close();
    while let Ok(message) = rx.try_recv() {
        if let Message::Run(task) = message {
            running.spawn(task.run());
        }
    }
    while let Some(joined) = running.join_next().await {
        reap(joined);
    }
}

fn reap(joined: Result<Result<(), Error>, JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "background task panicked");
        } else {
            tracing::warn!(error = %e, "background task cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(kind: TaskKind, counter: &Arc<AtomicUsize>) -> BackgroundTask {
        let counter = counter.clone();
        BackgroundTask::new(kind, "count", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_deferred_counts_by_kind() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut deferred = Deferred::new();
        deferred.schedule(counting(TaskKind::Refresh, &counter));
        deferred.schedule(counting(TaskKind::RecordCall, &counter));

        assert_eq!(deferred.len(), 2);
        assert_eq!(deferred.count(TaskKind::Refresh), 1);
        assert_eq!(deferred.count(TaskKind::CacheWrite), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_inline_isolates_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut deferred = Deferred::new();
        deferred.schedule(counting(TaskKind::Persist, &counter));
        deferred.schedule(BackgroundTask::new(TaskKind::Persist, "boom", async {
            Err(Error::TaskFailed("boom".into()))
        }));
        deferred.schedule(counting(TaskKind::Persist, &counter));

        assert_eq!(deferred.run_inline().await, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_runner_survives_panics_and_drains_on_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        let runner = TaskRunner::spawn();

        let mut deferred = Deferred::new();
        deferred.schedule(BackgroundTask::new(TaskKind::Refresh, "panics", async {
            if true {
                panic!("task blew up");
            }
            Ok(())
        }));
        for _ in 0..5 {
            deferred.schedule(counting(TaskKind::Invalidate, &counter));
        }
        assert_eq!(runner.submit(deferred), 6);

        runner.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_dropped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let runner = TaskRunner::spawn();
        runner.shutdown().await;

        let mut deferred = Deferred::new();
        deferred.schedule(counting(TaskKind::Persist, &counter));
        assert_eq!(runner.submit(deferred), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
