//! `Task` — a cancellable, cooperative unit of execution with ordering
//! dependencies.
//!
//! A task wraps whatever future a store spawns to run a request body. It
//! carries a monotonic identity, a small config record (name + context,
//! matching the shape of the teacher's per-record metadata), cooperative
//! cancellation via [`tokio_util::sync::CancellationToken`] (the exact
//! primitive the teacher's `CancellationManager` uses in
//! `server/cancellation.rs`), and a short list of prerequisite tasks that
//! must finish (or be cancelled) before this one's body begins.

use crate::context::Context;
use crate::subscription::Subscription;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A monotonically assigned task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A task's name and the context snapshot it was scheduled with.
#[derive(Clone)]
pub struct TaskConfig {
    /// A human-readable name, defaulted by each request specialization's
    /// helper (`spec.md` §4.6, "Task name defaulting") if the caller
    /// didn't set one.
    pub name: Option<String>,
    /// The context this task runs under.
    pub context: Context,
}

impl TaskConfig {
    /// Build a config with no name set.
    pub fn new(context: Context) -> Self {
        Self {
            name: None,
            context,
        }
    }

    /// Set the name if it is not already set.
    pub fn default_name(mut self, name: impl Into<String>) -> Self {
        if self.name.is_none() {
            self.name = Some(name.into());
        }
        self
    }
}

/// A task's externally observable execution state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState<V, E> {
    /// The task has been registered but its body has not started
    /// (waiting on prerequisites, if any).
    NotRun,
    /// The body is currently executing.
    Running,
    /// The body returned a result.
    Finished(Result<V, E>),
    /// The task was cancelled before its body produced a result. Terminal,
    /// like `Finished`, but carries no `Result` — cancellation is not a
    /// `Failure` value the request itself chose to return (`spec.md` §5:
    /// "the base is required to surface cooperative-cancel itself"; this
    /// variant only covers the wrapper-level race where the body never
    /// got the chance).
    Cancelled,
}

impl<V, E> ExecutionState<V, E> {
    /// `true` for `Finished` or `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Cancelled)
    }
}

/// Signals used by waiters (dependents, and external `wait()` callers)
/// to learn a task has finished, without caring about its result type —
/// this is what lets a prerequisite list hold tasks of unrelated `V`/`E`
/// (e.g. a `NextPage` task depending on an `InitialPage` task of a
/// different wire shape).
pub trait TaskDependency: Send + Sync {
    /// Await until this dependency is finished (successfully, with an
    /// error, or because it was cancelled). Never returns before that.
    fn wait(&self) -> futures::future::BoxFuture<'_, ()>;

    /// `true` if already finished.
    fn is_finished(&self) -> bool;
}

struct Completion {
    finished: std::sync::atomic::AtomicBool,
    notify: Notify,
}

impl Completion {
    fn new() -> Self {
        Self {
            finished: std::sync::atomic::AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn wait(&self) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        let notified = self.notify.notified();
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

/// What a running request body is given so it can observe cooperative
/// cancellation at its own await points, per `spec.md` §5: "every await
/// point is a cancellation opportunity" and "the base must surface
/// cancel" rather than have it synthesized for it.
#[derive(Clone)]
pub struct Isolation {
    token: CancellationToken,
}

impl Isolation {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Build an isolation handle directly from a cancellation token, for
    /// request bodies driven outside a [`Task`] (the deduplication
    /// modifier's detached executions have their own lifetime, tied to
    /// the last interested waiter rather than to any single `Task`).
    pub(crate) fn from_token(token: CancellationToken) -> Self {
        Self::new(token)
    }

    /// `true` if the owning task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the owning task is cancelled. Race this against any
    /// suspension point (a delayer sleep, a channel recv) with
    /// `tokio::select!` to make that point a cancellation opportunity.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// A cancellable unit of execution with an identity, a configuration, and
/// ordering dependencies on other tasks.
pub struct Task<V, E> {
    id: TaskId,
    config: TaskConfig,
    deps: Vec<Arc<dyn TaskDependency>>,
    cancel_token: CancellationToken,
    completion: Arc<Completion>,
    state: Mutex<ExecutionState<V, E>>,
}

impl<V, E> TaskDependency for Task<V, E>
where
    V: Send + Sync,
    E: Send + Sync,
{
    fn wait(&self) -> futures::future::BoxFuture<'_, ()> {
        Box::pin(self.completion.wait())
    }

    fn is_finished(&self) -> bool {
        self.completion.finished.load(Ordering::SeqCst)
    }
}

impl<V: Clone + Send + Sync + 'static, E: Clone + Send + Sync + 'static> Task<V, E> {
    /// Register a new task with the given config and prerequisite
    /// dependencies. The body has not been started; call
    /// [`Task::run_if_needed`] (typically from within the store) to drive
    /// it.
    pub fn new(config: TaskConfig, deps: Vec<Arc<dyn TaskDependency>>) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::next(),
            config,
            deps,
            cancel_token: CancellationToken::new(),
            completion: Arc::new(Completion::new()),
            state: Mutex::new(ExecutionState::NotRun),
        })
    }

    /// This task's identity.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// This task's config (name + the context it runs under).
    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// A snapshot of the current execution state.
    pub fn state(&self) -> ExecutionState<V, E> {
        self.state.lock().clone()
    }

    /// `true` while the body is queued or executing (not yet terminal).
    pub fn is_active(&self) -> bool {
        !self.state.lock().is_terminal()
    }

    /// The cooperative-cancel handle to give the request body running
    /// under this task.
    pub fn isolation(&self) -> Isolation {
        Isolation::new(self.cancel_token.clone())
    }

    /// A subscription whose cancellation cancels this task.
    pub fn subscription(self: &Arc<Self>) -> Subscription {
        let this = self.clone();
        Subscription::new(move || this.cancel())
    }

    /// Cancel this task. Idempotent; wakes every await point in the
    /// running body cooperatively via the cancellation token.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// `true` once [`Task::cancel`] has been called.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Await all prerequisite tasks (cancellation of a prerequisite does
    /// not cancel `self`; a cancelled prerequisite is simply treated as
    /// complete), then run `body` to completion, recording its result.
    ///
    /// Returns `None` if the task was cancelled before `body` produced a
    /// result (the wrapper-level race, not the body's own cooperative
    /// surfacing of cancellation — a well-behaved body races its own
    /// suspension points against [`Task::isolation`] and returns its own
    /// `Failure` long before this would trigger).
    pub async fn run_if_needed<F>(self: Arc<Self>, body: F) -> Option<Result<V, E>>
    where
        F: Future<Output = Result<V, E>> + Send,
    {
        {
            let mut state = self.state.lock();
            match &*state {
                ExecutionState::Finished(result) => return Some(result.clone()),
                ExecutionState::Cancelled => return None,
                ExecutionState::NotRun | ExecutionState::Running => {}
            }
            *state = ExecutionState::Running;
        }

        for dep in &self.deps {
            dep.wait().await;
        }

        if self.cancel_token.is_cancelled() {
            *self.state.lock() = ExecutionState::Cancelled;
            self.completion.mark_finished();
            return None;
        }

        tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => {
                *self.state.lock() = ExecutionState::Cancelled;
                self.completion.mark_finished();
                None
            }
            result = body => {
                *self.state.lock() = ExecutionState::Finished(result.clone());
                self.completion.mark_finished();
                Some(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_body_and_records_result() {
        let task: Arc<Task<i32, String>> = Task::new(TaskConfig::new(Context::new()), vec![]);
        let result = task.clone().run_if_needed(async { Ok(42) }).await;
        assert_eq!(result, Some(Ok(42)));
        assert_eq!(task.state(), ExecutionState::Finished(Ok(42)));
        assert!(!task.is_active());
    }

    #[tokio::test]
    async fn waits_for_dependencies_before_running() {
        let dep: Arc<Task<i32, String>> = Task::new(TaskConfig::new(Context::new()), vec![]);
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_dep = order.clone();
        let dep_clone = dep.clone();
        let dep_run = tokio::spawn(async move {
            dep_clone
                .run_if_needed(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    order_dep.lock().push("dep");
                    Ok::<i32, String>(1)
                })
                .await
        });

        let dependent: Arc<Task<i32, String>> =
            Task::new(TaskConfig::new(Context::new()), vec![dep.clone()]);
        let order_dependent = order.clone();
        let result = dependent
            .run_if_needed(async move {
                order_dependent.lock().push("dependent");
                Ok(2)
            })
            .await;

        dep_run.await.unwrap();
        assert_eq!(result, Some(Ok(2)));
        assert_eq!(*order.lock(), vec!["dep", "dependent"]);
    }

    #[tokio::test]
    async fn cancelled_dependency_unblocks_dependent() {
        let dep: Arc<Task<i32, String>> = Task::new(TaskConfig::new(Context::new()), vec![]);
        let dep_clone = dep.clone();
        let dep_handle = tokio::spawn(async move {
            dep_clone
                .run_if_needed(async {
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    Ok::<i32, String>(1)
                })
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        dep.cancel();
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), dep_handle)
            .await
            .expect("dependency task should unblock promptly on cancel");
        assert_eq!(outcome.unwrap(), None);

        let dependent: Arc<Task<i32, String>> =
            Task::new(TaskConfig::new(Context::new()), vec![dep.clone()]);
        let finished = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            dependent.run_if_needed(async { Ok(2) }),
        )
        .await;
        assert_eq!(finished.unwrap(), Some(Ok(2)));
    }

    #[tokio::test]
    async fn cancel_before_dependencies_resolve_skips_body() {
        let task: Arc<Task<i32, String>> = Task::new(TaskConfig::new(Context::new()), vec![]);
        task.cancel();
        let result = task
            .clone()
            .run_if_needed(async { panic!("body should not run once pre-cancelled") })
            .await;
        assert_eq!(result, None);
        assert_eq!(task.state(), ExecutionState::Cancelled);
    }
}
