//! Process-wide tracking of background tasks so the binary can drain them on shutdown.

use std::future::Future;

use tokio_util::{sync::CancellationToken, task::TaskTracker};

#[derive(Debug, Clone, Default)]
struct BackgroundTasks {
    tracker: TaskTracker,
    token: CancellationToken,
}

static BACKGROUND_TASKS: once_cell::sync::Lazy<BackgroundTasks> =
    once_cell::sync::Lazy::new(BackgroundTasks::default);

/// Token cancelled once shutdown starts. Long running tasks should select on it.
pub fn shutdown_token() -> CancellationToken {
    BACKGROUND_TASKS.token.clone()
}

/// Spawn a tracked task on the current tokio runtime.
pub fn spawn<F>(fut: F)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    BACKGROUND_TASKS.tracker.spawn(fut);
}

/// Signal shutdown and wait until every tracked task has finished.
pub async fn cancel_tasks_and_wait_for_completion() {
    BACKGROUND_TASKS.token.cancel();
    BACKGROUND_TASKS.tracker.close();
    BACKGROUND_TASKS.tracker.wait().await;
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn test_spawned_task_runs() {
        let done = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = tokio::sync::oneshot::channel();
        let flag = done.clone();
        super::spawn(async move {
            flag.store(true, Ordering::SeqCst);
            let _ = sender.send(());
        });
        receiver.await.unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert!(!super::shutdown_token().is_cancelled());
    }
}
