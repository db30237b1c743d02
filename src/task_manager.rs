//! Manages the lifecycle of all spawned tasks in the application.
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Handles = Vec<(&'static str, JoinHandle<()>)>;

/// A centralized manager for all spawned tasks.
///
/// Every long-running component (log pollers, dispatcher, servers) is spawned
/// through here so shutdown can wait on all of them, and abort whatever is
/// still running once the grace period is over.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Handles>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    /// Spawns a new task and adds its handle to the manager.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    /// Returns a clone of the shutdown receiver.
    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Number of tasks spawned and not yet collected by `shutdown`.
    pub fn len(&self) -> usize {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits up to `grace` for all managed tasks to finish, then aborts the
    /// rest.
    ///
    /// Returns the names of the tasks that had to be aborted.
    pub async fn shutdown(self, grace: Duration) -> Vec<&'static str> {
        let handles: Handles = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        info!(
            "TaskManager shutting down. Waiting for {} tasks to complete...",
            handles.len()
        );

        let task_names: Vec<&'static str> = handles.iter().map(|(name, _)| *name).collect();
        debug!(tasks = ?task_names, "Awaiting all tasks.");

        let abort_handles: Vec<_> = handles.iter().map(|(_, h)| h.abort_handle()).collect();
        let joined = tokio::time::timeout(
            grace,
            join_all(handles.into_iter().map(|(_, handle)| handle)),
        )
        .await;

        let results = match joined {
            Ok(results) => results,
            Err(_) => {
                let stragglers: Vec<&'static str> = task_names
                    .iter()
                    .zip(&abort_handles)
                    .filter(|(_, handle)| !handle.is_finished())
                    .map(|(name, _)| *name)
                    .collect();
                warn!(
                    tasks = ?stragglers,
                    "Grace period of {:?} elapsed. Aborting remaining tasks.", grace
                );
                for handle in &abort_handles {
                    handle.abort();
                }
                return stragglers;
            }
        };

        let mut panics = Vec::new();
        for (task_name, result) in task_names.iter().zip(results) {
            match result {
                Ok(()) => debug!(task_name, "Task shut down gracefully."),
                Err(e) => {
                    error!(task_name, "Task panicked during shutdown.");
                    panics.push((*task_name, e));
                }
            }
        }

        if panics.is_empty() {
            info!("All tasks shut down gracefully.");
        } else {
            error!("{} tasks panicked during shutdown: {:?}", panics.len(), panics);
        }
        Vec::new()
    }
}
