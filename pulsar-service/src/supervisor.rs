//! Lifecycle of the background consumers
//!
//! The supervisor owns the process-wide shutdown signal. Every background task
//! gets a [`ShutdownSignal`] and is joined when the supervisor shuts down.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::ServiceResult;

/// Receiving side of the shutdown signal, cloned into every loop
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown was requested or the supervisor is gone
    pub async fn triggered(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Sending side of the shutdown signal. Triggering more than once is a no-op.
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        if !self.sender.send_replace(true) {
            info!("Shutdown requested");
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

pub struct Supervisor {
    handle: ShutdownHandle,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            handle: ShutdownHandle {
                sender: Arc::new(sender),
            },
            tasks: Vec::new(),
        }
    }

    pub fn handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.handle.signal()
    }

    /// Spawn a background task. Its outcome only ever shows up in the logs.
    pub fn spawn<F>(&mut self, name: &str, task: F)
    where
        F: Future<Output = ServiceResult<()>> + Send + 'static,
    {
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            match task.await {
                Ok(()) => info!(task = %task_name, "Background task finished"),
                Err(e) => error!(task = %task_name, "Background task failed: {}", e),
            }
        });

        info!(task = %name, "Background task started");
        self.tasks.push((name.to_string(), handle));
    }

    /// Trigger shutdown and wait for every task to exit.
    ///
    /// Tasks still running after `grace` are aborted. Returns `true` when all
    /// of them stopped on their own.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.handle.trigger();

        let deadline = Instant::now() + grace;
        let mut clean = true;

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(task = %name, "Background task panicked: {}", e);
                    clean = false;
                }
                Err(_) => {
                    warn!(
                        task = %name,
                        "Background task did not stop within {:?}, aborting", grace
                    );
                    handle.abort();
                    // Wait for the cancelled task to be dropped
                    let _ = handle.await;
                    clean = false;
                }
            }
        }

        info!("All background tasks stopped");
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_reaches_every_task() {
        let mut supervisor = Supervisor::new();
        for name in ["first", "second"] {
            let mut signal = supervisor.signal();
            supervisor.spawn(name, async move {
                signal.triggered().await;
                Ok(())
            });
        }

        assert!(supervisor.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_trigger_is_idempotent() {
        let supervisor = Supervisor::new();
        let handle = supervisor.handle();
        let signal = supervisor.signal();

        handle.trigger();
        handle.trigger();

        assert!(signal.is_triggered());
        assert!(supervisor.shutdown(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_stuck_task_is_aborted() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("stuck", async {
            futures::future::pending::<()>().await;
            Ok(())
        });

        assert!(!supervisor.shutdown(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_dropped_supervisor_counts_as_shutdown() {
        let supervisor = Supervisor::new();
        let mut signal = supervisor.signal();
        drop(supervisor);

        tokio::time::timeout(Duration::from_secs(1), signal.triggered())
            .await
            .unwrap();
    }
}
