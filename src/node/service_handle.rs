use anyhow::Result;
use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Holds running tasks and the shutdown channel for the controller.
/// Call `shutdown()` to gracefully stop services.
pub struct ServiceHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handles: Vec<(&'static str, JoinHandle<anyhow::Result<()>>)>,
}

impl ServiceHandle {
    /// Create a new ServiceHandle and return it together with a Receiver clonable by tasks.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let handle = ServiceHandle {
            shutdown_tx: tx,
            join_handles: vec![],
        };
        (handle, rx)
    }

    /// Spawn a named background task that is awaited on shutdown.
    pub fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.join_handles.push((name, tokio::spawn(fut)));
    }

    /// Signal shutdown to all tasks and await them sequentially.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        for (name, h) in self.join_handles {
            match h.await {
                Ok(Ok(())) => tracing::debug!("{} stopped", name),
                Ok(Err(e)) => tracing::error!("{} returned error: {:?}", name, e),
                Err(e) => tracing::error!("{} join error: {:?}", name, e),
            }
        }
        Ok(())
    }

    /// Return a cloneable shutdown receiver for tasks that need to observe shutdown state.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn task_count(&self) -> usize {
        self.join_handles.len()
    }
}
