//! Relay shutdown.
//!
//! The serving loops each hold a receiver; `trigger` tells them to stop
//! accepting and drain. Beacon tasks already spawned are not tracked here.

use std::future::Future;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Broadcasts the stop request to every serving loop.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Receiver for one serving loop, as taken by `HttpServer::run`.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Ask every serving loop to stop. Returns how many were told.
    pub fn trigger(&self) -> usize {
        match self.tx.send(()) {
            Ok(listeners) => {
                tracing::info!(listeners, "Draining in-flight requests");
                listeners
            }
            Err(_) => {
                tracing::debug!("Shutdown requested with no server running");
                0
            }
        }
    }

    /// Trigger once `signal` resolves, e.g. `wait_for_signal()`.
    pub fn trigger_on<F>(&self, signal: F) -> JoinHandle<usize>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.clone();
        tokio::spawn(async move {
            signal.await;
            shutdown.trigger()
        })
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
