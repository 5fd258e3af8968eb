//! Background keepalive loop.

use std::time::Duration;

use saker_wire::Message;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::remote::Remote;

/// Default keepalive period: 30 seconds.
pub const DEFAULT_KEEPALIVE_PERIOD: Duration = Duration::from_millis(30_000);

/// Periodically enqueues a `KeepAlive` to a set of peers.
///
/// The monitor never declares a peer dead: dead-peer detection is the
/// transport's job (a faulted connection surfaces as a disconnect). A peer
/// whose queue is already gone is simply skipped.
pub struct KeepaliveMonitor {
    handle: JoinHandle<()>,
}

impl KeepaliveMonitor {
    /// Spawn the loop. A zero `period` disables keepalive entirely: no task
    /// is started and `None` is returned.
    ///
    /// `targets` is re-evaluated every tick, so a registry snapshot function
    /// always pings the current set of peers.
    pub fn spawn<F>(period: Duration, targets: F) -> Option<Self>
    where
        F: Fn() -> Vec<Remote> + Send + 'static,
    {
        if period.is_zero() {
            return None;
        }
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the first keepalive should
            // go out one full period after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let peers = targets();
                trace!(peers = peers.len(), "keepalive tick");
                for remote in peers {
                    let _ = remote.send(Message::KeepAlive);
                }
            }
        });
        Some(Self { handle })
    }

    /// Stop the loop without waiting for it. Idempotent; a no-op if the task
    /// already finished.
    pub fn stop(&self) {
        self.handle.abort();
    }

    /// Stop the loop and wait for the task to terminate.
    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}
