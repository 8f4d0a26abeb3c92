//! Background liveness monitor.
//!
//! A low-frequency loop that re-runs the authentication detector and
//! refreshes the chat cache. On an Authenticated → gone transition the
//! detector persists the cleared session record before the next
//! foreground call is served, and the shared `connected` flag flips so
//! status reads fail fast instead of reporting a stale "connected".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use wabridge_core::AuthState;
use wabridge_scraper::AuthDetector;

use crate::live::LiveSession;

pub struct MonitorHandle {
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop and wait for it to drain.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Monitor task ended abnormally");
            }
        }
        info!("Background monitor stopped");
    }
}

pub fn spawn_monitor(
    live: Arc<Mutex<Option<LiveSession>>>,
    detector: Arc<AuthDetector>,
    connected: Arc<AtomicBool>,
    interval: Duration,
) -> MonitorHandle {
    let (shutdown, mut shutdown_rx) = broadcast::channel(1);

    let task = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Background monitor started");
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh session
        // is not probed twice in a row.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {}
            }

            // Same serialization boundary as every foreground operation.
            let mut guard = live.lock().await;
            let Some(session) = guard.as_mut() else {
                continue;
            };

            match detector.check(&session.browser, false).await {
                Ok((AuthState::Authenticated, _)) => {
                    connected.store(true, Ordering::SeqCst);
                    // Refresh the sidebar so unread counts and new chats
                    // are visible to the next foreground read.
                    if let Err(e) = session.cache.scan(&session.browser).await {
                        debug!(error = %e, "Monitor chat scan failed");
                    }
                }
                Ok((AuthState::Loading, _)) => {
                    // Transient; leave the flag as-is.
                }
                Ok((state, _)) => {
                    if connected.swap(false, Ordering::SeqCst) {
                        warn!(?state, "Monitor observed authentication loss");
                    }
                    session.cache.invalidate();
                }
                Err(e) => {
                    // Fail closed: a document we cannot probe is not a
                    // document we are connected to.
                    connected.store(false, Ordering::SeqCst);
                    warn!(error = %e, "Monitor authentication check failed");
                }
            }
        }
    });

    MonitorHandle { shutdown, task }
}
