//! Long-lived event watch with reconnect
//!
//! One watch per cluster over core/v1 Events. Each received event is
//! forwarded into a channel the scheduler drains. The apiserver ends watch
//! calls periodically, so the stream is re-established in a loop; failures
//! back off exponentially up to a cap and reset after a healthy stream.

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Event;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Bounded exponential backoff for watch reconnects
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt; doubles up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Watches cluster events and forwards them until the receiver closes
pub struct EventWatcher {
    api: Api<Event>,
    tx: mpsc::Sender<Event>,
    backoff: Backoff,
}

impl EventWatcher {
    pub fn new(client: Client, tx: mpsc::Sender<Event>) -> Self {
        Self {
            api: Api::all(client),
            tx,
            backoff: Backoff::default(),
        }
    }

    /// Run the watch loop. Returns when the scheduler side hangs up.
    pub async fn run(mut self) {
        // The apiserver caps watch calls at roughly five minutes; staying
        // under that keeps every disconnect on the clean path.
        let params = WatchParams::default().timeout(290);
        let mut resource_version = "0".to_string();

        loop {
            let stream = match self.api.watch(&params, &resource_version).await {
                Ok(s) => s,
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(error = %e, ?delay, "event watch failed; backing off");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            debug!(resource_version, "event watch established");
            let mut stream = stream.boxed();
            let mut received = 0usize;

            loop {
                match stream.try_next().await {
                    Ok(Some(WatchEvent::Added(event) | WatchEvent::Modified(event))) => {
                        received += 1;
                        if let Some(rv) = &event.metadata.resource_version {
                            resource_version = rv.clone();
                        }
                        trace!(
                            name = event.metadata.name.as_deref().unwrap_or(""),
                            reason = event.reason.as_deref().unwrap_or(""),
                            "event received"
                        );
                        if self.tx.send(event).await.is_err() {
                            debug!("event receiver closed; stopping watch");
                            return;
                        }
                    }
                    Ok(Some(WatchEvent::Deleted(_))) => {}
                    Ok(Some(WatchEvent::Bookmark(bookmark))) => {
                        resource_version = bookmark.metadata.resource_version.clone();
                    }
                    Ok(Some(WatchEvent::Error(status))) => {
                        // 410 Gone: our resource version expired; restart
                        // from the current state.
                        if status.code == 410 {
                            resource_version = "0".to_string();
                        }
                        warn!(code = status.code, message = %status.message, "watch error");
                        break;
                    }
                    Ok(None) => {
                        trace!("watch window ended");
                        break;
                    }
                    Err(e) => {
                        let delay = self.backoff.next_delay();
                        warn!(error = %e, ?delay, "event stream broke; backing off");
                        tokio::time::sleep(delay).await;
                        break;
                    }
                }
            }

            if received > 0 {
                self.backoff.reset();
            }
        }
    }
}
