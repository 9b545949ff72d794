//! Route-change integration for single-page applications.
//!
//! History API and hash changes do not reload the document, so the snapshot is
//! not recaptured automatically. The watcher only marks it as needing a
//! reindex; the next resolution decides when to recapture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::select;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events;

/// Route notifications forwarded by the driver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteEvent {
    PushState { url: String },
    ReplaceState { url: String },
    PopState { url: String },
    HashChange { url: String },
    /// A real navigation; the document itself is replaced.
    FullNavigation { url: String },
}

impl RouteEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RouteEvent::PushState { .. } => "push_state",
            RouteEvent::ReplaceState { .. } => "replace_state",
            RouteEvent::PopState { .. } => "pop_state",
            RouteEvent::HashChange { .. } => "hash_change",
            RouteEvent::FullNavigation { .. } => "full_navigation",
        }
    }

    pub fn url(&self) -> &str {
        match self {
            RouteEvent::PushState { url }
            | RouteEvent::ReplaceState { url }
            | RouteEvent::PopState { url }
            | RouteEvent::HashChange { url }
            | RouteEvent::FullNavigation { url } => url,
        }
    }
}

/// Idempotent "needs reindex" marker. Any number of marks collapse into one
/// pending flag until it is taken.
#[derive(Clone, Debug, Default)]
pub struct ReindexFlag {
    pending: Arc<AtomicBool>,
}

impl ReindexFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when this call raised the flag.
    pub fn mark(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Clears the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

/// Sender half handed to whatever observes the page's history API.
pub type RouteEventSender = broadcast::Sender<RouteEvent>;

pub fn route_channel(capacity: usize) -> (RouteEventSender, broadcast::Receiver<RouteEvent>) {
    broadcast::channel(capacity.max(1))
}

/// Background listener that turns route events into reindex marks.
pub struct RouteWatcher {
    flag: ReindexFlag,
    task: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl RouteWatcher {
    pub fn new(flag: ReindexFlag) -> Self {
        Self {
            flag,
            task: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn flag(&self) -> &ReindexFlag {
        &self.flag
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Starts listening on `sender`. A previous listener is replaced.
    pub fn start(&mut self, sender: &RouteEventSender) {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }

        let flag = self.flag.clone();
        let shutdown = self.shutdown.clone();
        let mut rx = sender.subscribe();

        self.task = Some(tokio::spawn(async move {
            debug!(target: "perceiver.events", "structural.route.watcher_started");
            loop {
                select! {
                    _ = shutdown.cancelled() => break,
                    event = rx.recv() => {
                        match event {
                            Ok(event) => Self::handle_event(&event, &flag),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                // missed events still mean the route moved
                                warn!(target: "perceiver.events", skipped, "route watcher lagged");
                                let newly = flag.mark();
                                events::emit_reindex("lagged", newly);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            debug!(target: "perceiver.events", "structural.route.watcher_stopped");
        }));
    }

    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.task.take() {
            let _ = handle.await;
        }
    }

    fn handle_event(event: &RouteEvent, flag: &ReindexFlag) {
        let newly = flag.mark();
        events::emit_reindex(event.kind(), newly);
    }
}

impl Drop for RouteWatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    #[test]
    fn duplicate_marks_collapse() {
        let flag = ReindexFlag::new();
        assert!(flag.mark());
        assert!(!flag.mark());
        assert!(flag.is_pending());
        assert!(flag.take());
        assert!(!flag.take());
        assert!(!flag.is_pending());
    }

    #[tokio::test]
    async fn route_events_mark_reindex() {
        let (tx, _rx) = route_channel(8);
        let mut watcher = RouteWatcher::new(ReindexFlag::new());
        watcher.start(&tx);

        for url in ["/a", "/b", "/b#details"] {
            let _ = tx.send(RouteEvent::PushState { url: url.into() });
        }
        sleep(Duration::from_millis(50)).await;

        assert!(watcher.flag().is_pending());
        assert!(watcher.flag().take());
        assert!(!watcher.flag().is_pending());

        let _ = tx.send(RouteEvent::HashChange {
            url: "/b#more".into(),
        });
        sleep(Duration::from_millis(50)).await;
        assert!(watcher.flag().take());

        watcher.stop().await;
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn stops_cleanly_without_events() {
        let (tx, _rx) = route_channel(4);
        let mut watcher = RouteWatcher::new(ReindexFlag::new());
        watcher.start(&tx);
        assert!(watcher.is_running());
        watcher.stop().await;
        assert!(!watcher.flag().is_pending());
    }
}
