//! Health snapshot streaming.
//!
//! The state manager composes a health snapshot on every broadcast and hands
//! it to the streamer, which fans it out to subscribers. Subscribers observe
//! latest-wins semantics: a slow consumer sees the newest snapshot, not
//! every intermediate one.

use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tabletd_topology::{TabletAlias, TabletType, Target};

use crate::error::{StateError, StateResult};

/// Replication observations attached to a health snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeStats {
    /// Replication lag behind the primary. Zero on a primary.
    pub replication_lag: Duration,

    /// The error that made the tablet unhealthy, if any.
    pub health_error: Option<String>,
}

/// One health snapshot published to stream subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHealthEvent {
    /// The identity the tablet serves under.
    pub target: Target,

    /// The identity of the tablet process.
    pub tablet_alias: TabletAlias,

    /// Whether the tablet is serving.
    pub serving: bool,

    /// The externally-reparented timestamp of the current role.
    pub ter_timestamp: SystemTime,

    /// Replication observations.
    pub realtime_stats: RealtimeStats,
}

/// Fans health snapshots out to streaming subscribers.
pub struct HealthStreamer {
    alias: TabletAlias,
    target: Mutex<Target>,
    latest: watch::Sender<Option<StreamHealthEvent>>,
    shutdown: CancellationToken,
}

impl HealthStreamer {
    /// Create a new streamer for the given tablet.
    #[must_use]
    pub fn new(alias: TabletAlias) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            alias,
            target: Mutex::new(Target::default()),
            latest,
            shutdown: CancellationToken::new(),
        }
    }

    /// Record the keyspace/shard this tablet serves. Called once at startup.
    pub fn init_db_config(&self, target: Target) {
        *self.target.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = target;
    }

    /// Publish a new snapshot to all subscribers.
    pub fn change_state(
        &self,
        tablet_type: TabletType,
        ter_timestamp: SystemTime,
        replication_lag: Duration,
        health_error: Option<String>,
        serving: bool,
    ) {
        let mut target = self
            .target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        target.tablet_type = tablet_type;
        let event = StreamHealthEvent {
            target,
            tablet_alias: self.alias.clone(),
            serving,
            ter_timestamp,
            realtime_stats: RealtimeStats {
                replication_lag,
                health_error,
            },
        };
        debug!("Publishing health snapshot: serving={}", serving);
        self.latest.send_replace(Some(event));
    }

    /// Deliver snapshots to `callback` until the callback errors or the
    /// streamer shuts down. The newest snapshot, if any, is delivered
    /// immediately on subscription.
    pub async fn stream<F>(&self, mut callback: F) -> StateResult<()>
    where
        F: FnMut(&StreamHealthEvent) -> StateResult<()> + Send,
    {
        let mut rx = self.latest.subscribe();

        let current = rx.borrow().clone();
        if let Some(event) = current {
            callback(&event)?;
        }

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return Err(StateError::Shutdown),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(StateError::Shutdown);
                    }
                    let event = rx.borrow_and_update().clone();
                    if let Some(event) = event {
                        callback(&event)?;
                    }
                }
            }
        }
    }

    /// Shut the streamer down: every active and future `stream` call
    /// returns [`StateError::Shutdown`]. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_subscriber_sees_latest_snapshot() {
        let hs = Arc::new(HealthStreamer::new(TabletAlias::new("zone1", 1)));
        hs.init_db_config(Target::new("ks", "0", TabletType::Unknown));
        hs.change_state(
            TabletType::Replica,
            SystemTime::UNIX_EPOCH,
            Duration::from_secs(1),
            None,
            true,
        );

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let streamer = hs.clone();
        let handle = tokio::spawn(async move {
            streamer
                .stream(|event| {
                    tx.send(event.clone()).ok();
                    Ok(())
                })
                .await
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.target.tablet_type, TabletType::Replica);
        assert_eq!(event.target.keyspace, "ks");
        assert!(event.serving);
        assert_eq!(event.realtime_stats.replication_lag, Duration::from_secs(1));

        hs.close();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(&err, StateError::Shutdown));
        assert!(err.to_string().contains("tabletserver is shutdown"));
    }

    #[tokio::test]
    async fn test_stream_ends_on_callback_error() {
        let hs = HealthStreamer::new(TabletAlias::default());
        hs.change_state(
            TabletType::Primary,
            SystemTime::UNIX_EPOCH,
            Duration::ZERO,
            None,
            true,
        );

        let result = hs
            .stream(|_| Err(StateError::Internal("stop".into())))
            .await;
        assert!(matches!(result, Err(StateError::Internal(_))));
    }
}
