//! The tablet state manager.
//!
//! The state manager is the only component that mutates the tablet's
//! lifecycle. External orchestrators request a (tablet type, serving state)
//! pair; the manager validates it, records it as the desired state, and
//! drives the subsystems there through the orchestrator. A failed
//! transition is retried toward the latest desired state until it lands.
//!
//! Two locks guard the manager, always taken in this order:
//! - `transitioning`: a one-permit semaphore held for the whole duration of
//!   a transition, including the request drain and every subsystem call. A
//!   semaphore rather than a mutex so it can be released from one task and
//!   acquired from another.
//! - `state`: a short-critical-section mutex over the desired/current state
//!   fields. Never held across subsystem calls, with the single exception
//!   of the replication health refresh.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tabletd_subsystem::{
    QueryEngine, ReplTracker, SchemaEngine, Subcomponent, Throttler, TxEngine,
};
use tabletd_topology::{TabletAlias, TabletType, Target};

use crate::config::StateManagerConfig;
use crate::error::{StateError, StateResult};
use crate::health::HealthStreamer;
use crate::orchestrator::{self, RequiredSet};
use crate::types::{RequestContext, ServingState, StateManagerStatus};

/// The subsystems the state manager drives. Each is owned exclusively by
/// the manager: no other code path may open, close, or mode-switch them.
pub struct Subsystems {
    /// Schema engine.
    pub schema_engine: Arc<dyn SchemaEngine>,

    /// Replication tracker.
    pub repl_tracker: Arc<dyn ReplTracker>,

    /// Change-event streamer.
    pub vstreamer: Arc<dyn Subcomponent>,

    /// Table tracker (primary only).
    pub table_tracker: Arc<dyn Subcomponent>,

    /// Schema-change watcher (non-primary only).
    pub schema_watcher: Arc<dyn Subcomponent>,

    /// Query engine.
    pub query_engine: Arc<dyn QueryEngine>,

    /// Transaction engine.
    pub tx_engine: Arc<dyn TxEngine>,

    /// Transaction throttler.
    pub tx_throttler: Arc<dyn Throttler>,

    /// Replication-lag throttler (primary only).
    pub lag_throttler: Arc<dyn Throttler>,

    /// Message engine (primary only).
    pub messager: Arc<dyn Subcomponent>,
}

/// Fields guarded by the state lock.
struct StateInner {
    target: Target,
    state: ServingState,
    want_tablet_type: TabletType,
    want_state: ServingState,
    also_allow: Vec<TabletType>,
    ter_timestamp: SystemTime,
    reason: String,
    lameduck: bool,
    repl_healthy: bool,
    retrying: bool,
    transition_error: Option<String>,
    retry_task: Option<JoinHandle<()>>,
    grace_task: Option<JoinHandle<()>>,
    ticker_task: Option<JoinHandle<()>>,
}

impl StateInner {
    fn is_serving(&self) -> bool {
        self.state == ServingState::Serving
            && self.want_state == ServingState::Serving
            && !self.lameduck
            && self.repl_healthy
    }
}

struct ManagerInner {
    config: StateManagerConfig,
    subsystems: Subsystems,
    health_streamer: Arc<HealthStreamer>,
    state: Mutex<StateInner>,
    transitioning: Semaphore,
    mysql_check: Arc<Semaphore>,
    requests: watch::Sender<usize>,
}

/// The tablet state manager. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct StateManager {
    inner: Arc<ManagerInner>,
}

impl StateManager {
    /// Create a new state manager in the `(Unknown, NotConnected)` state.
    ///
    /// `target` carries the keyspace and shard this tablet serves; its
    /// tablet type is ignored and starts as `Unknown`.
    #[must_use]
    pub fn new(
        config: StateManagerConfig,
        alias: TabletAlias,
        target: Target,
        subsystems: Subsystems,
    ) -> Self {
        let health_streamer = Arc::new(HealthStreamer::new(alias));
        health_streamer.init_db_config(target.clone());

        let (requests, _) = watch::channel(0);
        let state = StateInner {
            target: Target {
                tablet_type: TabletType::Unknown,
                ..target
            },
            state: ServingState::NotConnected,
            want_tablet_type: TabletType::Unknown,
            want_state: ServingState::NotConnected,
            also_allow: Vec::new(),
            ter_timestamp: SystemTime::UNIX_EPOCH,
            reason: String::new(),
            lameduck: false,
            repl_healthy: false,
            retrying: false,
            transition_error: None,
            retry_task: None,
            grace_task: None,
            ticker_task: None,
        };

        Self {
            inner: Arc::new(ManagerInner {
                config,
                subsystems,
                health_streamer,
                state: Mutex::new(state),
                transitioning: Semaphore::new(1),
                mysql_check: Arc::new(Semaphore::new(1)),
                requests,
            }),
        }
    }

    /// The health streamer subscribers attach to.
    #[must_use]
    pub fn health_streamer(&self) -> Arc<HealthStreamer> {
        self.inner.health_streamer.clone()
    }

    /// Record the desired (tablet type, serving state) pair and drive a
    /// transition toward it.
    ///
    /// Returns the error of the attempted transition; on a retriable
    /// failure the retry loop keeps driving toward the same desired state.
    /// A request equal to the current state with no retry pending returns
    /// success without touching the subsystems, though the
    /// externally-reparented timestamp is still recorded. Lameduck mode is
    /// exited on every call.
    pub async fn set_serving_type(
        &self,
        tablet_type: TabletType,
        ter_timestamp: SystemTime,
        state: ServingState,
        reason: &str,
    ) -> StateResult<()> {
        let result = self
            .transition_to(tablet_type, ter_timestamp, state, reason)
            .await;
        self.exit_lameduck().await;
        result
    }

    async fn transition_to(
        &self,
        tablet_type: TabletType,
        ter_timestamp: SystemTime,
        state: ServingState,
        reason: &str,
    ) -> StateResult<()> {
        let state = effective_state(tablet_type, state)?;
        info!(
            "State transition requested: {}/{} (reason: {})",
            tablet_type, state, reason
        );

        let must_transition = {
            let mut st = self.inner.state.lock().await;

            // Older timestamps for the same requested role are discarded.
            if tablet_type != st.want_tablet_type || ter_timestamp >= st.ter_timestamp {
                st.ter_timestamp = ter_timestamp;
            }
            st.want_tablet_type = tablet_type;
            st.want_state = state;
            st.reason = reason.to_string();

            self.start_broadcast_ticker_locked(&mut st);

            if st.target.tablet_type == tablet_type && st.state == state && !st.retrying {
                false
            } else {
                // A fresh request supersedes any pending retry timer.
                if let Some(task) = st.retry_task.take() {
                    task.abort();
                }
                st.retrying = false;
                true
            }
        };

        if !must_transition {
            return Ok(());
        }

        let result = self.exec_transition(tablet_type, state).await;
        if result.is_err() {
            self.retry_transition("transition failed").await;
        }
        result
    }

    /// Run one transition toward (`tablet_type`, `state`): acquire the
    /// transition lock, arm the grace window, drain requests, apply the
    /// orchestrator plan, record the outcome, broadcast.
    async fn exec_transition(
        &self,
        tablet_type: TabletType,
        state: ServingState,
    ) -> StateResult<()> {
        let Ok(_permit) = self.inner.transitioning.acquire().await else {
            return Err(StateError::Internal("transition lock closed".into()));
        };

        {
            let mut st = self.inner.state.lock().await;
            let previous = st.target.tablet_type;
            if previous != tablet_type
                && previous != TabletType::Unknown
                && !self.inner.config.transition_grace_period.is_zero()
            {
                st.also_allow = vec![previous];
                if let Some(task) = st.grace_task.take() {
                    task.abort();
                }
                let sm = self.clone();
                let grace = self.inner.config.transition_grace_period;
                st.grace_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    sm.inner.state.lock().await.also_allow.clear();
                }));
            }
        }

        self.wait_for_requests().await;

        let current = {
            let st = self.inner.state.lock().await;
            RequiredSet::new(st.target.tablet_type, st.state)
        };
        let plan = orchestrator::plan(current, RequiredSet::new(tablet_type, state));
        let result = orchestrator::execute(&self.inner.subsystems, &plan, tablet_type).await;

        {
            let mut st = self.inner.state.lock().await;
            match &result {
                Ok(()) => {
                    st.target.tablet_type = tablet_type;
                    st.state = state;
                    st.retrying = false;
                    st.transition_error = None;
                    info!("State transition complete: {}/{}", tablet_type, state);
                }
                Err(err) => {
                    st.transition_error = Some(err.to_string());
                    error!(
                        "State transition to {}/{} failed: {}",
                        tablet_type, state, err
                    );
                }
            }
        }

        drop(_permit);
        self.broadcast().await;
        result.map_err(StateError::from)
    }

    /// Start the retry loop toward the latest desired state. A no-op while
    /// a retry is already pending.
    pub async fn retry_transition(&self, reason: &str) {
        let mut st = self.inner.state.lock().await;
        if st.retrying {
            return;
        }
        st.retrying = true;

        let interval = self.inner.config.transition_retry_interval;
        warn!("Retrying transition every {:?}: {}", interval, reason);

        let sm = self.clone();
        st.retry_task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let (want_type, want_state) = {
                    let st = sm.inner.state.lock().await;
                    if !st.retrying {
                        return;
                    }
                    (st.want_tablet_type, st.want_state)
                };

                if want_state == ServingState::NotConnected {
                    // StopService owns that edge.
                    sm.inner.state.lock().await.retrying = false;
                    return;
                }

                if sm.exec_transition(want_type, want_state).await.is_ok() {
                    return;
                }
            }
        }));
    }

    /// Probe the database for liveness, out of band. On failure the tablet
    /// closes all subsystems and the retry loop drives it back toward the
    /// previously-desired state. Coalesced: returns immediately while a
    /// probe is already in flight.
    pub fn check_mysql(&self) {
        let Ok(permit) = self.inner.mysql_check.clone().try_acquire_owned() else {
            return;
        };

        let sm = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(err) = sm.inner.subsystems.query_engine.is_mysql_reachable().await {
                error!("Cannot connect to the database, shutting down query service: {}", err);
                sm.close_all().await;
                sm.retry_transition("database is unreachable").await;
            }
        });
    }

    /// Close every subsystem, preserving the tablet type. The desired state
    /// is left untouched so a retry can drive the tablet back.
    async fn close_all(&self) {
        let current_type = {
            let st = self.inner.state.lock().await;
            st.target.tablet_type
        };
        if let Err(err) = self
            .exec_transition(current_type, ServingState::NotConnected)
            .await
        {
            error!("Error closing subsystems: {}", err);
        }
    }

    /// Drive the tablet to `NotConnected`, close every subsystem, and shut
    /// the health stream down. The tablet type is preserved. Idempotent.
    /// Waits for in-flight requests up to the timebomb duration.
    pub async fn stop_service(&self) {
        let already_stopped = {
            let mut st = self.inner.state.lock().await;
            if st.state == ServingState::NotConnected
                && st.want_state == ServingState::NotConnected
            {
                true
            } else {
                st.want_tablet_type = st.target.tablet_type;
                st.want_state = ServingState::NotConnected;
                if let Some(task) = st.retry_task.take() {
                    task.abort();
                }
                st.retrying = false;
                if let Some(task) = st.ticker_task.take() {
                    task.abort();
                }
                false
            }
        };
        if !already_stopped {
            info!("Stopping the tablet state manager");
            self.close_all().await;
        }
        self.inner.health_streamer.close();
    }

    /// Admit a request addressed at `target`. On success the in-flight
    /// counter is incremented; the caller must pair this with
    /// [`end_request`](Self::end_request).
    ///
    /// `allow_on_shutdown` admits the request even while the tablet is
    /// draining toward a non-serving state, for internal work that runs
    /// during the drain itself.
    pub async fn start_request(
        &self,
        ctx: &RequestContext,
        target: Option<&Target>,
        allow_on_shutdown: bool,
    ) -> StateResult<()> {
        let st = self.inner.state.lock().await;

        if st.state != ServingState::Serving || !st.repl_healthy {
            return Err(StateError::NotAllowed("NOT_SERVING"));
        }
        if st.want_state != ServingState::Serving && !allow_on_shutdown {
            return Err(StateError::NotAllowed("SHUTTING_DOWN"));
        }
        verify_target_locked(&st, ctx, target)?;

        self.inner.requests.send_modify(|count| *count += 1);
        Ok(())
    }

    /// Release a request admitted by [`start_request`](Self::start_request).
    pub fn end_request(&self) {
        self.inner.requests.send_modify(|count| {
            if *count == 0 {
                warn!("EndRequest called with no request in flight");
            } else {
                *count -= 1;
            }
        });
    }

    /// Validate a request target without admitting the request.
    pub async fn verify_target(
        &self,
        ctx: &RequestContext,
        target: Option<&Target>,
    ) -> StateResult<()> {
        let st = self.inner.state.lock().await;
        verify_target_locked(&st, ctx, target)
    }

    /// Enter lameduck mode: report `NOT_SERVING` upstream while still
    /// serving, to drain load balancers ahead of a real transition.
    pub async fn enter_lameduck(&self) {
        info!("Entering lameduck mode");
        self.inner.state.lock().await.lameduck = true;
    }

    /// Leave lameduck mode.
    pub async fn exit_lameduck(&self) {
        self.inner.state.lock().await.lameduck = false;
    }

    /// Refresh replication health and publish a health snapshot to all
    /// stream subscribers.
    pub async fn broadcast(&self) {
        let mut st = self.inner.state.lock().await;
        let (lag, health_error) = self.refresh_repl_health_locked(&mut st).await;
        let serving = st.is_serving();
        self.inner.health_streamer.change_state(
            st.target.tablet_type,
            st.ter_timestamp,
            lag,
            health_error,
            serving,
        );
    }

    /// The current serving state.
    pub async fn state(&self) -> ServingState {
        self.inner.state.lock().await.state
    }

    /// The identity the tablet currently serves under.
    pub async fn target(&self) -> Target {
        self.inner.state.lock().await.target.clone()
    }

    /// `"SERVING"` iff the tablet is serving, wants to keep serving, is not
    /// in lameduck mode, and replication is healthy; `"NOT_SERVING"`
    /// otherwise.
    pub async fn is_serving_string(&self) -> &'static str {
        if self.inner.state.lock().await.is_serving() {
            "SERVING"
        } else {
            "NOT_SERVING"
        }
    }

    /// Whether a transition is in flight.
    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        self.inner.transitioning.try_acquire().is_err()
    }

    /// A snapshot of everything the manager observes about itself.
    pub async fn status(&self) -> StateManagerStatus {
        let st = self.inner.state.lock().await;
        StateManagerStatus {
            target: st.target.clone(),
            state: st.state,
            want_tablet_type: st.want_tablet_type,
            want_state: st.want_state,
            also_allow: st.also_allow.clone(),
            ter_timestamp: st.ter_timestamp,
            reason: st.reason.clone(),
            lameduck: st.lameduck,
            repl_healthy: st.repl_healthy,
            retrying: st.retrying,
            transitioning: self.is_transitioning(),
            transition_error: st.transition_error.clone(),
        }
    }

    /// Wait for in-flight requests to drain, bounded by the timebomb
    /// duration. On timeout the transition proceeds anyway.
    async fn wait_for_requests(&self) {
        let mut rx = self.inner.requests.subscribe();
        if *rx.borrow() == 0 {
            return;
        }

        let timebomb = self.inner.config.timebomb_duration;
        info!("Waiting for in-flight requests to drain");
        let drained = tokio::time::timeout(timebomb, rx.wait_for(|count| *count == 0)).await;
        if drained.is_err() {
            error!(
                "In-flight requests did not drain within {:?}; proceeding with the transition",
                timebomb
            );
        }
    }

    /// Refresh the replication health flag. The state lock is held across
    /// the tracker call; `ReplTracker::status` must not block.
    async fn refresh_repl_health_locked(
        &self,
        st: &mut StateInner,
    ) -> (Duration, Option<String>) {
        if st.target.tablet_type.is_primary() {
            st.repl_healthy = true;
            return (Duration::ZERO, None);
        }
        match self.inner.subsystems.repl_tracker.status().await {
            Ok(lag) => {
                st.repl_healthy = lag <= self.inner.config.unhealthy_threshold;
                (lag, None)
            }
            Err(err) => {
                st.repl_healthy = false;
                (Duration::ZERO, Some(err.to_string()))
            }
        }
    }

    /// Start the periodic health broadcast on the first transition request.
    fn start_broadcast_ticker_locked(&self, st: &mut StateInner) {
        let interval = self.inner.config.health_check_interval;
        if st.ticker_task.is_some() || interval.is_zero() {
            return;
        }
        let sm = self.clone();
        st.ticker_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sm.broadcast().await;
            }
        }));
    }
}

/// The serving state a tablet type is actually allowed to reach.
/// Backup and Restore are forced to `NotConnected`; Spare and Drained may
/// connect but never serve.
fn effective_state(tablet_type: TabletType, state: ServingState) -> StateResult<ServingState> {
    match tablet_type {
        TabletType::Primary | TabletType::Replica | TabletType::Rdonly => Ok(state),
        TabletType::Spare | TabletType::Drained => {
            if state == ServingState::Serving {
                Ok(ServingState::NotServing)
            } else {
                Ok(state)
            }
        }
        TabletType::Backup | TabletType::Restore => Ok(ServingState::NotConnected),
        TabletType::Unknown => Err(StateError::UnsupportedTabletType(tablet_type)),
    }
}

/// Validate a request target against the identity the tablet serves under.
/// A missing target is allowed only for local operations.
fn verify_target_locked(
    st: &StateInner,
    ctx: &RequestContext,
    target: Option<&Target>,
) -> StateResult<()> {
    match target {
        Some(target) => {
            if target.keyspace != st.target.keyspace {
                return Err(StateError::InvalidKeyspace {
                    want: st.target.keyspace.clone(),
                    got: target.keyspace.clone(),
                });
            }
            if target.shard != st.target.shard {
                return Err(StateError::InvalidShard {
                    want: st.target.shard.clone(),
                    got: target.shard.clone(),
                });
            }
            if target.tablet_type != st.target.tablet_type
                && !st.also_allow.contains(&target.tablet_type)
            {
                return Err(StateError::WrongTabletType {
                    want: st.target.tablet_type,
                    got: target.tablet_type,
                });
            }
        }
        None => {
            if !ctx.is_local() {
                return Err(StateError::NoTarget);
            }
        }
    }
    Ok(())
}
