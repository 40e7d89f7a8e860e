//! Transition planning and execution over the subsystem set.
//!
//! Every (tablet type, serving state) pair requires a specific set of
//! subsystems to be open, the transaction engine in a specific admission
//! mode, and the replication tracker in a specific reporting mode. A
//! transition is planned as a flat list of steps: closes for subsystems
//! leaving the required set (in reverse dependency order), mode switches,
//! then opens in dependency order. The plan is executed from a single task
//! so the call order is deterministic.

use tracing::{debug, error};

use tabletd_subsystem::SubsystemResult;
use tabletd_topology::TabletType;

use crate::manager::Subsystems;
use crate::types::ServingState;

/// A subsystem with a plain open/close lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Component {
    SchemaEngine,
    VStreamer,
    QueryEngine,
    TxThrottler,
    TableTracker,
    Messager,
    LagThrottler,
    SchemaWatcher,
}

/// The admission mode required of the transaction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxEngineMode {
    ReadWrite,
    ReadOnly,
    Closed,
}

/// The reporting mode required of the replication tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplTrackerMode {
    Primary,
    NonPrimary,
    Closed,
}

/// One operation applied to one subsystem during a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Open(Component),
    Close(Component),
    /// Verify database connectivity before anything opens.
    EnsureConnection,
    /// Drop the schema engine's primary-only duties.
    SchemaMakeNonPrimary,
    /// Advisory signal: the query engine rejects new work while the
    /// transition finishes.
    StopServing,
    AcceptReadWrite,
    AcceptReadOnly,
    TxEngineClose,
    ReplMakePrimary,
    ReplMakeNonPrimary,
    ReplTrackerClose,
}

/// What a (tablet type, serving state) pair requires of the subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequiredSet {
    tablet_type: TabletType,
    state: ServingState,
}

impl RequiredSet {
    pub(crate) fn new(tablet_type: TabletType, state: ServingState) -> Self {
        Self { tablet_type, state }
    }

    fn connected(self) -> bool {
        self.state != ServingState::NotConnected
    }

    fn serving(self) -> bool {
        self.state == ServingState::Serving
    }

    fn primary(self) -> bool {
        self.tablet_type.is_primary()
    }

    /// Whether `component` must be open for this (type, state) pair.
    fn requires(self, component: Component) -> bool {
        match component {
            Component::SchemaEngine
            | Component::VStreamer
            | Component::QueryEngine
            | Component::TxThrottler => self.connected(),
            Component::TableTracker | Component::Messager | Component::LagThrottler => {
                self.serving() && self.primary()
            }
            Component::SchemaWatcher => self.connected() && !self.primary(),
        }
    }

    fn tx_mode(self) -> TxEngineMode {
        if !self.serving() {
            TxEngineMode::Closed
        } else if self.primary() {
            TxEngineMode::ReadWrite
        } else {
            TxEngineMode::ReadOnly
        }
    }

    fn repl_mode(self) -> ReplTrackerMode {
        if !self.connected() {
            ReplTrackerMode::Closed
        } else if self.primary() {
            ReplTrackerMode::Primary
        } else {
            ReplTrackerMode::NonPrimary
        }
    }
}

/// Compute the step list that takes the subsystems from the `current`
/// required set to the `target` one.
///
/// Subsystems leaving the required set are closed; the connected core
/// (schema engine, vstreamer, query engine, tx throttler) is re-opened on
/// every connected transition (opens are idempotent); subsystems in neither
/// set are not touched.
pub(crate) fn plan(current: RequiredSet, target: RequiredSet) -> Vec<Step> {
    let mut steps = Vec::new();
    let leaving = |component| current.requires(component) && !target.requires(component);

    // Close phase. The tx engine must stop admitting transactions before
    // the trackers that consume its side effects shut down.
    if leaving(Component::LagThrottler) {
        steps.push(Step::Close(Component::LagThrottler));
    }
    if leaving(Component::Messager) {
        steps.push(Step::Close(Component::Messager));
    }
    if current.tx_mode() != TxEngineMode::Closed && target.tx_mode() == TxEngineMode::Closed {
        steps.push(Step::TxEngineClose);
    }
    if !target.serving() {
        steps.push(Step::StopServing);
    }
    if leaving(Component::TableTracker) {
        steps.push(Step::Close(Component::TableTracker));
    }
    if leaving(Component::SchemaWatcher) {
        steps.push(Step::Close(Component::SchemaWatcher));
    }
    if leaving(Component::QueryEngine) {
        steps.push(Step::Close(Component::QueryEngine));
    }
    if leaving(Component::TxThrottler) {
        steps.push(Step::Close(Component::TxThrottler));
    }
    if leaving(Component::VStreamer) {
        steps.push(Step::Close(Component::VStreamer));
    }
    if current.repl_mode() != ReplTrackerMode::Closed
        && target.repl_mode() == ReplTrackerMode::Closed
    {
        steps.push(Step::ReplTrackerClose);
    }
    if leaving(Component::SchemaEngine) {
        steps.push(Step::Close(Component::SchemaEngine));
    }

    if !target.connected() {
        return steps;
    }

    // Role switch and open phase.
    if !target.primary() {
        steps.push(Step::SchemaMakeNonPrimary);
    }
    steps.push(Step::EnsureConnection);
    steps.push(Step::Open(Component::SchemaEngine));
    steps.push(Step::Open(Component::VStreamer));
    steps.push(Step::Open(Component::QueryEngine));
    steps.push(Step::Open(Component::TxThrottler));

    if target.primary() {
        steps.push(Step::ReplMakePrimary);
        if target.serving() {
            steps.push(Step::Open(Component::TableTracker));
            steps.push(Step::AcceptReadWrite);
            steps.push(Step::Open(Component::Messager));
            steps.push(Step::Open(Component::LagThrottler));
        }
    } else {
        if target.serving() {
            steps.push(Step::AcceptReadOnly);
        }
        steps.push(Step::ReplMakeNonPrimary);
        steps.push(Step::Open(Component::SchemaWatcher));
    }

    steps
}

/// Apply a plan against the subsystem set, in order, from the calling task.
/// The first failing step aborts the pass.
pub(crate) async fn execute(
    subsystems: &Subsystems,
    steps: &[Step],
    target_type: TabletType,
) -> SubsystemResult<()> {
    for step in steps {
        debug!("Applying transition step: {:?}", step);
        if let Err(err) = apply_step(subsystems, *step, target_type).await {
            error!("Transition step {:?} failed: {}", step, err);
            return Err(err);
        }
    }
    Ok(())
}

async fn apply_step(
    subsystems: &Subsystems,
    step: Step,
    target_type: TabletType,
) -> SubsystemResult<()> {
    match step {
        Step::Open(Component::SchemaEngine) => subsystems.schema_engine.open().await?,
        Step::Open(Component::VStreamer) => subsystems.vstreamer.open().await,
        Step::Open(Component::QueryEngine) => subsystems.query_engine.open().await?,
        Step::Open(Component::TxThrottler) => subsystems.tx_throttler.open().await?,
        Step::Open(Component::TableTracker) => subsystems.table_tracker.open().await,
        Step::Open(Component::Messager) => subsystems.messager.open().await,
        Step::Open(Component::LagThrottler) => subsystems.lag_throttler.open().await?,
        Step::Open(Component::SchemaWatcher) => subsystems.schema_watcher.open().await,
        Step::Close(Component::SchemaEngine) => subsystems.schema_engine.close().await,
        Step::Close(Component::VStreamer) => subsystems.vstreamer.close().await,
        Step::Close(Component::QueryEngine) => subsystems.query_engine.close().await,
        Step::Close(Component::TxThrottler) => subsystems.tx_throttler.close().await,
        Step::Close(Component::TableTracker) => subsystems.table_tracker.close().await,
        Step::Close(Component::Messager) => subsystems.messager.close().await,
        Step::Close(Component::LagThrottler) => subsystems.lag_throttler.close().await,
        Step::Close(Component::SchemaWatcher) => subsystems.schema_watcher.close().await,
        Step::EnsureConnection => {
            subsystems
                .schema_engine
                .ensure_connection_and_db(target_type)
                .await?;
        }
        Step::SchemaMakeNonPrimary => subsystems.schema_engine.make_non_primary().await,
        Step::StopServing => subsystems.query_engine.stop_serving().await,
        Step::AcceptReadWrite => subsystems.tx_engine.accept_read_write().await?,
        Step::AcceptReadOnly => subsystems.tx_engine.accept_read_only().await?,
        Step::TxEngineClose => subsystems.tx_engine.close().await,
        Step::ReplMakePrimary => subsystems.repl_tracker.make_primary().await,
        Step::ReplMakeNonPrimary => subsystems.repl_tracker.make_non_primary().await,
        Step::ReplTrackerClose => subsystems.repl_tracker.close().await,
    }
    Ok(())
}
