//! Shared builder for a state manager backed by order-recording mocks.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tabletd_statemgr::{StateManager, StateManagerConfig, Subsystems};
use tabletd_subsystem_mock::{
    MockQueryEngine, MockReplTracker, MockSchemaEngine, MockState, MockSubcomponent,
    MockThrottler, MockTxEngine, OpSequence, Recorded,
};
use tabletd_topology::{TabletAlias, Target};

/// A state manager wired to mocks, with handles to every mock for
/// order and state assertions.
pub struct TestTablet {
    pub sm: StateManager,
    pub seq: OpSequence,
    pub schema_engine: Arc<MockSchemaEngine>,
    pub repl_tracker: Arc<MockReplTracker>,
    pub vstreamer: Arc<MockSubcomponent>,
    pub table_tracker: Arc<MockSubcomponent>,
    pub schema_watcher: Arc<MockSubcomponent>,
    pub query_engine: Arc<MockQueryEngine>,
    pub tx_engine: Arc<MockTxEngine>,
    pub tx_throttler: Arc<MockThrottler>,
    pub lag_throttler: Arc<MockThrottler>,
    pub messager: Arc<MockSubcomponent>,
}

pub fn test_tablet() -> TestTablet {
    test_tablet_with_config(StateManagerConfig::default())
}

pub fn test_tablet_with_config(config: StateManagerConfig) -> TestTablet {
    init_logging();

    let seq = OpSequence::new();
    let schema_engine = Arc::new(MockSchemaEngine::new(seq.clone()));
    let repl_tracker = Arc::new(MockReplTracker::new(seq.clone(), Duration::from_secs(1)));
    let vstreamer = Arc::new(MockSubcomponent::new(seq.clone()));
    let table_tracker = Arc::new(MockSubcomponent::new(seq.clone()));
    let schema_watcher = Arc::new(MockSubcomponent::new(seq.clone()));
    let query_engine = Arc::new(MockQueryEngine::new(seq.clone()));
    let tx_engine = Arc::new(MockTxEngine::new(seq.clone()));
    let tx_throttler = Arc::new(MockThrottler::new(seq.clone()));
    let lag_throttler = Arc::new(MockThrottler::new(seq.clone()));
    let messager = Arc::new(MockSubcomponent::new(seq.clone()));

    let subsystems = Subsystems {
        schema_engine: schema_engine.clone(),
        repl_tracker: repl_tracker.clone(),
        vstreamer: vstreamer.clone(),
        table_tracker: table_tracker.clone(),
        schema_watcher: schema_watcher.clone(),
        query_engine: query_engine.clone(),
        tx_engine: tx_engine.clone(),
        tx_throttler: tx_throttler.clone(),
        lag_throttler: lag_throttler.clone(),
        messager: messager.clone(),
    };

    let sm = StateManager::new(
        config,
        TabletAlias::new("zone1", 1),
        Target::default(),
        subsystems,
    );

    TestTablet {
        sm,
        seq,
        schema_engine,
        repl_tracker,
        vstreamer,
        table_tracker,
        schema_watcher,
        query_engine,
        tx_engine,
        tx_throttler,
        lag_throttler,
        messager,
    }
}

/// Assert a mock recorded the given lifecycle state at the given point in
/// the call sequence.
pub fn verify(order: i64, mock: &dyn Recorded, state: MockState) {
    assert_eq!(order, mock.order(), "unexpected call order");
    assert_eq!(state, mock.state(), "unexpected lifecycle state");
}

pub fn test_now() -> SystemTime {
    SystemTime::now()
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
