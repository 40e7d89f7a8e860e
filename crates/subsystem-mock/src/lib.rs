//! Order-recording, fault-injectable subsystem mocks for tests.
//!
//! Every mock stamps its open/close/mode-switch calls with a value drawn
//! from a shared [`OpSequence`], so tests can assert the exact order in
//! which the state manager drove its subsystems. Fault injection is
//! one-shot: a forced failure clears itself after firing, which lets retry
//! paths converge.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use tabletd_subsystem::{
    QueryEngine, ReplTracker, SchemaEngine, Subcomponent, SubsystemError, SubsystemResult,
    Throttler, TxEngine,
};
use tabletd_topology::TabletType;

/// A monotonic counter shared by all mocks of one test tablet. Each
/// lifecycle call takes the next value, starting at 1.
#[derive(Debug, Clone, Default)]
pub struct OpSequence {
    counter: Arc<AtomicI64>,
}

impl OpSequence {
    /// Create a new sequence starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next value.
    pub fn next(&self) -> i64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The last value handed out.
    #[must_use]
    pub fn current(&self) -> i64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Reset the counter to zero.
    pub fn reset(&self) {
        self.counter.store(0, Ordering::SeqCst);
    }
}

/// The lifecycle state a mock last recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockState {
    /// No lifecycle call recorded yet.
    Untouched,
    /// Last call was an open.
    Open,
    /// Last call was a close.
    Closed,
    /// Last call switched to primary / read-write mode.
    Primary,
    /// Last call switched to non-primary / read-only mode.
    NonPrimary,
}

/// Read access to a mock's recorded order and state.
pub trait Recorded {
    /// The sequence value of the last lifecycle call.
    fn order(&self) -> i64;

    /// The last recorded lifecycle state.
    fn state(&self) -> MockState;
}

#[derive(Debug)]
struct Record {
    order: i64,
    state: MockState,
}

impl Record {
    const fn new() -> Self {
        Self {
            order: 0,
            state: MockState::Untouched,
        }
    }
}

macro_rules! impl_recorded {
    ($mock:ty) => {
        impl Recorded for $mock {
            fn order(&self) -> i64 {
                self.record.lock().unwrap().order
            }

            fn state(&self) -> MockState {
                self.record.lock().unwrap().state
            }
        }
    };
}

/// Mock schema engine with a one-shot connection failure.
#[derive(Debug)]
pub struct MockSchemaEngine {
    seq: OpSequence,
    record: Mutex<Record>,
    fail_mysql: AtomicBool,
    ensure_called: AtomicBool,
    non_primary: AtomicBool,
}

impl MockSchemaEngine {
    /// Create a new mock schema engine.
    #[must_use]
    pub fn new(seq: OpSequence) -> Self {
        Self {
            seq,
            record: Mutex::new(Record::new()),
            fail_mysql: AtomicBool::new(false),
            ensure_called: AtomicBool::new(false),
            non_primary: AtomicBool::new(false),
        }
    }

    /// Make the next `ensure_connection_and_db` call fail.
    pub fn fail_mysql_once(&self) {
        self.fail_mysql.store(true, Ordering::SeqCst);
    }

    /// Whether `ensure_connection_and_db` has succeeded.
    #[must_use]
    pub fn ensure_called(&self) -> bool {
        self.ensure_called.load(Ordering::SeqCst)
    }

    /// Whether `make_non_primary` has been invoked.
    #[must_use]
    pub fn non_primary(&self) -> bool {
        self.non_primary.load(Ordering::SeqCst)
    }
}

impl_recorded!(MockSchemaEngine);

#[async_trait]
impl SchemaEngine for MockSchemaEngine {
    async fn ensure_connection_and_db(&self, _tablet_type: TabletType) -> SubsystemResult<()> {
        if self.fail_mysql.swap(false, Ordering::SeqCst) {
            return Err(SubsystemError::new("schema engine", "forced connection failure"));
        }
        self.ensure_called.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn open(&self) -> SubsystemResult<()> {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::Open,
        };
        Ok(())
    }

    async fn make_non_primary(&self) {
        self.non_primary.store(true, Ordering::SeqCst);
    }

    async fn close(&self) {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::Closed,
        };
    }
}

/// Mock replication tracker with settable lag and error.
#[derive(Debug)]
pub struct MockReplTracker {
    seq: OpSequence,
    record: Mutex<Record>,
    lag: Mutex<Duration>,
    error: Mutex<Option<String>>,
}

impl MockReplTracker {
    /// Create a new mock tracker reporting the given lag.
    #[must_use]
    pub fn new(seq: OpSequence, lag: Duration) -> Self {
        Self {
            seq,
            record: Mutex::new(Record::new()),
            lag: Mutex::new(lag),
            error: Mutex::new(None),
        }
    }

    /// Change the reported lag.
    pub fn set_lag(&self, lag: Duration) {
        *self.lag.lock().unwrap() = lag;
    }

    /// Make `status` report an error (or clear it with `None`).
    pub fn set_error(&self, error: Option<String>) {
        *self.error.lock().unwrap() = error;
    }
}

impl_recorded!(MockReplTracker);

#[async_trait]
impl ReplTracker for MockReplTracker {
    async fn make_primary(&self) {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::Primary,
        };
    }

    async fn make_non_primary(&self) {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::NonPrimary,
        };
    }

    async fn close(&self) {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::Closed,
        };
    }

    async fn status(&self) -> SubsystemResult<Duration> {
        if let Some(message) = self.error.lock().unwrap().clone() {
            return Err(SubsystemError::new("repl tracker", message));
        }
        Ok(*self.lag.lock().unwrap())
    }
}

/// Mock query engine with a one-shot liveness failure and a stop-serving
/// flag.
#[derive(Debug)]
pub struct MockQueryEngine {
    seq: OpSequence,
    record: Mutex<Record>,
    fail_mysql: AtomicBool,
    stop_serving: AtomicBool,
}

impl MockQueryEngine {
    /// Create a new mock query engine.
    #[must_use]
    pub fn new(seq: OpSequence) -> Self {
        Self {
            seq,
            record: Mutex::new(Record::new()),
            fail_mysql: AtomicBool::new(false),
            stop_serving: AtomicBool::new(false),
        }
    }

    /// Make the next `is_mysql_reachable` call fail.
    pub fn fail_mysql_once(&self) {
        self.fail_mysql.store(true, Ordering::SeqCst);
    }

    /// Whether `stop_serving` has been invoked.
    #[must_use]
    pub fn stop_serving_called(&self) -> bool {
        self.stop_serving.load(Ordering::SeqCst)
    }
}

impl_recorded!(MockQueryEngine);

#[async_trait]
impl QueryEngine for MockQueryEngine {
    async fn open(&self) -> SubsystemResult<()> {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::Open,
        };
        Ok(())
    }

    async fn is_mysql_reachable(&self) -> SubsystemResult<()> {
        if self.fail_mysql.swap(false, Ordering::SeqCst) {
            return Err(SubsystemError::new("query engine", "forced probe failure"));
        }
        Ok(())
    }

    async fn stop_serving(&self) {
        self.stop_serving.store(true, Ordering::SeqCst);
    }

    async fn close(&self) {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::Closed,
        };
    }
}

/// Mock transaction engine.
#[derive(Debug)]
pub struct MockTxEngine {
    seq: OpSequence,
    record: Mutex<Record>,
}

impl MockTxEngine {
    /// Create a new mock transaction engine.
    #[must_use]
    pub fn new(seq: OpSequence) -> Self {
        Self {
            seq,
            record: Mutex::new(Record::new()),
        }
    }
}

impl_recorded!(MockTxEngine);

#[async_trait]
impl TxEngine for MockTxEngine {
    async fn accept_read_write(&self) -> SubsystemResult<()> {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::Primary,
        };
        Ok(())
    }

    async fn accept_read_only(&self) -> SubsystemResult<()> {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::NonPrimary,
        };
        Ok(())
    }

    async fn close(&self) {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::Closed,
        };
    }
}

/// Mock throttler (serves as both the tx throttler and the lag throttler).
#[derive(Debug)]
pub struct MockThrottler {
    seq: OpSequence,
    record: Mutex<Record>,
}

impl MockThrottler {
    /// Create a new mock throttler.
    #[must_use]
    pub fn new(seq: OpSequence) -> Self {
        Self {
            seq,
            record: Mutex::new(Record::new()),
        }
    }
}

impl_recorded!(MockThrottler);

#[async_trait]
impl Throttler for MockThrottler {
    async fn open(&self) -> SubsystemResult<()> {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::Open,
        };
        Ok(())
    }

    async fn close(&self) {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::Closed,
        };
    }
}

/// Mock subcomponent (vstreamer, table tracker, messager, schema watcher).
#[derive(Debug)]
pub struct MockSubcomponent {
    seq: OpSequence,
    record: Mutex<Record>,
}

impl MockSubcomponent {
    /// Create a new mock subcomponent.
    #[must_use]
    pub fn new(seq: OpSequence) -> Self {
        Self {
            seq,
            record: Mutex::new(Record::new()),
        }
    }
}

impl_recorded!(MockSubcomponent);

#[async_trait]
impl Subcomponent for MockSubcomponent {
    async fn open(&self) {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::Open,
        };
    }

    async fn close(&self) {
        *self.record.lock().unwrap() = Record {
            order: self.seq.next(),
            state: MockState::Closed,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_stamps_in_call_order() {
        let seq = OpSequence::new();
        let a = MockSubcomponent::new(seq.clone());
        let b = MockSubcomponent::new(seq.clone());

        a.open().await;
        b.open().await;
        a.close().await;

        assert_eq!(a.order(), 3);
        assert_eq!(a.state(), MockState::Closed);
        assert_eq!(b.order(), 2);
        assert_eq!(b.state(), MockState::Open);
        assert_eq!(seq.current(), 3);
    }

    #[tokio::test]
    async fn test_fault_injection_is_one_shot() {
        let engine = MockSchemaEngine::new(OpSequence::new());
        engine.fail_mysql_once();

        assert!(
            engine
                .ensure_connection_and_db(TabletType::Primary)
                .await
                .is_err()
        );
        assert!(!engine.ensure_called());

        assert!(
            engine
                .ensure_connection_and_db(TabletType::Primary)
                .await
                .is_ok()
        );
        assert!(engine.ensure_called());
    }
}
