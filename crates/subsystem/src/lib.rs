//! Contracts for the subsystems the tablet state manager drives.
//!
//! The state manager owns the open/close lifecycle of every subsystem on the
//! tablet. Each subsystem implements one of the traits below; the state
//! manager is the only caller of these methods. Implementations must be
//! cheap to call redundantly: `open` on an open subsystem and `close` on a
//! closed one are both no-ops.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;

pub use error::{SubsystemError, SubsystemResult};

use std::time::Duration;

use async_trait::async_trait;

use tabletd_topology::TabletType;

/// The schema engine: tracks table definitions and owns the database
/// connection pool the other subsystems bootstrap from.
#[async_trait]
pub trait SchemaEngine: Send + Sync {
    /// Verify the database is reachable and the side-table schema exists,
    /// creating it if necessary. Called before any subsystem opens on a
    /// connected transition.
    async fn ensure_connection_and_db(&self, tablet_type: TabletType) -> SubsystemResult<()>;

    /// Open the engine. Idempotent.
    async fn open(&self) -> SubsystemResult<()>;

    /// Drop privileges that only the primary holds (schema reloads stop
    /// writing to tracking tables).
    async fn make_non_primary(&self);

    /// Close the engine. Idempotent, infallible.
    async fn close(&self);
}

/// The replication tracker: reports replication lag and switches between
/// primary and non-primary reporting modes.
#[async_trait]
pub trait ReplTracker: Send + Sync {
    /// Switch to primary mode (lag is zero by definition).
    async fn make_primary(&self);

    /// Switch to non-primary mode (lag is measured against the primary).
    async fn make_non_primary(&self);

    /// Close the tracker.
    async fn close(&self);

    /// Current replication lag. Must return promptly; the state manager
    /// calls this while holding its state lock.
    async fn status(&self) -> SubsystemResult<Duration>;
}

/// The query engine: plans and executes queries, and owns the liveness
/// probe against the database.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Open the engine. Idempotent.
    async fn open(&self) -> SubsystemResult<()>;

    /// Probe the database for liveness.
    async fn is_mysql_reachable(&self) -> SubsystemResult<()>;

    /// Advisory signal to reject new work while a transition finishes its
    /// close sequence.
    async fn stop_serving(&self);

    /// Close the engine. Idempotent, infallible.
    async fn close(&self);
}

/// The transaction engine: admits transactions in read-write or read-only
/// mode, or rejects them entirely when closed.
#[async_trait]
pub trait TxEngine: Send + Sync {
    /// Accept read-write transactions (primary serving mode).
    async fn accept_read_write(&self) -> SubsystemResult<()>;

    /// Accept read-only transactions (replica serving mode).
    async fn accept_read_only(&self) -> SubsystemResult<()>;

    /// Stop accepting transactions and roll back what is in flight.
    async fn close(&self);
}

/// A throttler with a fallible open: the transaction throttler and the lag
/// throttler both wear this shape.
#[async_trait]
pub trait Throttler: Send + Sync {
    /// Open the throttler. Idempotent.
    async fn open(&self) -> SubsystemResult<()>;

    /// Close the throttler. Idempotent, infallible.
    async fn close(&self);
}

/// A subsystem with an infallible open/close pair: the vstreamer, the table
/// tracker, the message engine, and the schema-change watcher.
#[async_trait]
pub trait Subcomponent: Send + Sync {
    /// Open the subsystem. Idempotent.
    async fn open(&self);

    /// Close the subsystem. Idempotent.
    async fn close(&self);
}
