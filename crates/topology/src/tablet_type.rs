//! Tablet role types

use std::fmt;

use serde::{Deserialize, Serialize};

/// The role a tablet is currently assigned within its shard.
///
/// The role dictates read/write capability and serving eligibility. Roles are
/// partitioned into three classes:
/// - serving-capable: [`Primary`](Self::Primary), [`Replica`](Self::Replica),
///   [`Rdonly`](Self::Rdonly)
/// - connected but never serving: [`Spare`](Self::Spare),
///   [`Drained`](Self::Drained)
/// - unconnected: [`Backup`](Self::Backup), [`Restore`](Self::Restore)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TabletType {
    /// Role not yet assigned
    Unknown,
    /// The read-write primary of the shard
    Primary,
    /// A read-only replica eligible for promotion
    Replica,
    /// A read-only replica reserved for batch jobs
    Rdonly,
    /// Connected but held out of the serving pool
    Spare,
    /// Taking a backup; not connected to the database
    Backup,
    /// Restoring from a backup; not connected to the database
    Restore,
    /// Drained for maintenance; never serving
    Drained,
}

impl TabletType {
    /// Whether this role may reach the serving state.
    #[must_use]
    pub fn is_serving_capable(self) -> bool {
        matches!(self, Self::Primary | Self::Replica | Self::Rdonly)
    }

    /// Whether this role is forced to stay disconnected from the database.
    #[must_use]
    pub fn is_unconnected(self) -> bool {
        matches!(self, Self::Backup | Self::Restore)
    }

    /// Whether this role is the read-write primary.
    #[must_use]
    pub fn is_primary(self) -> bool {
        matches!(self, Self::Primary)
    }
}

impl Default for TabletType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for TabletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Primary => "PRIMARY",
            Self::Replica => "REPLICA",
            Self::Rdonly => "RDONLY",
            Self::Spare => "SPARE",
            Self::Backup => "BACKUP",
            Self::Restore => "RESTORE",
            Self::Drained => "DRAINED",
        };
        write!(f, "{name}")
    }
}
