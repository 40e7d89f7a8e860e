//! Request targets

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::TabletType;

/// The (keyspace, shard, tablet type) triple a request declares, and the
/// identity a tablet serves under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// The keyspace (logical database) being addressed.
    pub keyspace: String,

    /// The shard of the keyspace.
    pub shard: String,

    /// The tablet role being addressed.
    pub tablet_type: TabletType,
}

impl Target {
    /// Create a new target.
    #[must_use]
    pub fn new(keyspace: impl Into<String>, shard: impl Into<String>, tablet_type: TabletType) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
            tablet_type,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.keyspace, self.shard, self.tablet_type)
    }
}
