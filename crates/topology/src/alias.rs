//! Tablet identity

use std::fmt;

use serde::{Deserialize, Serialize};

/// Globally unique identity of a tablet process: the cell it runs in plus a
/// cell-local numeric id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabletAlias {
    /// The cell (datacenter) the tablet runs in.
    pub cell: String,

    /// The cell-local tablet id.
    pub uid: u32,
}

impl TabletAlias {
    /// Create a new tablet alias.
    #[must_use]
    pub fn new(cell: impl Into<String>, uid: u32) -> Self {
        Self {
            cell: cell.into(),
            uid,
        }
    }
}

impl fmt::Display for TabletAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.cell, self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let alias = TabletAlias::new("zone1", 101);
        assert_eq!(alias.to_string(), "zone1-101");
    }
}
