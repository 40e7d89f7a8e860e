//! Error types for the state manager

use thiserror::Error;

use tabletd_subsystem::SubsystemError;
use tabletd_topology::TabletType;

/// Result type for state manager operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors surfaced by the state manager.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    /// The requested tablet type cannot be transitioned to.
    #[error("invalid tablet type: {0}")]
    UnsupportedTabletType(TabletType),

    /// A request addressed a keyspace this tablet does not serve.
    #[error("invalid keyspace: want {want}, got {got}")]
    InvalidKeyspace {
        /// The keyspace this tablet serves.
        want: String,
        /// The keyspace the request addressed.
        got: String,
    },

    /// A request addressed a shard this tablet does not serve.
    #[error("invalid shard: want {want}, got {got}")]
    InvalidShard {
        /// The shard this tablet serves.
        want: String,
        /// The shard the request addressed.
        got: String,
    },

    /// A request addressed a tablet type this tablet does not currently
    /// serve (and the type is not inside a grace window).
    #[error("invalid tablet type: want {want}, got {got}")]
    WrongTabletType {
        /// The type this tablet currently serves.
        want: TabletType,
        /// The type the request addressed.
        got: TabletType,
    },

    /// A request carried no target and no local-operation marker.
    #[error("No target")]
    NoTarget,

    /// The tablet is not in a state that admits the request.
    #[error("operation not allowed in state {0}")]
    NotAllowed(&'static str),

    /// A subsystem failed during a transition. Retriable: the state manager
    /// keeps driving toward the desired state.
    #[error("transition failed: {0}")]
    Transition(#[from] SubsystemError),

    /// The state manager has been stopped.
    #[error("tabletserver is shutdown")]
    Shutdown,

    /// Invariant violation inside the state manager itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StateError {
    /// Whether the retry loop will keep driving toward the desired state
    /// after this error.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transition(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        let transition: StateError = SubsystemError::new("query engine", "open failed").into();
        assert!(transition.is_retriable());

        assert!(!StateError::NoTarget.is_retriable());
        assert!(!StateError::NotAllowed("NOT_SERVING").is_retriable());
        assert!(!StateError::UnsupportedTabletType(TabletType::Unknown).is_retriable());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            StateError::NotAllowed("NOT_SERVING").to_string(),
            "operation not allowed in state NOT_SERVING"
        );
        assert_eq!(StateError::NoTarget.to_string(), "No target");
        assert_eq!(StateError::Shutdown.to_string(), "tabletserver is shutdown");
    }
}
