//! Execution state machine types.

use uuid::Uuid;

use crate::services::database::traits::QueryResult;

/// Lifecycle of one execution.
///
/// `Idle -> Running -> {Completed | Failed | Cancelled}`, passing through
/// `Cancelling` when a cancel is requested while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryState {
    #[default]
    Idle,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Running or being cancelled
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Cancelling)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one execution
#[derive(Debug, Clone, PartialEq)]
pub struct QueryExecution {
    pub id: Uuid,
    pub query: String,
    pub state: QueryState,
    /// Set once the execution reaches a terminal state
    pub result: Option<QueryResult>,
}

impl QueryExecution {
    pub fn new(query: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.to_string(),
            state: QueryState::Idle,
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classes() {
        assert!(!QueryState::Idle.is_terminal());
        assert!(QueryState::Running.is_active());
        assert!(QueryState::Cancelling.is_active());
        for state in [QueryState::Completed, QueryState::Failed, QueryState::Cancelled] {
            assert!(state.is_terminal());
            assert!(!state.is_active());
        }
        assert_eq!(QueryState::Cancelling.to_string(), "cancelling");
    }

    #[test]
    fn test_new_execution_is_idle() {
        let a = QueryExecution::new("SELECT 1");
        let b = QueryExecution::new("SELECT 1");
        assert_eq!(a.state, QueryState::Idle);
        assert!(a.result.is_none());
        assert_ne!(a.id, b.id);
    }
}
