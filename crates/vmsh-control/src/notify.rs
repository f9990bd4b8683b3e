use std::fmt;
use tracing::info;
use vmsh_core::PoolState;

/// A change of `(state, state note)` observed by a poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub pool: String,
    pub old_state: PoolState,
    pub old_note: Option<String>,
    pub new_state: PoolState,
    pub new_note: Option<String>,
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} : {} -> {}",
            self.pool,
            self.old_note.as_deref().unwrap_or("-"),
            self.old_state,
            self.new_state
        )
    }
}

/// Receives state-change notifications from pollers.
///
/// Called from background tasks, so implementations must not block.
pub trait StateSink: Send + Sync {
    fn on_state_change(&self, change: &StateChange);
}

impl<F> StateSink for F
where
    F: Fn(&StateChange) + Send + Sync,
{
    fn on_state_change(&self, change: &StateChange) {
        self(change);
    }
}

/// Sink that only records changes in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl StateSink for LogSink {
    fn on_state_change(&self, change: &StateChange) {
        info!(pool = %change.pool, "State changed: {change}");
    }
}
