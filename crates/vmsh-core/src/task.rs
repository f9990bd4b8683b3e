use crate::{CoreError, PoolState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    pub name: String,
    pub task_id: String,
    pub state: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Status of an asynchronous pool task as reported by the legacy task endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub pool_id: String,
    pub pool_name: String,
    pub state: String,
    #[serde(default)]
    pub state_note: Option<String>,
    #[serde(default)]
    pub tasks: Vec<SubTask>,
}

impl TaskStatus {
    /// Current `(state, note)` pair.
    ///
    /// The first sub-task still in progress wins: the pool is reported as
    /// `PROGRESS` with that sub-task's name as the note.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidParameter` if the reported state is unknown.
    pub fn current(&self) -> Result<(PoolState, Option<String>), CoreError> {
        if let Some(task) = self
            .tasks
            .iter()
            .find(|task| task.state == PoolState::Progress.as_str())
        {
            return Ok((PoolState::Progress, Some(task.name.clone())));
        }
        Ok((self.state.parse()?, self.state_note.clone()))
    }
}
