use crate::{LoginReply, PoolAction, PoolGateway, RemoteError, StateChange};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use vmsh_core::{Pool, PoolState, TaskStatus};

/// In-memory gateway that replays scripted answers and records every call.
#[derive(Default)]
pub struct ScriptedGateway {
    pub calls: Mutex<Vec<String>>,
    pub index: Mutex<BTreeMap<String, String>>,
    pub created: Mutex<Option<Pool>>,
    pub create_error: Mutex<Option<RemoteError>>,
    /// Answers for `get_pool`, consumed in order; the last one repeats.
    pub snapshots: Mutex<VecDeque<Result<Pool, RemoteError>>>,
    pub submitted: Mutex<Vec<(PoolAction, Pool)>>,
    pub submit_reply: Mutex<Option<Result<Pool, RemoteError>>>,
    pub delete_reply: Mutex<Option<RemoteError>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_snapshot(&self, snapshot: Result<Pool, RemoteError>) {
        self.snapshots.lock().unwrap().push_back(snapshot);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == call)
            .count()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl PoolGateway for ScriptedGateway {
    async fn login(&self, _username: &str) -> Result<LoginReply, RemoteError> {
        self.record("login");
        Ok(LoginReply::default())
    }

    async fn create_pool(
        &self,
        owner: &str,
        name: Option<&str>,
        _description: Option<&str>,
    ) -> Result<Pool, RemoteError> {
        self.record("create");
        if let Some(err) = self.create_error.lock().unwrap().clone() {
            return Err(err);
        }
        match self.created.lock().unwrap().clone() {
            Some(pool) => Ok(pool),
            None => {
                let mut pool = Pool::new(owner);
                pool.id = Some("generated".into());
                if let Some(name) = name {
                    pool.name = Some(name.to_string());
                    pool.vm_name_prefix = name.to_string();
                }
                pool.state = PoolState::Create;
                Ok(pool)
            }
        }
    }

    async fn list_pools(&self) -> Result<BTreeMap<String, String>, RemoteError> {
        self.record("list");
        Ok(self.index.lock().unwrap().clone())
    }

    async fn get_pool(&self, name: &str) -> Result<Pool, RemoteError> {
        self.record("get");
        let mut snapshots = self.snapshots.lock().unwrap();
        let answer = if snapshots.len() > 1 {
            snapshots.pop_front()
        } else {
            snapshots.front().cloned()
        };
        answer.unwrap_or_else(|| Err(RemoteError::NotFound(name.to_string())))
    }

    async fn delete_pool(&self, _id: &str) -> Result<(), RemoteError> {
        self.record("delete");
        match self.delete_reply.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn submit(&self, action: PoolAction, pool: &Pool) -> Result<Pool, RemoteError> {
        self.record(action.as_str());
        self.submitted.lock().unwrap().push((action, pool.clone()));
        match self.submit_reply.lock().unwrap().clone() {
            Some(reply) => reply,
            None => Ok(pool.clone()),
        }
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, RemoteError> {
        self.record("task");
        Err(RemoteError::NotFound(task_id.to_string()))
    }
}

pub fn remote_pool(name: &str, state: PoolState, note: Option<&str>) -> Pool {
    let mut pool = Pool::new("alice");
    pool.id = Some(format!("{name}-id"));
    pool.name = Some(name.to_string());
    pool.vm_name_prefix = name.to_string();
    pool.state = state;
    pool.state_note = note.map(str::to_string);
    pool
}

/// Sink collecting every change it receives.
pub fn collecting_sink() -> (
    Arc<dyn crate::StateSink>,
    Arc<Mutex<Vec<StateChange>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    let sink = move |change: &StateChange| sink_seen.lock().unwrap().push(change.clone());
    (Arc::new(sink), seen)
}
