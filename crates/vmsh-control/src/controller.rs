use crate::{
    ControlError, LoginReply, PollConfig, PollOutcome, PoolAction, PoolGateway, PrefixNamer,
    RemoteError, SharedPool, StateSink, TaskPoller,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vmsh_core::{Pool, PoolState, TaskStatus, VmRequest};

struct ActivePoller {
    cancel: CancellationToken,
    handle: JoinHandle<PollOutcome>,
}

/// Drives the pool lifecycle against the provisioning service.
///
/// Transitions write their optimistic local state (`CREATE`, `PENDING`) before
/// the remote call and do not roll it back when the service rejects the call:
/// the local state may be stale until the next successful `select` or poll.
pub struct LifecycleController {
    gateway: Arc<dyn PoolGateway>,
    namer: Option<Arc<dyn PrefixNamer>>,
    sink: Arc<dyn StateSink>,
    owner: String,
    pool: SharedPool,
    index: BTreeMap<String, String>,
    poll_config: PollConfig,
    shutdown: CancellationToken,
    pollers: HashMap<String, ActivePoller>,
}

impl LifecycleController {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn PoolGateway>,
        owner: impl Into<String>,
        sink: Arc<dyn StateSink>,
    ) -> Self {
        let owner = owner.into();
        Self {
            gateway,
            namer: None,
            sink,
            pool: Arc::new(Mutex::new(Pool::new(owner.clone()))),
            owner,
            index: BTreeMap::new(),
            poll_config: PollConfig::default(),
            shutdown: CancellationToken::new(),
            pollers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_namer(mut self, namer: Arc<dyn PrefixNamer>) -> Self {
        self.namer = Some(namer);
        self
    }

    #[must_use]
    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.poll_config = config;
        self
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Handle to the selected pool, for inventory edits and display.
    #[must_use]
    pub fn pool(&self) -> SharedPool {
        self.pool.clone()
    }

    pub async fn snapshot(&self) -> Pool {
        self.pool.lock().await.clone()
    }

    /// Cached pool name to id index, as of the last [`LifecycleController::list`].
    #[must_use]
    pub fn index(&self) -> &BTreeMap<String, String> {
        &self.index
    }

    /// # Errors
    /// Returns `ControlError::Remote` if the login call fails.
    pub async fn login(&self) -> Result<LoginReply, ControlError> {
        let reply = self.gateway.login(&self.owner).await?;
        info!(
            "{}: {}",
            reply.detail.as_deref().unwrap_or("login"),
            reply.status.as_deref().unwrap_or("-")
        );
        Ok(reply)
    }

    /// Refresh the pool index from the service.
    ///
    /// # Errors
    /// Returns `ControlError::Remote` if the service cannot be reached.
    pub async fn list(&mut self) -> Result<&BTreeMap<String, String>, ControlError> {
        self.index = self.gateway.list_pools().await?;
        Ok(&self.index)
    }

    /// Create a pool and make it the selected one.
    ///
    /// Without a name the naming service is asked for a fresh prefix.
    ///
    /// # Errors
    /// Returns `ControlError::Remote` if the service rejects the request; the
    /// local pool is left in the `CREATE` state.
    pub async fn create(
        &mut self,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Pool, ControlError> {
        let name = match name {
            Some(name) => Some(name),
            None => self.next_prefix().await,
        };

        self.pool.lock().await.state = PoolState::Create;

        debug!(?name, "Create pool");
        let created = self
            .gateway
            .create_pool(&self.owner, name.as_deref(), description.as_deref())
            .await
            .inspect_err(|e| error!("Could not create pool: {e}"))?;

        if let Some(id) = &created.id {
            self.index
                .insert(created.display_name().to_string(), id.clone());
        }
        *self.pool.lock().await = created.clone();
        info!(id = ?created.id, "Pool {} created", created.display_name());
        Ok(created)
    }

    /// Select a pool listed in the cached index.
    ///
    /// Returns `Ok(false)` and leaves the local pool unchanged when the name is
    /// not in the index or the service does not know it.
    ///
    /// # Errors
    /// Returns `ControlError::Remote` if the service cannot be reached.
    pub async fn select(&mut self, name: &str) -> Result<bool, ControlError> {
        if !self.index.contains_key(name) {
            debug!("Pool {name} is not in the index");
            return Ok(false);
        }

        match self.gateway.get_pool(name).await {
            Ok(pool) => {
                *self.pool.lock().await = pool;
                debug!("Selected pool {name}");
                Ok(true)
            }
            Err(RemoteError::NotFound(_)) => {
                debug!("Pool {name} not found");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the selected pool and reset to an empty pool.
    ///
    /// # Errors
    /// Returns `ControlError::NoPoolSelected` before any remote call when the
    /// pool has no id, or `ControlError::Remote` if the service refuses; the
    /// local pool is unchanged on failure.
    pub async fn delete(&mut self) -> Result<(), ControlError> {
        let (id, prefix) = {
            let pool = self.pool.lock().await;
            let id = pool.id.clone().ok_or(ControlError::NoPoolSelected)?;
            (id, pool.vm_name_prefix.clone())
        };

        self.gateway
            .delete_pool(&id)
            .await
            .inspect_err(|e| error!("Can not delete pool {id}: {e}"))?;

        self.stop_poller(&id).await;
        self.index.retain(|_, pool_id| *pool_id != id);
        *self.pool.lock().await = Pool::new(self.owner.clone());
        info!("Pool {id} deleted");

        if let Some(namer) = &self.namer {
            match namer.unlock_prefix(&prefix).await {
                Ok(true) => debug!("Prefix {prefix} released"),
                Ok(false) => warn!("Naming service kept prefix {prefix}"),
                Err(e) => warn!("Could not release prefix {prefix}: {e}"),
            }
        }
        Ok(())
    }

    /// Submit the pool for planning and start watching it.
    ///
    /// # Errors
    /// See [`LifecycleController::apply`].
    pub async fn plan(&mut self) -> Result<Pool, ControlError> {
        self.transition(PoolAction::Plan).await
    }

    /// Submit the pool for provisioning, lock its prefix and start watching it.
    ///
    /// # Errors
    /// Returns `ControlError::NoPoolSelected` before any remote call when the
    /// pool has no id, or `ControlError::Remote` if the call fails; the local
    /// pool then stays `PENDING`.
    pub async fn apply(&mut self) -> Result<Pool, ControlError> {
        let pool = self.transition(PoolAction::Apply).await?;
        if let Some(namer) = &self.namer
            && let Err(e) = namer.lock_prefix(&pool.vm_name_prefix).await
        {
            warn!("Could not lock prefix {}: {e}", pool.vm_name_prefix);
        }
        Ok(pool)
    }

    /// Submit the pool for teardown and start watching it.
    ///
    /// # Errors
    /// See [`LifecycleController::apply`].
    pub async fn destroy(&mut self) -> Result<Pool, ControlError> {
        self.transition(PoolAction::Destroy).await
    }

    async fn transition(&mut self, action: PoolAction) -> Result<Pool, ControlError> {
        let id = self
            .pool
            .lock()
            .await
            .id
            .clone()
            .ok_or(ControlError::NoPoolSelected)?;
        self.stop_poller(&id).await;

        let payload = {
            let mut pool = self.pool.lock().await;
            pool.state = PoolState::Pending;
            pool.clone()
        };

        let updated = self
            .gateway
            .submit(action, &payload)
            .await
            .inspect_err(|e| error!(%action, "Request failed: {e}"))?;

        *self.pool.lock().await = updated.clone();
        info!(%action, state = %updated.state, "Pool {} submitted", updated.display_name());

        self.watch(&updated).await;
        Ok(updated)
    }

    /// Start a poller for `target`, replacing any poller already watching it.
    pub async fn watch(&mut self, target: &Pool) {
        let key = target
            .id
            .clone()
            .unwrap_or_else(|| target.display_name().to_string());
        self.stop_poller(&key).await;

        let cancel = self.shutdown.child_token();
        let poller = TaskPoller::new(
            self.gateway.clone(),
            self.pool.clone(),
            target,
            self.sink.clone(),
            self.poll_config.clone(),
            cancel.clone(),
        );
        debug!(pool = poller.pool_name(), "Starting poller");
        let handle = poller.spawn();
        self.pollers.insert(key, ActivePoller { cancel, handle });
    }

    /// Cancel the poller for `key` and wait up to one poll interval for it to exit,
    /// so it cannot report after its replacement starts.
    async fn stop_poller(&mut self, key: &str) -> Option<PollOutcome> {
        let active = self.pollers.remove(key)?;
        debug!("Cancelling poller for {key}");
        active.cancel.cancel();
        match tokio::time::timeout(self.poll_config.interval, active.handle).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                error!("Poller for {key} failed: {e}");
                None
            }
            Err(_) => {
                warn!("Poller for {key} did not stop in time");
                None
            }
        }
    }

    /// Number of pollers still running.
    pub fn active_pollers(&mut self) -> usize {
        self.pollers.retain(|_, active| !active.handle.is_finished());
        self.pollers.len()
    }

    /// Wait for the poller watching `pool_id` to stop on its own.
    pub async fn join_poller(&mut self, pool_id: &str) -> Option<PollOutcome> {
        let active = self.pollers.remove(pool_id)?;
        match active.handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Poller for {pool_id} failed: {e}");
                None
            }
        }
    }

    /// Query the legacy task endpoint.
    ///
    /// # Errors
    /// Returns `ControlError::Remote` if the task cannot be fetched.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ControlError> {
        Ok(self.gateway.task_status(task_id).await?)
    }

    /// Stage VMs in the selected pool. Nothing is sent until the next transition.
    ///
    /// # Errors
    /// Returns `ControlError::Core` if a VM name in the pool is malformed.
    pub async fn add_vms(&self, request: &VmRequest) -> Result<Vec<String>, ControlError> {
        Ok(self.pool.lock().await.add_vms(request)?)
    }

    pub async fn remove_vm(&self, name: &str) -> bool {
        self.pool.lock().await.remove_vm(name)
    }

    /// Cancel every poller and wait up to one poll interval for each to exit.
    ///
    /// Returns the name of the selected pool, if any, for persisting.
    pub async fn shutdown(&mut self) -> Option<String> {
        self.shutdown.cancel();
        for (key, active) in self.pollers.drain() {
            if tokio::time::timeout(self.poll_config.interval, active.handle)
                .await
                .is_err()
            {
                warn!("Poller for {key} did not stop in time");
            }
        }
        self.pool.lock().await.name.clone()
    }

    async fn next_prefix(&self) -> Option<String> {
        let namer = self.namer.as_ref()?;
        match namer.next_prefix().await {
            Ok(prefix) => prefix,
            Err(e) => {
                warn!("Could not get a prefix from the naming service: {e}");
                None
            }
        }
    }
}
