use crate::{PoolGateway, StateChange, StateSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vmsh_core::{Pool, PoolState, TASK_FINISHED};

/// The locally selected pool, shared between the foreground and pollers.
pub type SharedPool = Arc<Mutex<Pool>>;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TIME_TO_LIVE: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub time_to_live: Duration,
    /// Polling stops once the pool reaches one of these states.
    pub terminal_states: Vec<PoolState>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            time_to_live: DEFAULT_TIME_TO_LIVE,
            terminal_states: TASK_FINISHED.to_vec(),
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn new(interval: Duration, time_to_live: Duration) -> Self {
        Self {
            interval,
            time_to_live,
            ..Self::default()
        }
    }

    /// Number of fetches before giving up: `ceil(time_to_live / interval)`, at least one.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        let interval = self.interval.as_millis().max(1);
        let retries = self.time_to_live.as_millis().div_ceil(interval).max(1);
        u32::try_from(retries).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The pool reached a terminal state.
    Finished(PoolState),
    /// Retries were exhausted without a terminal state.
    TimedOut,
    /// The service reported that the status can never be updated.
    Fatal,
    Cancelled,
}

/// Watches one pool on the service until it settles.
pub struct TaskPoller {
    gateway: Arc<dyn PoolGateway>,
    selected: SharedPool,
    pool_name: String,
    last_state: PoolState,
    last_note: Option<String>,
    sink: Arc<dyn StateSink>,
    config: PollConfig,
    cancel: CancellationToken,
}

impl TaskPoller {
    /// Prepare a poller for `target`, using its current state and note as the baseline.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn PoolGateway>,
        selected: SharedPool,
        target: &Pool,
        sink: Arc<dyn StateSink>,
        config: PollConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            selected,
            pool_name: target.display_name().to_string(),
            last_state: target.state,
            last_note: target.state_note.clone(),
            sink,
            config,
            cancel,
        }
    }

    #[must_use]
    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn spawn(self) -> JoinHandle<PollOutcome> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> PollOutcome {
        let max_retries = self.config.max_retries();
        let mut last_seen: Option<Pool> = None;

        debug!(pool = %self.pool_name, max_retries, "Polling started");

        for attempt in 1..=max_retries {
            let fetched = tokio::select! {
                () = self.cancel.cancelled() => return self.cancelled(),
                result = self.gateway.get_pool(&self.pool_name) => result,
            };

            match fetched {
                Ok(snapshot) => {
                    if snapshot.state != self.last_state || snapshot.state_note != self.last_note {
                        self.report(&snapshot).await;
                    }
                    if self.config.terminal_states.contains(&snapshot.state) {
                        info!(pool = %self.pool_name, state = %snapshot.state, "Task finished");
                        return PollOutcome::Finished(snapshot.state);
                    }
                    last_seen = Some(snapshot);
                }
                Err(e) if e.is_fatal_for_polling() => {
                    error!(pool = %self.pool_name, "Status can not be updated, stop polling: {e}");
                    return PollOutcome::Fatal;
                }
                Err(e) => {
                    warn!(pool = %self.pool_name, attempt, "Poll failed: {e}");
                }
            }

            if attempt < max_retries {
                tokio::select! {
                    () = self.cancel.cancelled() => return self.cancelled(),
                    () = tokio::time::sleep(self.config.interval) => {}
                }
            }
        }

        error!(
            pool = %self.pool_name,
            "No final state after {:?}, stop polling",
            self.config.time_to_live
        );
        if let Some(snapshot) = last_seen {
            let mut selected = self.selected.lock().await;
            if selected.display_name() == self.pool_name {
                selected.absorb_status(&snapshot);
            }
        }
        PollOutcome::TimedOut
    }

    /// Notify the sink and refresh the selected pool under a single lock.
    async fn report(&mut self, snapshot: &Pool) {
        let change = StateChange {
            pool: self.pool_name.clone(),
            old_state: self.last_state,
            old_note: self.last_note.take(),
            new_state: snapshot.state,
            new_note: snapshot.state_note.clone(),
        };

        let mut selected = self.selected.lock().await;
        self.sink.on_state_change(&change);
        if selected.display_name() == self.pool_name {
            selected.absorb_status(snapshot);
        }
        drop(selected);

        self.last_state = change.new_state;
        self.last_note = change.new_note;
    }

    fn cancelled(&self) -> PollOutcome {
        debug!(pool = %self.pool_name, "Polling cancelled");
        PollOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RemoteError;
    use crate::testing::{ScriptedGateway, collecting_sink, remote_pool};

    fn poller_for(
        gateway: &Arc<ScriptedGateway>,
        selected: &SharedPool,
        baseline: &Pool,
        config: PollConfig,
    ) -> (
        TaskPoller,
        Arc<std::sync::Mutex<Vec<StateChange>>>,
        CancellationToken,
    ) {
        let (sink, seen) = collecting_sink();
        let cancel = CancellationToken::new();
        let poller = TaskPoller::new(
            gateway.clone(),
            selected.clone(),
            baseline,
            sink,
            config,
            cancel.clone(),
        );
        (poller, seen, cancel)
    }

    #[test]
    fn test_max_retries() {
        assert_eq!(PollConfig::default().max_retries(), 120);
        assert_eq!(
            PollConfig::new(Duration::from_secs(5), Duration::from_secs(30)).max_retries(),
            6
        );
        assert_eq!(
            PollConfig::new(Duration::from_secs(4), Duration::from_secs(10)).max_retries(),
            3
        );
        assert_eq!(
            PollConfig::new(Duration::from_secs(5), Duration::ZERO).max_retries(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_snapshots_time_out() {
        let gateway = ScriptedGateway::new();
        let baseline = remote_pool("team-a", PoolState::Pending, None);
        gateway.push_snapshot(Ok(baseline.clone()));
        let selected: SharedPool = Arc::new(Mutex::new(baseline.clone()));

        let config = PollConfig::new(Duration::from_secs(5), Duration::from_secs(30));
        let (poller, seen, _cancel) = poller_for(&gateway, &selected, &baseline, config);

        assert_eq!(poller.run().await, PollOutcome::TimedOut);
        assert_eq!(gateway.count("get"), 6);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_state_stops_on_that_attempt() {
        let gateway = ScriptedGateway::new();
        let baseline = remote_pool("team-a", PoolState::Pending, None);
        gateway.push_snapshot(Ok(baseline.clone()));
        gateway.push_snapshot(Ok(baseline.clone()));
        gateway.push_snapshot(Ok(remote_pool("team-a", PoolState::Success, Some("done"))));
        gateway.push_snapshot(Ok(remote_pool("team-a", PoolState::Destroyed, None)));
        let selected: SharedPool = Arc::new(Mutex::new(baseline.clone()));

        let (poller, seen, _cancel) =
            poller_for(&gateway, &selected, &baseline, PollConfig::default());

        assert_eq!(
            poller.run().await,
            PollOutcome::Finished(PoolState::Success)
        );
        assert_eq!(gateway.count("get"), 3);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].to_string(), "team-a: - : PENDING -> SUCCESS");
        assert_eq!(selected.lock().await.state, PoolState::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_note_change_is_reported() {
        let gateway = ScriptedGateway::new();
        let baseline = remote_pool("team-a", PoolState::Pending, None);
        gateway.push_snapshot(Ok(remote_pool("team-a", PoolState::Running, Some("clone"))));
        gateway.push_snapshot(Ok(remote_pool("team-a", PoolState::Running, Some("boot"))));
        gateway.push_snapshot(Ok(remote_pool("team-a", PoolState::Failure, Some("boot"))));
        let selected: SharedPool = Arc::new(Mutex::new(baseline.clone()));

        let (poller, seen, _cancel) =
            poller_for(&gateway, &selected, &baseline, PollConfig::default());

        assert_eq!(
            poller.run().await,
            PollOutcome::Finished(PoolState::Failure)
        );
        let messages: Vec<String> = seen.lock().unwrap().iter().map(ToString::to_string).collect();
        assert_eq!(
            messages,
            vec![
                "team-a: - : PENDING -> RUNNING",
                "team-a: clone : RUNNING -> RUNNING",
                "team-a: boot : RUNNING -> FAILURE",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_do_not_abort() {
        let gateway = ScriptedGateway::new();
        let baseline = remote_pool("team-a", PoolState::Pending, None);
        gateway.push_snapshot(Err(RemoteError::Transport("timed out".into())));
        gateway.push_snapshot(Err(RemoteError::Rejected {
            status: 503,
            body: "busy".into(),
        }));
        gateway.push_snapshot(Ok(remote_pool("team-a", PoolState::Success, None)));
        let selected: SharedPool = Arc::new(Mutex::new(baseline.clone()));

        let (poller, _seen, _cancel) =
            poller_for(&gateway, &selected, &baseline, PollConfig::default());

        assert_eq!(
            poller.run().await,
            PollOutcome::Finished(PoolState::Success)
        );
        assert_eq!(gateway.count("get"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frozen_status_is_fatal() {
        let gateway = ScriptedGateway::new();
        let baseline = remote_pool("team-a", PoolState::Pending, None);
        gateway.push_snapshot(Err(RemoteError::Rejected {
            status: 500,
            body: "status can not be updated".into(),
        }));
        gateway.push_snapshot(Ok(remote_pool("team-a", PoolState::Success, None)));
        let selected: SharedPool = Arc::new(Mutex::new(baseline.clone()));

        let (poller, seen, _cancel) =
            poller_for(&gateway, &selected, &baseline, PollConfig::default());

        assert_eq!(poller.run().await, PollOutcome::Fatal);
        assert_eq!(gateway.count("get"), 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let gateway = ScriptedGateway::new();
        let baseline = remote_pool("team-a", PoolState::Pending, None);
        gateway.push_snapshot(Ok(baseline.clone()));
        let selected: SharedPool = Arc::new(Mutex::new(baseline.clone()));

        let (poller, _seen, cancel) =
            poller_for(&gateway, &selected, &baseline, PollConfig::default());
        let handle = poller.spawn();

        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), PollOutcome::Cancelled);
        assert_eq!(gateway.count("get"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_selected_pool_is_left_alone() {
        let gateway = ScriptedGateway::new();
        let baseline = remote_pool("team-a", PoolState::Pending, None);
        gateway.push_snapshot(Ok(remote_pool("team-a", PoolState::Success, None)));
        let other = remote_pool("team-b", PoolState::Created, None);
        let selected: SharedPool = Arc::new(Mutex::new(other.clone()));

        let (poller, seen, _cancel) =
            poller_for(&gateway, &selected, &baseline, PollConfig::default());

        assert_eq!(
            poller.run().await,
            PollOutcome::Finished(PoolState::Success)
        );
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(*selected.lock().await, other);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_does_not_lose_inventory_edits() {
        use vmsh_core::{VmOs, VmType};

        let gateway = ScriptedGateway::new();
        let mut baseline = remote_pool("team-a", PoolState::Pending, None);
        baseline.items.clear();
        for (i, state) in [PoolState::Started, PoolState::Running, PoolState::Progress]
            .into_iter()
            .enumerate()
        {
            gateway.push_snapshot(Ok(remote_pool("team-a", state, Some(&format!("step-{i}")))));
        }
        gateway.push_snapshot(Ok(remote_pool("team-a", PoolState::Success, None)));
        let selected: SharedPool = Arc::new(Mutex::new(baseline.clone()));

        let (poller, seen, _cancel) =
            poller_for(&gateway, &selected, &baseline, PollConfig::default());
        let handle = poller.spawn();

        for _ in 0..3 {
            selected
                .lock()
                .await
                .add_vm(VmType::Small, VmOs::Redos73, None)
                .unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        }

        assert_eq!(
            handle.await.unwrap(),
            PollOutcome::Finished(PoolState::Success)
        );
        assert_eq!(seen.lock().unwrap().len(), 4);

        let pool = selected.lock().await;
        let names: Vec<_> = pool.items.iter().map(|vm| vm.name.as_str()).collect();
        assert_eq!(names, vec!["team-a01", "team-a02", "team-a03"]);
        assert_eq!(pool.state, PoolState::Success);
    }
}
