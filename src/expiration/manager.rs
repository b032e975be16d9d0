use super::task::ClearExpiredRecordsTask;
use crate::cluster::types::ClusterState;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

enum State {
    Idle,
    Running(JoinHandle<()>),
    ShutDown,
}

/// Drives [`ClearExpiredRecordsTask`] periodically on a background task.
///
/// A sweep is started while holding the state lock, and [`on_shutdown`](Self::on_shutdown)
/// takes the same lock, so no sweep can begin once shutdown has been observed.
pub struct ExpirationManager {
    task: Arc<ClearExpiredRecordsTask>,
    period: Duration,
    paused: Arc<AtomicBool>,
    state: Arc<Mutex<State>>,
    sweeps: Arc<AtomicU64>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ExpirationManager {
    pub fn new(task: ClearExpiredRecordsTask, period: Duration) -> Self {
        Self {
            task: Arc::new(task),
            period: period.max(Duration::from_millis(1)),
            paused: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(State::Idle)),
            sweeps: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Starts the background sweep. Calling it again, or after shutdown, is a no-op.
    pub fn start(&self) {
        let mut state = lock(&self.state);
        if !matches!(*state, State::Idle) {
            return;
        }

        let task = self.task.clone();
        let period = self.period;
        let paused = self.paused.clone();
        let gate = self.state.clone();
        let sweeps = self.sweeps.clone();

        *state = State::Running(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if paused.load(Ordering::SeqCst) {
                    tracing::trace!("Expiration sweep skipped, cluster not operational");
                    continue;
                }
                let pending = {
                    let state = lock(&gate);
                    if matches!(*state, State::ShutDown) {
                        break;
                    }
                    task.submit()
                };
                ClearExpiredRecordsTask::collect(pending).await;
                sweeps.fetch_add(1, Ordering::SeqCst);
            }
            tracing::debug!("Expiration task stopped");
        }));
        tracing::info!("Expiration task started with period {:?}", self.period);
    }

    pub fn on_cluster_state_change(&self, state: ClusterState) {
        let pause = !state.is_operational();
        if self.paused.swap(pause, Ordering::SeqCst) != pause {
            tracing::info!(
                "Expiration {} on cluster state {:?}",
                if pause { "paused" } else { "resumed" },
                state
            );
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// No sweep starts after this returns. Evictions already queued on partition workers
    /// still run; the background loop itself is aborted.
    pub fn on_shutdown(&self) {
        let previous = std::mem::replace(&mut *lock(&self.state), State::ShutDown);
        match previous {
            State::ShutDown => return,
            State::Running(handle) => handle.abort(),
            State::Idle => {}
        }
        tracing::info!("Expiration manager shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        matches!(*lock(&self.state), State::ShutDown)
    }

    /// Completed background sweeps since start.
    pub fn sweep_count(&self) -> u64 {
        self.sweeps.load(Ordering::SeqCst)
    }

    /// Runs one sweep right now on the caller. Returns `0` after shutdown.
    pub async fn sweep_now(&self) -> usize {
        let pending = {
            let state = lock(&self.state);
            if matches!(*state, State::ShutDown) {
                return 0;
            }
            self.task.submit()
        };
        ClearExpiredRecordsTask::collect(pending).await
    }
}
