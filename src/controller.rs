use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{ConfigError, EngineError};
use crate::models::RunEvent;

/// Mutable state of one run. Only the controller mutates it.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    /// Last ticket handed out; the next claim returns `claimed + 1`
    pub claimed: u64,
    /// Tickets whose request finished, successfully or not
    pub completed: u64,
    pub total: u64,
    pub concurrency: usize,
    pub running: bool,
    /// Set when the run ended through `stop` rather than exhaustion
    pub stopped: bool,
    pub started: Option<Instant>,
    pub ended: Option<Instant>,
    pub started_at: Option<DateTime<Utc>>,
    /// Worker tasks of this run that have not exited yet
    pub workers: usize,
}

impl RunState {
    /// Time between start and the terminal transition, zero if the run has
    /// not reached one.
    pub fn elapsed(&self) -> Duration {
        match (self.started, self.ended) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.completed >= self.total || !self.running
    }
}

/// Hands out tickets and tracks completion for a session.
///
/// Ticket claims and completion marks are the only operations performed under
/// the lock, and neither does any I/O.
#[derive(Debug)]
pub struct RunController {
    state: Mutex<RunState>,
    finished: watch::Sender<bool>,
}

impl Default for RunController {
    fn default() -> Self {
        let (finished, _) = watch::channel(true);
        Self {
            state: Mutex::new(RunState::default()),
            finished,
        }
    }
}

impl RunController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset the state and begin a run of `total` tickets.
    ///
    /// Refused while the previous run is running or any of its workers is
    /// still finishing an in-flight request.
    pub fn start(
        self: &Arc<Self>,
        total: u64,
        concurrency: usize,
        events: Option<mpsc::UnboundedSender<RunEvent>>,
    ) -> Result<RunHandle, EngineError> {
        if total < 1 {
            return Err(ConfigError::NotPositive {
                field: "total_requests",
                value: total.to_string(),
            }
            .into());
        }
        if concurrency < 1 {
            return Err(ConfigError::NotPositive {
                field: "concurrency",
                value: concurrency.to_string(),
            }
            .into());
        }

        {
            let mut state = self.lock();
            if state.running || state.workers > 0 {
                return Err(EngineError::AlreadyRunning);
            }
            *state = RunState {
                total,
                concurrency,
                running: true,
                started: Some(Instant::now()),
                started_at: Some(Utc::now()),
                ..RunState::default()
            };
        }
        self.finished.send_replace(false);

        Ok(RunHandle {
            controller: self.clone(),
            workers: Arc::new(Mutex::new(Vec::new())),
            events,
        })
    }

    /// Claim the next ticket, or `None` once the run is exhausted or stopped
    pub fn claim_ticket(&self) -> Option<u64> {
        let mut state = self.lock();
        if !state.running || state.claimed >= state.total {
            return None;
        }
        state.claimed += 1;
        Some(state.claimed)
    }

    /// Count one finished ticket. Returns true if this call completed the run.
    pub fn mark_completed(&self) -> bool {
        let finished = {
            let mut state = self.lock();
            state.completed += 1;
            if state.running && state.completed >= state.total {
                state.running = false;
                state.ended = Some(Instant::now());
                true
            } else {
                false
            }
        };
        if finished {
            self.finished.send_replace(true);
        }
        finished
    }

    pub(crate) fn worker_started(&self) {
        self.lock().workers += 1;
    }

    pub(crate) fn worker_exited(&self) {
        let mut state = self.lock();
        state.workers = state.workers.saturating_sub(1);
    }

    /// Prevent further claims. In-flight requests are not cancelled.
    /// Returns false if the run had already ended.
    ///
    /// Callers go through [`RunHandle::stop`], which also reports the stop.
    pub(crate) fn stop(&self) -> bool {
        let stopped = {
            let mut state = self.lock();
            if state.running {
                state.running = false;
                state.stopped = true;
                state.ended = Some(Instant::now());
                true
            } else {
                false
            }
        };
        if stopped {
            self.finished.send_replace(true);
        }
        stopped
    }

    pub fn is_finished(&self) -> bool {
        self.lock().is_finished()
    }

    pub fn snapshot(&self) -> RunState {
        self.lock().clone()
    }

    /// Resolve once the run is exhausted or stopped
    pub async fn wait_finished(&self) {
        let mut finished = self.finished.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = finished.wait_for(|done| *done).await;
    }
}

/// Caller-side handle of a started run
#[derive(Debug, Clone)]
pub struct RunHandle {
    controller: Arc<RunController>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl RunHandle {
    pub fn controller(&self) -> &Arc<RunController> {
        &self.controller
    }

    pub(crate) fn attach_workers(&self, handles: Vec<JoinHandle<()>>) {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
    }

    /// Stop handing out tickets. Requests already in flight still complete
    /// and are recorded.
    pub fn stop(&self) -> bool {
        let stopped = self.controller.stop();
        if stopped {
            let state = self.controller.snapshot();
            warn!(
                event = "run_stopped",
                completed = state.completed,
                total = state.total,
                message = "Run stopped before all tickets were claimed"
            );
            if let Some(events) = &self.events {
                let _ = events.send(RunEvent::Stopped {
                    completed: state.completed,
                    total: state.total,
                });
            }
        }
        stopped
    }

    pub fn is_finished(&self) -> bool {
        self.controller.is_finished()
    }

    pub fn state(&self) -> RunState {
        self.controller.snapshot()
    }

    /// Wait for exhaustion or `stop`
    pub async fn wait(&self) {
        self.controller.wait_finished().await;
    }

    /// Wait for every worker task to exit, including requests that were in
    /// flight when the run was stopped.
    pub async fn join(&self) {
        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(event = "worker_panicked", error = %e, message = "Worker task ended abnormally");
            }
        }
        let state = self.controller.snapshot();
        info!(
            event = "workers_joined",
            completed = state.completed,
            total = state.total,
            message = "All workers exited"
        );
    }
}
