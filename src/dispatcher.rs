use reqwest::Client;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::controller::RunController;
use crate::models::{RequestOutcome, RunEvent};
use crate::request::{RequestPlan, execute};
use crate::stats::StatsAggregator;

/// Everything a worker needs, shared read-only between workers
#[derive(Debug)]
pub struct WorkerContext {
    pub client: Client,
    pub plan: Arc<RequestPlan>,
    pub controller: Arc<RunController>,
    /// Tickets in this run
    pub total: u64,
    pub stats: Arc<StatsAggregator>,
    pub events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl WorkerContext {
    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is watching
            let _ = events.send(event);
        }
    }
}

/// Keeps the controller's live worker count while a worker task exists,
/// including when the task panics.
struct ActiveWorker(Arc<RunController>);

impl ActiveWorker {
    fn register(controller: &Arc<RunController>) -> Self {
        controller.worker_started();
        Self(controller.clone())
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.0.worker_exited();
    }
}

/// Fixed-size pool of workers that pull tickets from the controller
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self { concurrency }
    }

    /// Spawn one task per concurrency unit. Each runs until no ticket is left.
    pub fn spawn(&self, context: Arc<WorkerContext>) -> Vec<JoinHandle<()>> {
        (0..self.concurrency)
            .map(|worker| {
                let context = context.clone();
                let active = ActiveWorker::register(&context.controller);
                tokio::spawn(async move {
                    let _active = active;
                    worker_loop(worker, context).await
                })
            })
            .collect()
    }
}

async fn worker_loop(worker: usize, context: Arc<WorkerContext>) {
    let mut handled = 0u64;

    while let Some(ticket) = context.controller.claim_ticket() {
        let total = context.total;
        debug!(
            event = "ticket_claimed",
            worker = worker,
            ticket = ticket,
            total = total,
            message = "Dispatching request"
        );
        context.emit(RunEvent::TicketClaimed { ticket, total });

        let outcome = execute(&context.client, &context.plan, ticket).await;

        match &outcome {
            RequestOutcome::Success { status, latency_ms } => debug!(
                event = "request_success",
                ticket = ticket,
                status_code = *status,
                latency_ms = *latency_ms,
                message = "Request completed successfully"
            ),
            RequestOutcome::Failure {
                kind,
                message,
                latency_ms,
            } => warn!(
                event = "request_failure",
                ticket = ticket,
                kind = ?kind,
                latency_ms = ?latency_ms,
                error = message.as_str(),
                message = "Request failed"
            ),
        }

        context.stats.record(&outcome);
        context.emit(RunEvent::TicketCompleted {
            ticket,
            method: context.plan.method,
            status: outcome.status_key(),
            outcome,
        });
        handled += 1;

        if context.controller.mark_completed() {
            let state = context.controller.snapshot();
            info!(
                event = "run_finished",
                completed = state.completed,
                total = state.total,
                message = "All tickets completed"
            );
            context.emit(RunEvent::Finished {
                completed: state.completed,
                total: state.total,
            });
        }
    }

    debug!(event = "worker_exit", worker = worker, handled = handled, message = "Worker exiting");
}
