use reqwest::Client;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::chain::ChainOrchestrator;
use crate::controller::{RunController, RunHandle};
use crate::dispatcher::{WorkerContext, WorkerPool};
use crate::error::EngineError;
use crate::models::{Report, RunEvent, RunPlan};
use crate::report::build_report;
use crate::request::RequestPlan;
use crate::stats::{AggregateStats, StatsAggregator};

/// One load test: its configuration, run state and statistics.
///
/// Sessions share nothing with each other, so several can run side by side.
#[derive(Debug)]
pub struct RunSession {
    plan: RunPlan,
    client: Client,
    controller: Arc<RunController>,
    stats: Arc<StatsAggregator>,
    chain: ChainOrchestrator,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
    handle: Option<RunHandle>,
}

impl RunSession {
    /// Validate `plan` and prepare a session without live events
    pub fn new(plan: RunPlan) -> Result<Self, EngineError> {
        plan.validate()?;
        let client = Client::builder().build()?;
        Ok(Self {
            plan,
            client,
            controller: Arc::new(RunController::new()),
            stats: Arc::new(StatsAggregator::new()),
            chain: ChainOrchestrator::new(),
            events: None,
            handle: None,
        })
    }

    /// Like [`RunSession::new`], publishing [`RunEvent`]s on `events`
    pub fn with_events(
        plan: RunPlan,
        events: mpsc::UnboundedSender<RunEvent>,
    ) -> Result<Self, EngineError> {
        let mut session = Self::new(plan)?;
        session.events = Some(events);
        Ok(session)
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn chain(&self) -> &ChainOrchestrator {
        &self.chain
    }

    /// Handle of the current run, once started
    pub fn handle(&self) -> Option<&RunHandle> {
        self.handle.as_ref()
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn emit_warnings(&self, plan: &RequestPlan) {
        for message in &plan.warnings {
            self.emit(RunEvent::Warning {
                message: message.clone(),
            });
        }
    }

    /// Run stage A if chain mode is on, then spawn the workers.
    ///
    /// A stage A failure returns [`EngineError::ChainSetup`] before any
    /// ticket is claimed. After a stop, the workers of the previous run are
    /// joined first so none of its in-flight requests lands on the new run.
    pub async fn start(&mut self) -> Result<RunHandle, EngineError> {
        if self.controller.snapshot().running {
            return Err(EngineError::AlreadyRunning);
        }
        if let Some(previous) = self.handle.take() {
            previous.join().await;
        }

        let context = match self.plan.chain() {
            Some(chain) => {
                let stage_a = RequestPlan::prepare(&chain.stage_a, None)?;
                self.emit_warnings(&stage_a);
                match self.chain.run_stage_a(&self.client, &stage_a).await {
                    Ok(context) => {
                        self.emit(RunEvent::ChainPublished {
                            context: context.as_ref().clone(),
                        });
                        Some(context)
                    }
                    Err(e) => {
                        self.emit(RunEvent::ChainAborted {
                            message: e.to_string(),
                        });
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        let config = self.plan.load_stage().clone();
        let request_plan = RequestPlan::prepare(&config.request, context.as_deref())?;
        self.emit_warnings(&request_plan);

        if config.concurrency as u64 > config.total_requests {
            let message = format!(
                "concurrency ({}) exceeds total requests ({}), extra workers will idle",
                config.concurrency, config.total_requests
            );
            warn!(event = "config_warning", message = message.as_str());
            self.emit(RunEvent::Warning { message });
        }

        self.stats.reset();
        let handle = self.controller.start(
            config.total_requests,
            config.concurrency,
            self.events.clone(),
        )?;

        info!(
            event = "run_started",
            method = config.request.method.as_str(),
            url = config.request.target_url.trim(),
            concurrency = config.concurrency,
            total_requests = config.total_requests,
            bodies = request_plan.bodies.len(),
            chained = context.is_some(),
            message = "Starting load run"
        );
        self.emit(RunEvent::Started {
            total: config.total_requests,
            concurrency: config.concurrency,
        });

        let worker_context = Arc::new(WorkerContext {
            client: self.client.clone(),
            plan: Arc::new(request_plan),
            controller: self.controller.clone(),
            total: config.total_requests,
            stats: self.stats.clone(),
            events: self.events.clone(),
        });
        handle.attach_workers(WorkerPool::new(config.concurrency).spawn(worker_context));

        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Stop the current run, if any
    pub fn stop(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| handle.stop())
    }

    pub fn stats(&self) -> AggregateStats {
        self.stats.snapshot()
    }

    /// Metrics of the current or last run
    pub fn report(&self) -> Report {
        build_report(
            self.plan.load_stage(),
            &self.controller.snapshot(),
            &self.stats.snapshot(),
        )
    }

    /// Start, wait for every worker to exit and report
    pub async fn run(mut self) -> Result<Report, EngineError> {
        let handle = match self.start().await {
            Ok(handle) => handle,
            Err(e) => {
                error!(event = "run_failed", error = %e, message = "Run could not start");
                return Err(e);
            }
        };
        handle.wait().await;
        handle.join().await;
        Ok(self.report())
    }
}
