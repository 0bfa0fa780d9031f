use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::ChainSetupError;
use crate::models::FailureKind;
use crate::request::{RequestFailure, RequestPlan, StatusPolicy, send};

/// Progress of the one-shot stage A call
#[derive(Debug, Clone, Default)]
pub enum ChainState {
    #[default]
    Idle,
    StageARunning,
    /// Stage A answered with JSON; the document is the chain context
    Published(Arc<Value>),
    Aborted(String),
}

/// Runs stage A once and publishes its JSON response for stage B templates.
///
/// The context is written once, before any worker exists, and only read
/// afterwards, so it is shared through a plain `Arc`.
#[derive(Debug, Default)]
pub struct ChainOrchestrator {
    state: ChainState,
}

impl ChainOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    /// The published context, if stage A succeeded
    pub fn context(&self) -> Option<Arc<Value>> {
        match &self.state {
            ChainState::Published(context) => Some(context.clone()),
            _ => None,
        }
    }

    /// Execute stage A. It must answer with a 2xx status and a JSON body.
    pub async fn run_stage_a(
        &mut self,
        client: &Client,
        plan: &RequestPlan,
    ) -> Result<Arc<Value>, ChainSetupError> {
        self.state = ChainState::StageARunning;
        info!(
            event = "stage_a_start",
            method = plan.method.as_str(),
            url = plan.url,
            message = "Calling stage A"
        );

        match call_stage_a(client, plan).await {
            Ok((status, context)) => {
                info!(
                    event = "stage_a_success",
                    status_code = status,
                    response = %context,
                    message = "Stage A succeeded, context published"
                );
                let context = Arc::new(context);
                self.state = ChainState::Published(context.clone());
                Ok(context)
            }
            Err(e) => {
                error!(event = "stage_a_failure", error = %e, message = "Stage A failed, run aborted");
                self.state = ChainState::Aborted(e.to_string());
                Err(e)
            }
        }
    }
}

async fn call_stage_a(client: &Client, plan: &RequestPlan) -> Result<(u16, Value), ChainSetupError> {
    let response = send(client, plan, 1, StatusPolicy::RequireSuccess)
        .await
        .map_err(|failure| setup_error(failure, plan))?;
    let context = serde_json::from_slice(&response.body)
        .map_err(|e| ChainSetupError::InvalidJson(e.to_string()))?;
    Ok((response.status, context))
}

fn setup_error(failure: RequestFailure, plan: &RequestPlan) -> ChainSetupError {
    match failure.kind {
        FailureKind::Status(status) => ChainSetupError::Status(status),
        FailureKind::Timeout => ChainSetupError::Timeout(plan.timeout.as_secs_f64() * 1000.0),
        FailureKind::Transport => ChainSetupError::Transport(failure.message),
    }
}
