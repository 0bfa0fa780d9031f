//! Arquebus - A HTTP load testing engine
//!
//! Arquebus dispatches a fixed number of requests across a fixed number of
//! concurrent workers and reports success rate, throughput, latency and a
//! status-code histogram. It can also chain two endpoints: a single stage A
//! call whose JSON response fills `${path}` placeholders in the headers and
//! body of the load-tested stage B.
//!
//! # Example
//!
//! ```rust,no_run
//! use arquebus::{Method, RunBuilder};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let report = RunBuilder::new("https://example.com/api/items")
//!         .method(Method::Post)
//!         .concurrency(8)
//!         .total_requests(200)
//!         .timeout(Duration::from_secs(5))
//!         .add_header("Content-Type", "application/json")
//!         .bodies(vec![json!({"id": 1}), json!({"id": 2})])
//!         .run()
//!         .await?;
//!
//!     println!("{} ok, {} failed, {:.2} req/s", report.success, report.failure, report.qps);
//!     Ok(())
//! }
//! ```

mod chain;
mod controller;
mod dispatcher;
mod error;
mod models;
mod profile;
mod report;
mod request;
mod resolver;
mod session;
mod stats;

pub use chain::{ChainOrchestrator, ChainState};
pub use controller::{RunController, RunHandle, RunState};
pub use dispatcher::{WorkerContext, WorkerPool};
pub use error::{ChainSetupError, ConfigError, EngineError};
pub use models::{
    ChainConfig, FailureKind, Method, Report, RequestConfig, RequestOutcome, RunConfig, RunEvent,
    RunPlan, StatusKey,
};
pub use profile::{ApiProfile, Profile};
pub use report::{build_report, round2, write_json_report, write_text_report};
pub use request::{
    BodySource, RequestFailure, RequestPlan, Response, StatusPolicy, execute, is_success_status,
    parse_lenient, send,
};
pub use resolver::{Lookup, extract_path, render_value, substitute};
pub use session::RunSession;
pub use stats::{AggregateStats, StatsAggregator};

use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

/// Builder for configuring and running a single-stage load run
#[derive(Debug, Clone)]
pub struct RunBuilder {
    target_url: String,
    method: Method,
    timeout: Duration,
    concurrency: usize,
    total_requests: u64,
    headers: Map<String, Value>,
    headers_text: Option<String>,
    body: Option<String>,
}

impl RunBuilder {
    /// Create a builder for `target_url` with default settings
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            method: Method::Get,
            timeout: Duration::from_secs(5),
            concurrency: 8,
            total_requests: 200,
            headers: Map::new(),
            headers_text: None,
            body: None,
        }
    }

    /// Set the HTTP method
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of concurrent workers
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the total number of requests
    pub fn total_requests(mut self, total_requests: u64) -> Self {
        self.total_requests = total_requests;
        self
    }

    /// Add a single header
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_string(), Value::String(value.to_string()));
        self
    }

    /// Send the same JSON body with every request
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body.to_string());
        self
    }

    /// Cycle through `bodies` by ticket number
    pub fn bodies(mut self, bodies: Vec<Value>) -> Self {
        self.body = Some(Value::Array(bodies).to_string());
        self
    }

    /// Load the bodies from a JSON array file when the run starts
    pub fn body_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        let mut reference = Map::new();
        reference.insert("file".to_string(), Value::String(path));
        self.body = Some(Value::Object(reference).to_string());
        self
    }

    /// Raw header and body JSON text, as a front end would supply it
    pub fn templates(mut self, headers: &str, body: &str) -> Self {
        self.headers_text = Some(headers.to_string());
        self.body = Some(body.to_string());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<RunConfig, ConfigError> {
        let config = RunConfig {
            request: RequestConfig {
                target_url: self.target_url,
                method: self.method,
                timeout: self.timeout,
                headers: self
                    .headers_text
                    .unwrap_or_else(|| Value::Object(self.headers).to_string()),
                body: self.body.unwrap_or_default(),
            },
            concurrency: self.concurrency,
            total_requests: self.total_requests,
        };
        config.validate()?;
        Ok(config)
    }

    /// Run to completion and return the report
    pub async fn run(self) -> Result<Report, EngineError> {
        let config = self.build()?;
        RunSession::new(RunPlan::Single(config))?.run().await
    }
}

/// Helper to build a chained plan: `stage_a` runs once, then `stage_b` is
/// load-tested with placeholders resolved against the stage A response.
pub fn chain(stage_a: RequestConfig, stage_b: RunConfig) -> RunPlan {
    RunPlan::Chain(ChainConfig {
        enabled: true,
        stage_a,
        stage_b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_produces_validated_config() {
        let config = RunBuilder::new("http://localhost:8080/items")
            .method(Method::Put)
            .concurrency(3)
            .total_requests(9)
            .add_header("X-Token", "t")
            .bodies(vec![json!("A"), json!("B")])
            .build()
            .unwrap();

        assert_eq!(config.concurrency, 3);
        assert_eq!(config.total_requests, 9);
        assert_eq!(config.request.method, Method::Put);
        let headers: Value = serde_json::from_str(&config.request.headers).unwrap();
        assert_eq!(headers, json!({"X-Token": "t"}));
        assert_eq!(config.request.body, r#"["A","B"]"#);
    }

    #[test]
    fn builder_rejects_invalid_settings() {
        assert!(matches!(
            RunBuilder::new("localhost:8080").build(),
            Err(ConfigError::InvalidScheme(_))
        ));
        assert!(matches!(
            RunBuilder::new("http://localhost").concurrency(0).build(),
            Err(ConfigError::NotPositive { .. })
        ));
    }

    #[test]
    fn body_file_is_stored_as_file_reference() {
        let config = RunBuilder::new("http://localhost")
            .body_file("/tmp/bodies.json")
            .build()
            .unwrap();
        let body: Value = serde_json::from_str(&config.request.body).unwrap();
        assert_eq!(body, json!({"file": "/tmp/bodies.json"}));
    }
}
