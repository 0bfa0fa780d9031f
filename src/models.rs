use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// HTTP methods supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// Whether a JSON body is attached to requests with this method
    pub fn sends_body(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            _ => Err(ConfigError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A single request description, without any load parameters.
///
/// `headers` and `body` are JSON text. In chain mode they may contain
/// `${path}` placeholders that are resolved against the stage A response.
/// A body of the form `{"file": "<path>"}` loads a JSON array of bodies from
/// disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// The URL to request
    pub target_url: String,
    /// The HTTP method
    pub method: Method,
    /// Timeout for each request
    pub timeout: Duration,
    /// Header object as JSON text
    pub headers: String,
    /// Body value, body array or file reference as JSON text
    pub body: String,
}

impl RequestConfig {
    pub fn new(method: Method, target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            method,
            timeout: Duration::from_secs(5),
            headers: String::new(),
            body: String::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url(&self.target_url)?;
        if self.timeout.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "timeout",
                value: format!("{:?}", self.timeout),
            });
        }
        Ok(())
    }
}

/// Parameters for a bounded load run against one endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(flatten)]
    pub request: RequestConfig,
    /// Number of concurrent workers
    pub concurrency: usize,
    /// Total number of requests to dispatch
    pub total_requests: u64,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.request.validate()?;
        if self.concurrency < 1 {
            return Err(ConfigError::NotPositive {
                field: "concurrency",
                value: self.concurrency.to_string(),
            });
        }
        if self.total_requests < 1 {
            return Err(ConfigError::NotPositive {
                field: "total_requests",
                value: self.total_requests.to_string(),
            });
        }
        Ok(())
    }
}

/// Two-stage run: stage A is called once, its JSON response seeds the
/// placeholders of the stage B load run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub enabled: bool,
    pub stage_a: RequestConfig,
    pub stage_b: RunConfig,
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled {
            self.stage_a.validate()?;
        }
        self.stage_b.validate()
    }
}

/// What a session executes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunPlan {
    Single(RunConfig),
    Chain(ChainConfig),
}

impl RunPlan {
    /// The configuration of the load-tested stage
    pub fn load_stage(&self) -> &RunConfig {
        match self {
            RunPlan::Single(config) => config,
            RunPlan::Chain(chain) => &chain.stage_b,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            RunPlan::Single(config) => config.validate(),
            RunPlan::Chain(chain) => chain.validate(),
        }
    }

    /// Chain configuration, if stage A must run first
    pub fn chain(&self) -> Option<&ChainConfig> {
        match self {
            RunPlan::Chain(chain) if chain.enabled => Some(chain),
            _ => None,
        }
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::InvalidScheme(url.to_string()));
    }
    Url::parse(url).map_err(|source| ConfigError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;
    Ok(())
}

/// Histogram key: an HTTP status code or the `ERROR` sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusKey {
    Code(u16),
    Error,
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKey::Code(code) => write!(f, "{}", code),
            StatusKey::Error => f.write_str("ERROR"),
        }
    }
}

impl Serialize for StatusKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Why a request counted as a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum FailureKind {
    /// The server answered with a status outside `[200, 300)`
    Status(u16),
    /// The request did not finish within the configured timeout
    Timeout,
    /// Connection, protocol or body read error
    Transport,
}

/// Result of executing one request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    Success {
        status: u16,
        latency_ms: f64,
    },
    Failure {
        kind: FailureKind,
        message: String,
        latency_ms: Option<f64>,
    },
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success { .. })
    }

    pub fn latency_ms(&self) -> Option<f64> {
        match self {
            RequestOutcome::Success { latency_ms, .. } => Some(*latency_ms),
            RequestOutcome::Failure { latency_ms, .. } => *latency_ms,
        }
    }

    /// The key this outcome is counted under in the status histogram
    pub fn status_key(&self) -> StatusKey {
        match self {
            RequestOutcome::Success { status, .. } => StatusKey::Code(*status),
            RequestOutcome::Failure { .. } => StatusKey::Error,
        }
    }
}

/// Live events published while a session runs
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// Stage A succeeded and its response is available to stage B
    ChainPublished { context: serde_json::Value },
    /// Stage A failed, the run was cancelled before dispatch
    ChainAborted { message: String },
    /// A header or body template could not be parsed and was replaced by `{}`
    Warning { message: String },
    Started { total: u64, concurrency: usize },
    TicketClaimed { ticket: u64, total: u64 },
    TicketCompleted {
        ticket: u64,
        method: Method,
        status: StatusKey,
        outcome: RequestOutcome,
    },
    Stopped { completed: u64, total: u64 },
    Finished { completed: u64, total: u64 },
}

/// Derived metrics of a run, rounded for presentation
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub target_url: String,
    pub method: Method,
    pub concurrency: usize,
    pub total_requests: u64,
    pub completed: u64,
    pub success: u64,
    pub failure: u64,
    /// Whether the run was stopped before every ticket completed
    pub stopped: bool,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Wall-clock duration of the run in seconds
    pub elapsed_secs: f64,
    /// Successful requests as a percentage of the total
    pub success_rate: f64,
    /// Requests per second
    pub qps: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub status_codes: BTreeMap<StatusKey, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_config(url: &str) -> RunConfig {
        RunConfig {
            request: RequestConfig::new(Method::Get, url),
            concurrency: 2,
            total_requests: 10,
        }
    }

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
        assert_eq!(" DELETE ".parse::<Method>().unwrap(), Method::Delete);
        assert!(matches!(
            "PATCH".parse::<Method>(),
            Err(ConfigError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn rejects_urls_without_http_scheme() {
        let config = run_config("ftp://example.com");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidScheme(_))));

        let config = run_config("example.com/api");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidScheme(_))));
    }

    #[test]
    fn rejects_non_positive_parameters() {
        let mut config = run_config("http://localhost:8080/api");
        config.concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive { field: "concurrency", .. })
        ));

        let mut config = run_config("http://localhost:8080/api");
        config.total_requests = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive { field: "total_requests", .. })
        ));

        let mut config = run_config("https://localhost:8080/api");
        config.request.timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive { field: "timeout", .. })
        ));
    }

    #[test]
    fn disabled_chain_skips_stage_a_validation() {
        let chain = ChainConfig {
            enabled: false,
            stage_a: RequestConfig::new(Method::Get, "not a url"),
            stage_b: run_config("http://localhost/b"),
        };
        assert!(chain.validate().is_ok());
        assert!(RunPlan::Chain(chain).chain().is_none());
    }

    #[test]
    fn status_keys_order_codes_before_error() {
        let mut keys = vec![StatusKey::Error, StatusKey::Code(500), StatusKey::Code(200)];
        keys.sort();
        assert_eq!(
            keys,
            vec![StatusKey::Code(200), StatusKey::Code(500), StatusKey::Error]
        );
        assert_eq!(StatusKey::Error.to_string(), "ERROR");
        assert_eq!(
            serde_json::to_string(&StatusKey::Code(404)).unwrap(),
            "\"404\""
        );
    }
}
