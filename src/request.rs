use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::ConfigError;
use crate::models::{FailureKind, Method, RequestConfig, RequestOutcome};
use crate::resolver::substitute;

/// How a non-2xx status is treated by [`send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Hand the response back; the caller classifies it
    Record,
    /// Treat any non-2xx status as an error of the request itself
    RequireSuccess,
}

/// Where request bodies come from
#[derive(Debug, Clone, PartialEq)]
pub enum BodySource {
    Single(Value),
    /// Cycled round-robin by ticket number
    Sequence(Vec<Value>),
    /// A JSON array on disk
    File(PathBuf),
}

impl BodySource {
    /// Interpret a parsed body document. `{"file": "<path>"}` refers to a
    /// file, a non-empty array is a sequence, anything else is sent as is.
    pub fn from_value(value: Value) -> Self {
        if let Some(Value::String(path)) = value.get("file") {
            return BodySource::File(PathBuf::from(path));
        }
        match value {
            Value::Array(items) if !items.is_empty() => BodySource::Sequence(items),
            other => BodySource::Single(other),
        }
    }

    /// Materialize the bodies, loading the file if there is one
    pub fn load(self) -> Result<Vec<Value>, ConfigError> {
        match self {
            BodySource::Single(value) => Ok(vec![value]),
            BodySource::Sequence(values) => Ok(values),
            BodySource::File(path) => {
                let content = std::fs::read_to_string(&path).map_err(|source| {
                    ConfigError::BodyFile {
                        path: path.clone(),
                        source,
                    }
                })?;
                let parsed: Value = serde_json::from_str(&content).map_err(|e| {
                    ConfigError::BodyFileFormat {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                match parsed {
                    Value::Array(items) if items.is_empty() => Ok(vec![Value::Array(items)]),
                    Value::Array(items) => Ok(items),
                    _ => Err(ConfigError::BodyFileFormat {
                        path,
                        reason: "top-level value is not an array".to_string(),
                    }),
                }
            }
        }
    }
}

/// Parse JSON text, falling back to an empty object.
///
/// Blank text is an empty object. Text that fails to parse is an empty object
/// plus a warning message.
pub fn parse_lenient(text: &str, what: &str) -> (Value, Option<String>) {
    let text = text.trim();
    if text.is_empty() {
        return (Value::Object(Map::new()), None);
    }
    match serde_json::from_str(text) {
        Ok(value) => (value, None),
        Err(e) => (
            Value::Object(Map::new()),
            Some(format!("{} is not valid JSON ({}), using {{}}", what, e)),
        ),
    }
}

fn header_map(value: &Value, warnings: &mut Vec<String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Value::Object(map) = value else {
        warnings.push(format!("headers must be a JSON object, got {}, using {{}}", value));
        return headers;
    };

    for (name, value) in map {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&text),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warnings.push(format!("skipping invalid header {}: {}", name, text)),
        }
    }
    headers
}

/// A request template with headers parsed and bodies loaded, shared read-only
/// by every worker.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub method: Method,
    pub url: String,
    pub timeout: Duration,
    pub headers: HeaderMap,
    pub bodies: Vec<Value>,
    /// Template problems found while preparing; the plan is still usable
    pub warnings: Vec<String>,
}

impl RequestPlan {
    /// Build a plan from `config`. With a chain context, `${path}`
    /// placeholders in the header and body text are resolved first.
    pub fn prepare(config: &RequestConfig, context: Option<&Value>) -> Result<Self, ConfigError> {
        let (headers_text, body_text) = match context {
            Some(context) => (
                substitute(&config.headers, context),
                substitute(&config.body, context),
            ),
            None => (config.headers.as_str().into(), config.body.as_str().into()),
        };

        let mut warnings = Vec::new();
        let (headers, warning) = parse_lenient(&headers_text, "headers");
        warnings.extend(warning);
        let (body, warning) = parse_lenient(&body_text, "body");
        warnings.extend(warning);

        let headers = header_map(&headers, &mut warnings);
        let bodies = BodySource::from_value(body).load()?;

        for warning in &warnings {
            warn!(event = "template_warning", url = config.target_url, message = warning.as_str());
        }

        Ok(Self {
            method: config.method,
            url: config.target_url.trim().to_string(),
            timeout: config.timeout,
            headers,
            bodies,
            warnings,
        })
    }

    /// The body for `ticket` (1-based): `bodies[(ticket - 1) mod len]`
    pub fn body_for(&self, ticket: u64) -> &Value {
        let index = (ticket.saturating_sub(1) % self.bodies.len() as u64) as usize;
        &self.bodies[index]
    }
}

/// A response received in full
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub latency_ms: f64,
    pub body: Vec<u8>,
}

/// A request that did not produce a usable response
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFailure {
    pub kind: FailureKind,
    pub message: String,
    pub latency_ms: Option<f64>,
}

impl From<RequestFailure> for RequestOutcome {
    fn from(failure: RequestFailure) -> Self {
        RequestOutcome::Failure {
            kind: failure.kind,
            message: failure.message,
            latency_ms: failure.latency_ms,
        }
    }
}

pub fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn transport_failure(error: reqwest::Error) -> RequestFailure {
    let kind = if error.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::Transport
    };
    RequestFailure {
        kind,
        message: error.to_string(),
        latency_ms: None,
    }
}

/// Send the request for `ticket` and read the whole response body
pub async fn send(
    client: &Client,
    plan: &RequestPlan,
    ticket: u64,
    policy: StatusPolicy,
) -> Result<Response, RequestFailure> {
    let mut request_builder = client
        .request(plan.method.into(), &plan.url)
        .timeout(plan.timeout)
        .headers(plan.headers.clone());

    if plan.method.sends_body() {
        request_builder = request_builder.json(plan.body_for(ticket));
    }

    let start_time = Instant::now();
    let response = request_builder.send().await.map_err(transport_failure)?;
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(transport_failure)?;
    let latency_ms = elapsed_ms(start_time);

    if policy == StatusPolicy::RequireSuccess && !is_success_status(status) {
        return Err(RequestFailure {
            kind: FailureKind::Status(status),
            message: format!("HTTP status {}", status),
            latency_ms: Some(latency_ms),
        });
    }

    Ok(Response {
        status,
        latency_ms,
        body: body.to_vec(),
    })
}

/// Execute one load request and classify it: a status in `[200, 300)` is a
/// success, anything else is a failure.
pub async fn execute(client: &Client, plan: &RequestPlan, ticket: u64) -> RequestOutcome {
    match send(client, plan, ticket, StatusPolicy::Record).await {
        Ok(response) if is_success_status(response.status) => RequestOutcome::Success {
            status: response.status,
            latency_ms: response.latency_ms,
        },
        Ok(response) => RequestOutcome::Failure {
            kind: FailureKind::Status(response.status),
            message: format!("HTTP status {}", response.status),
            latency_ms: Some(response.latency_ms),
        },
        Err(failure) => failure.into(),
    }
}
