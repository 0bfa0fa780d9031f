//! Saved run profiles.
//!
//! A profile is the JSON document written by a front end. Single-stage
//! profiles look like
//!
//! ```json
//! {"target_url": "https://api.example.com/items", "request_method": "POST",
//!  "thread_num": "8", "total_requests": "200", "timeout": "5",
//!  "headers": "{\"Content-Type\": \"application/json\"}", "data": "{}"}
//! ```
//!
//! and chained profiles as `{"enable_chain": true, "api1": {...}, "api2": {...}}`
//! where `api1` omits `thread_num` and `total_requests`. A document holding
//! any of the chain keys is always read as chained. Numbers may be given as
//! whole JSON numbers or as numeric strings; `headers` and `data` may be JSON
//! text or inline JSON values.

use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::{ChainConfig, Method, RequestConfig, RunConfig, RunPlan};

const DEFAULT_URL: &str = "http://localhost:8080/";
const DEFAULT_THREADS: u64 = 8;
const DEFAULT_TOTAL: u64 = 200;
const DEFAULT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_HEADERS: &str = r#"{"Content-Type": "application/json"}"#;
const DEFAULT_DATA: &str = "{}";

/// Keys that mark a document as chained
const CHAIN_KEYS: [&str; 3] = ["enable_chain", "api1", "api2"];

/// Read a positive whole number given as a JSON number or as numeric text.
/// `8`, `8.0` and `"8"` are all accepted.
fn positive(value: &Value, field: &'static str) -> Result<u64, ConfigError> {
    let (number, shown) = match value {
        Value::Number(n) => (n.as_f64(), n.to_string()),
        Value::String(text) => (text.trim().parse::<f64>().ok(), text.clone()),
        other => (None, other.to_string()),
    };
    match number {
        Some(n) if n >= 1.0 && n.fract() == 0.0 && n <= u64::MAX as f64 => Ok(n as u64),
        _ => Err(ConfigError::NotPositive {
            field,
            value: shown,
        }),
    }
}

/// JSON given either as text or inline
fn json_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// One API section of a profile
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiProfile {
    target_url: Option<String>,
    request_method: Option<String>,
    thread_num: Option<Value>,
    total_requests: Option<Value>,
    timeout: Option<Value>,
    headers: Option<Value>,
    data: Option<Value>,
}

impl ApiProfile {
    fn request(self, default_method: Method) -> Result<RequestConfig, ConfigError> {
        let method = match &self.request_method {
            Some(method) => method.parse()?,
            None => default_method,
        };
        let timeout = match &self.timeout {
            Some(timeout) => positive(timeout, "timeout")?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        Ok(RequestConfig {
            target_url: self.target_url.unwrap_or_else(|| DEFAULT_URL.to_string()),
            method,
            timeout: Duration::from_secs(timeout),
            headers: self
                .headers
                .map(json_text)
                .unwrap_or_else(|| DEFAULT_HEADERS.to_string()),
            body: self
                .data
                .map(json_text)
                .unwrap_or_else(|| DEFAULT_DATA.to_string()),
        })
    }

    fn run(self, default_method: Method) -> Result<RunConfig, ConfigError> {
        let concurrency = match &self.thread_num {
            Some(n) => positive(n, "thread_num")?,
            None => DEFAULT_THREADS,
        };
        let total_requests = match &self.total_requests {
            Some(n) => positive(n, "total_requests")?,
            None => DEFAULT_TOTAL,
        };
        Ok(RunConfig {
            request: self.request(default_method)?,
            concurrency: concurrency as usize,
            total_requests,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChainDocument {
    #[serde(default)]
    enable_chain: bool,
    #[serde(default)]
    api1: ApiProfile,
    api2: ApiProfile,
}

/// A profile document, single-stage or chained
#[derive(Debug, Clone)]
pub enum Profile {
    Chain {
        enable_chain: bool,
        api1: ApiProfile,
        api2: ApiProfile,
    },
    Single(ApiProfile),
}

impl Profile {
    /// Interpret a parsed document. Any of `enable_chain`, `api1` or `api2`
    /// makes it a chained profile, and its sections must then parse.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let Value::Object(map) = &value else {
            return Err(ConfigError::Profile(format!(
                "expected a JSON object, got {}",
                value
            )));
        };

        if CHAIN_KEYS.iter().any(|key| map.contains_key(*key)) {
            let document: ChainDocument = serde_json::from_value(value)
                .map_err(|e| ConfigError::Profile(format!("chained profile: {}", e)))?;
            return Ok(Profile::Chain {
                enable_chain: document.enable_chain,
                api1: document.api1,
                api2: document.api2,
            });
        }

        serde_json::from_value(value)
            .map(Profile::Single)
            .map_err(|e| ConfigError::Profile(e.to_string()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let value = serde_json::from_reader(reader).map_err(|e| ConfigError::Profile(e.to_string()))?;
        Self::from_value(value)
    }

    /// Read a profile from a file, or from standard input when `path` is `stdin`
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if path == "stdin" {
            return Self::from_reader(io::stdin().lock());
        }
        let file = File::open(path)
            .map_err(|e| ConfigError::Profile(format!("failed to open {}: {}", path, e)))?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let value = serde_json::from_str(text).map_err(|e| ConfigError::Profile(e.to_string()))?;
        Self::from_value(value)
    }

    /// Convert into a validated run plan
    pub fn into_plan(self) -> Result<RunPlan, ConfigError> {
        let plan = match self {
            Profile::Single(api) => RunPlan::Single(api.run(Method::Get)?),
            Profile::Chain {
                enable_chain,
                api1,
                api2,
            } => RunPlan::Chain(ChainConfig {
                enabled: enable_chain,
                stage_a: api1.request(Method::Get)?,
                stage_b: api2.run(Method::Post)?,
            }),
        };
        plan.validate()?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_stage_profile_with_text_numbers() {
        let profile = Profile::from_json(
            r#"{
                "target_url": "https://api.example.com/items",
                "request_method": "POST",
                "thread_num": "4",
                "total_requests": "100",
                "timeout": "3",
                "headers": "{\"X-Key\": \"k\"}",
                "data": "[{\"id\": 1}, {\"id\": 2}]"
            }"#,
        )
        .unwrap();

        let RunPlan::Single(config) = profile.into_plan().unwrap() else {
            panic!("expected a single-stage plan");
        };
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.total_requests, 100);
        assert_eq!(config.request.method, Method::Post);
        assert_eq!(config.request.timeout, Duration::from_secs(3));
        assert_eq!(config.request.headers, r#"{"X-Key": "k"}"#);
    }

    #[test]
    fn fills_defaults_for_missing_fields() {
        let profile = Profile::from_json(r#"{"target_url": "http://localhost:3000/"}"#).unwrap();
        let RunPlan::Single(config) = profile.into_plan().unwrap() else {
            panic!("expected a single-stage plan");
        };
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.total_requests, 200);
        assert_eq!(config.request.method, Method::Get);
        assert_eq!(config.request.timeout, Duration::from_secs(5));
        assert_eq!(config.request.body, "{}");
    }

    #[test]
    fn accepts_inline_json_and_numbers() {
        let profile = Profile::from_json(
            r#"{"target_url": "http://localhost/", "thread_num": 2, "total_requests": 10,
                "headers": {"A": "b"}, "data": {"file": "bodies.json"}}"#,
        )
        .unwrap();
        let RunPlan::Single(config) = profile.into_plan().unwrap() else {
            panic!("expected a single-stage plan");
        };
        assert_eq!(config.concurrency, 2);
        let body: Value = serde_json::from_str(&config.request.body).unwrap();
        assert_eq!(body["file"], "bodies.json");
    }

    #[test]
    fn parses_chain_profile() {
        let profile = Profile::from_json(
            r#"{
                "enable_chain": true,
                "api1": {"target_url": "http://localhost/login", "request_method": "POST",
                         "timeout": "5", "headers": "{}", "data": "{\"user\": \"u\"}"},
                "api2": {"target_url": "http://localhost/profile", "thread_num": "8",
                         "total_requests": "200", "timeout": "5",
                         "headers": "{\"token\": \"${token}\"}",
                         "data": "{\"userId\": \"${data.id}\"}"}
            }"#,
        )
        .unwrap();

        let plan = profile.into_plan().unwrap();
        let chain = plan.chain().expect("chain enabled");
        assert_eq!(chain.stage_a.method, Method::Post);
        assert_eq!(chain.stage_b.request.method, Method::Post);
        assert_eq!(chain.stage_b.request.headers, r#"{"token": "${token}"}"#);
        assert_eq!(chain.stage_b.total_requests, 200);
    }

    #[test]
    fn disabled_chain_profile_runs_only_api2() {
        let profile = Profile::from_json(
            r#"{"enable_chain": false, "api2": {"target_url": "http://localhost/b"}}"#,
        )
        .unwrap();
        let plan = profile.into_plan().unwrap();
        assert!(plan.chain().is_none());
        assert_eq!(plan.load_stage().request.target_url, "http://localhost/b");
    }

    #[test]
    fn rejects_invalid_numbers() {
        for bad in [r#""0""#, r#""-3""#, r#""eight""#, "0"] {
            let text = format!(r#"{{"target_url": "http://localhost/", "thread_num": {}}}"#, bad);
            let result = Profile::from_json(&text).unwrap().into_plan();
            assert!(
                matches!(result, Err(ConfigError::NotPositive { field: "thread_num", .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn rejects_bad_url_and_method() {
        let result = Profile::from_json(r#"{"target_url": "localhost/"}"#)
            .unwrap()
            .into_plan();
        assert!(matches!(result, Err(ConfigError::InvalidScheme(_))));

        let result = Profile::from_json(r#"{"target_url": "http://localhost/", "request_method": "PATCH"}"#)
            .unwrap()
            .into_plan();
        assert!(matches!(result, Err(ConfigError::UnsupportedMethod(_))));
    }

    #[test]
    fn accepts_whole_float_numbers() {
        let profile = Profile::from_json(
            r#"{"target_url": "http://localhost/", "thread_num": 8.0, "total_requests": "20.0", "timeout": 2}"#,
        )
        .unwrap();
        let RunPlan::Single(config) = profile.into_plan().unwrap() else {
            panic!("expected a single-stage plan");
        };
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.total_requests, 20);
        assert_eq!(config.request.timeout, Duration::from_secs(2));

        let result = Profile::from_json(r#"{"target_url": "http://localhost/", "thread_num": 2.5}"#)
            .unwrap()
            .into_plan();
        assert!(matches!(
            result,
            Err(ConfigError::NotPositive { field: "thread_num", ref value }) if value == "2.5"
        ));
    }

    #[test]
    fn non_numeric_values_name_the_field() {
        let result = Profile::from_json(r#"{"target_url": "http://localhost/", "total_requests": true}"#)
            .unwrap()
            .into_plan();
        assert!(matches!(
            result,
            Err(ConfigError::NotPositive { field: "total_requests", ref value }) if value == "true"
        ));
    }

    #[test]
    fn broken_chain_section_is_not_read_as_single_stage() {
        let result = Profile::from_json(
            r#"{"enable_chain": true,
                "api1": {"target_url": "http://localhost/login"},
                "api2": {"target_url": "https://api.example.com/items", "thread_num": true}}"#,
        )
        .and_then(Profile::into_plan);
        assert!(matches!(
            result,
            Err(ConfigError::NotPositive { field: "thread_num", .. })
        ));

        let result = Profile::from_json(
            r#"{"enable_chain": true, "api2": {"target_url": ["not", "a", "string"]}}"#,
        );
        assert!(matches!(result, Err(ConfigError::Profile(message)) if message.contains("chained")));

        let result = Profile::from_json(r#"{"enable_chain": true}"#);
        assert!(matches!(result, Err(ConfigError::Profile(message)) if message.contains("api2")));
    }

    #[test]
    fn malformed_document_is_a_profile_error() {
        assert!(matches!(Profile::from_json("[1, 2]"), Err(ConfigError::Profile(_))));
        assert!(matches!(Profile::from_json("{"), Err(ConfigError::Profile(_))));
    }
}
