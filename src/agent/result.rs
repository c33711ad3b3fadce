//! Agent execution results.
//!
//! Results serialise to a plain map so front-ends, logs, and nested
//! agents can pass them around without knowing the concrete type.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Result of one agent execution.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResult {
    /// Whether execution succeeded
    pub success: bool,
    /// Human-readable output text (partial output on failure)
    pub output: String,
    /// Structured data (varies by agent type)
    pub data: Value,
    /// Error message when failed
    pub error: Option<String>,
    /// Tokens consumed
    pub tokens_used: u64,
    /// Execution wall time in seconds
    pub time_seconds: f64,
    /// Number of tool invocations
    pub tool_calls: u32,
    /// Additional result metadata
    pub metadata: Map<String, Value>,
    /// When the result was created
    pub timestamp: DateTime<Utc>,
}

impl AgentResult {
    /// Create a successful result.
    pub fn ok(output: impl Into<String>) -> Self {
        AgentResult {
            success: true,
            output: output.into(),
            data: Value::Null,
            error: None,
            tokens_used: 0,
            time_seconds: 0.0,
            tool_calls: 0,
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a failure result, optionally with partial output.
    pub fn fail(error: impl Into<String>, output: impl Into<String>) -> Self {
        AgentResult {
            success: false,
            output: output.into(),
            data: Value::Null,
            error: Some(error.into()),
            tokens_used: 0,
            time_seconds: 0.0,
            tool_calls: 0,
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Result for a cancelled run.
    pub fn cancelled(output: impl Into<String>) -> Self {
        Self::fail("Agent execution was cancelled", output)
    }

    /// Result for a timed-out run.
    pub fn timeout(output: impl Into<String>) -> Self {
        Self::fail("Agent execution timed out: max_time exceeded", output)
    }

    /// Builder: attach usage counters.
    pub fn with_usage(mut self, tokens_used: u64, time_seconds: f64, tool_calls: u32) -> Self {
        self.tokens_used = tokens_used;
        self.time_seconds = time_seconds;
        self.tool_calls = tool_calls;
        self
    }

    /// Builder: attach structured data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Builder: attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Serialise to a plain map. Timestamps use ISO-8601 at second
    /// precision.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("success".into(), Value::Bool(self.success));
        map.insert("output".into(), Value::String(self.output.clone()));
        map.insert("data".into(), self.data.clone());
        map.insert(
            "error".into(),
            self.error
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        map.insert("tokens_used".into(), Value::from(self.tokens_used));
        map.insert("time_seconds".into(), Value::from(self.time_seconds));
        map.insert("tool_calls".into(), Value::from(self.tool_calls));
        map.insert("metadata".into(), Value::Object(self.metadata.clone()));
        map.insert(
            "timestamp".into(),
            Value::String(
                self.timestamp
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        );
        map
    }

    /// Deserialise from a plain map.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let success = map
            .get("success")
            .and_then(Value::as_bool)
            .ok_or_else(|| Error::InvalidInput("result map missing 'success'".to_string()))?;
        let output = map
            .get("output")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("result map missing 'output'".to_string()))?
            .to_string();

        let timestamp = match map.get("timestamp").and_then(Value::as_str) {
            Some(text) => DateTime::parse_from_rfc3339(text)
                .map_err(|e| Error::InvalidInput(format!("bad timestamp: {}", e)))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        Ok(AgentResult {
            success,
            output,
            data: map.get("data").cloned().unwrap_or(Value::Null),
            error: map
                .get("error")
                .and_then(Value::as_str)
                .map(String::from),
            tokens_used: map.get("tokens_used").and_then(Value::as_u64).unwrap_or(0),
            time_seconds: map
                .get("time_seconds")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            tool_calls: map.get("tool_calls").and_then(Value::as_u64).unwrap_or(0) as u32,
            metadata: map
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            timestamp,
        })
    }
}

/// Aggregated results from running several agents.
#[derive(Debug, Clone, Default)]
pub struct AggregatedResult {
    /// Individual results
    pub results: Vec<AgentResult>,
}

impl AggregatedResult {
    /// Aggregate a batch of results.
    pub fn new(results: Vec<AgentResult>) -> Self {
        AggregatedResult { results }
    }

    /// Sum of tokens used.
    pub fn total_tokens(&self) -> u64 {
        self.results.iter().map(|r| r.tokens_used).sum()
    }

    /// Sum of execution times.
    pub fn total_time(&self) -> f64 {
        self.results.iter().map(|r| r.time_seconds).sum()
    }

    /// Sum of tool calls.
    pub fn total_tool_calls(&self) -> u32 {
        self.results.iter().map(|r| r.tool_calls).sum()
    }

    /// Number of successful results.
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Number of failed results.
    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    /// All succeeded (and there was at least one).
    pub fn all_succeeded(&self) -> bool {
        !self.results.is_empty() && self.failure_count() == 0
    }

    /// At least one succeeded.
    pub fn any_succeeded(&self) -> bool {
        self.success_count() > 0
    }
}
