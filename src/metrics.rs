//! Prometheus metrics for the proxy and the tool registry.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

const PREFIX: &str = "tool_proxy";

pub struct Metrics {
    registry: Registry,
    requests: IntCounter,
    strategy_success: IntCounterVec,
    strategy_failure: IntCounterVec,
    tool_executions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounter::with_opts(Opts::new(
            format!("{PREFIX}_requests_total"),
            "Chat completion requests handled by the proxy",
        ))?;
        let strategy_success = IntCounterVec::new(
            Opts::new(
                format!("{PREFIX}_strategy_success_total"),
                "Requests answered by each tool calling strategy",
            ),
            &["strategy"],
        )?;
        let strategy_failure = IntCounterVec::new(
            Opts::new(
                format!("{PREFIX}_strategy_failure_total"),
                "Failed attempts per tool calling strategy",
            ),
            &["strategy"],
        )?;
        let tool_executions = IntCounterVec::new(
            Opts::new(
                format!("{PREFIX}_tool_executions_total"),
                "Tool executions by tool and status",
            ),
            &["tool", "status"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(strategy_success.clone()))?;
        registry.register(Box::new(strategy_failure.clone()))?;
        registry.register(Box::new(tool_executions.clone()))?;

        Ok(Self {
            registry,
            requests,
            strategy_success,
            strategy_failure,
            tool_executions,
        })
    }

    pub fn inc_requests(&self) {
        self.requests.inc();
    }

    pub fn inc_strategy(&self, strategy: &str, success: bool) {
        let vec = if success {
            &self.strategy_success
        } else {
            &self.strategy_failure
        };
        vec.with_label_values(&[strategy]).inc();
    }

    pub fn inc_tool(&self, tool: &str, status: &str) {
        self.tool_executions.with_label_values(&[tool, status]).inc();
    }

    /// Text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {e}");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
