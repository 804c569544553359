//! Strategy identifiers and request counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// The tool calling strategies, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Force the detected tool through a named `tool_choice`.
    NamedFunction,
    /// `tool_choice: "auto"` with a tool-use system prompt and low temperature.
    AutoGuided,
    /// Ask the model for a JSON routing decision and answer with a
    /// synthesized tool call.
    StructuredBridge,
    /// Decide with the model, extract parameters by pattern.
    TwoPassRouter,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::NamedFunction,
        Strategy::AutoGuided,
        Strategy::StructuredBridge,
        Strategy::TwoPassRouter,
    ];

    /// Stable label used in stats and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Strategy::NamedFunction => "priority_1",
            Strategy::AutoGuided => "priority_2",
            Strategy::StructuredBridge => "priority_3",
            Strategy::TwoPassRouter => "priority_4",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Strategy::NamedFunction => "Named Function Force",
            Strategy::AutoGuided => "Auto + Guided",
            Strategy::StructuredBridge => "Structured Bridge",
            Strategy::TwoPassRouter => "Two-Pass Router",
        }
    }

    fn index(&self) -> usize {
        match self {
            Strategy::NamedFunction => 0,
            Strategy::AutoGuided => 1,
            Strategy::StructuredBridge => 2,
            Strategy::TwoPassRouter => 3,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.describe(), self.label())
    }
}

/// Lock-free request counters shared by all handlers.
#[derive(Debug, Default)]
pub struct ProxyCounters {
    total_requests: AtomicU64,
    passthrough: AtomicU64,
    failures: AtomicU64,
    successes: [AtomicU64; 4],
}

impl ProxyCounters {
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, strategy: Strategy) {
        self.successes[strategy.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProxyStats {
        let total = self.total_requests.load(Ordering::Relaxed);
        let success = |s: Strategy| self.successes[s.index()].load(Ordering::Relaxed);
        let rate = |count: u64| count as f64 / total.max(1) as f64;

        let statistics = StrategyCounts {
            total_requests: total,
            priority_1_success: success(Strategy::NamedFunction),
            priority_2_success: success(Strategy::AutoGuided),
            priority_3_success: success(Strategy::StructuredBridge),
            priority_4_success: success(Strategy::TwoPassRouter),
            passthrough: self.passthrough.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            fallback_rate: if total == 0 {
                0.0
            } else {
                rate(success(Strategy::StructuredBridge) + success(Strategy::TwoPassRouter))
            },
        };
        let success_rates = SuccessRates {
            priority_1: rate(statistics.priority_1_success),
            priority_2: rate(statistics.priority_2_success),
            priority_3: rate(statistics.priority_3_success),
            priority_4: rate(statistics.priority_4_success),
        };
        ProxyStats {
            statistics,
            success_rates,
        }
    }
}

/// Body of `GET /stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyStats {
    pub statistics: StrategyCounts,
    pub success_rates: SuccessRates,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyCounts {
    pub total_requests: u64,
    pub priority_1_success: u64,
    pub priority_2_success: u64,
    pub priority_3_success: u64,
    pub priority_4_success: u64,
    pub passthrough: u64,
    pub failures: u64,
    /// Share of requests answered by the server-side strategies (3 and 4).
    pub fallback_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessRates {
    pub priority_1: f64,
    pub priority_2: f64,
    pub priority_3: f64,
    pub priority_4: f64,
}
