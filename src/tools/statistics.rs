//! Descriptive statistics over a list of numbers.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{number_value, opt_numbers, opt_strings, Tool, ToolError, ToolResult};

const DEFAULT_OPERATIONS: &[&str] = &[
    "mean", "median", "mode", "std", "variance", "min", "max", "sum",
];

pub fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

fn sorted(data: &[f64]) -> Vec<f64> {
    let mut v = data.to_vec();
    v.sort_by(f64::total_cmp);
    v
}

pub fn median(data: &[f64]) -> f64 {
    let v = sorted(data);
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    }
}

/// Most common value; ties go to the value seen first.
pub fn mode(data: &[f64]) -> f64 {
    let mut best = data[0];
    let mut best_count = 0;
    for (i, x) in data.iter().enumerate() {
        // Count only at the first occurrence so ties keep input order.
        if data[..i].contains(x) {
            continue;
        }
        let count = data.iter().filter(|y| *y == x).count();
        if count > best_count {
            best = *x;
            best_count = count;
        }
    }
    best
}

/// Sample variance (n - 1 denominator); 0 for fewer than two points.
pub fn variance(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(data: &[f64], p: f64) -> f64 {
    let v = sorted(data);
    let rank = (p / 100.0) * (v.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    v[lo] + (v[hi] - v[lo]) * (rank - lo as f64)
}

fn compute(op: &str, data: &[f64]) -> Value {
    let min = || data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = || data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    match op {
        "mean" => number_value(mean(data)),
        "median" => number_value(median(data)),
        "mode" => number_value(mode(data)),
        "std" => number_value(variance(data).sqrt()),
        "variance" => number_value(variance(data)),
        "min" => number_value(min()),
        "max" => number_value(max()),
        "sum" => number_value(data.iter().sum()),
        "count" => json!(data.len()),
        "range" => number_value(max() - min()),
        "percentiles" => json!({
            "25th": number_value(percentile(data, 25.0)),
            "50th": number_value(percentile(data, 50.0)),
            "75th": number_value(percentile(data, 75.0)),
            "90th": number_value(percentile(data, 90.0)),
            "95th": number_value(percentile(data, 95.0)),
            "99th": number_value(percentile(data, 99.0)),
        }),
        other => json!(format!("Unknown operation: {other}")),
    }
}

pub struct StatisticsTool;

#[async_trait]
impl Tool for StatisticsTool {
    fn name(&self) -> &str {
        "statistics"
    }

    fn description(&self) -> &str {
        "Perform statistical calculations on data"
    }

    fn category(&self) -> &str {
        "math"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "data": {
                    "type": "array",
                    "items": {"type": "number"},
                    "description": "Numerical data to analyze"
                },
                "operations": {
                    "type": "array",
                    "items": {
                        "type": "string",
                        "enum": ["mean", "median", "mode", "std", "variance",
                                 "min", "max", "sum", "count", "range", "percentiles"]
                    },
                    "description": "Statistical operations to perform"
                }
            },
            "required": ["data"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let data = opt_numbers(args, "data")?.unwrap_or_default();
        if data.is_empty() {
            return Err(ToolError::InvalidArgument("No data provided".to_string()));
        }

        let operations = opt_strings(args, "operations")?
            .filter(|ops| !ops.is_empty())
            .unwrap_or_else(|| DEFAULT_OPERATIONS.iter().map(|s| s.to_string()).collect());

        let mut results = Map::new();
        for op in &operations {
            results.insert(op.clone(), compute(op, &data));
        }

        Ok(ToolResult::success(Value::Object(results)).with_meta("data_points", data.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_measures() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&data), 5.0);
        assert_eq!(median(&data), 4.5);
        assert_eq!(mode(&data), 4.0);
        assert!((variance(&data) - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(variance(&[3.0]), 0.0);
    }

    #[test]
    fn test_mode_tie_keeps_first_seen() {
        assert_eq!(mode(&[3.0, 1.0, 1.0, 3.0]), 3.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&data, 50.0), 2.5);
        assert_eq!(percentile(&data, 25.0), 1.75);
        assert!((percentile(&data, 99.0) - 3.97).abs() < 1e-9);
        assert_eq!(percentile(&[7.0], 90.0), 7.0);
    }

    #[tokio::test]
    async fn test_tool_default_and_unknown_operations() {
        let args = json!({"data": [1, 2, 3]}).as_object().cloned().unwrap();
        let result = StatisticsTool.execute(&args).await.unwrap();
        assert_eq!(result.data["mean"], json!(2));
        assert_eq!(result.data["sum"], json!(6));
        assert_eq!(result.metadata["data_points"], json!(3));

        let args = json!({"data": [1], "operations": ["count", "skew"]})
            .as_object()
            .cloned()
            .unwrap();
        let result = StatisticsTool.execute(&args).await.unwrap();
        assert_eq!(result.data["count"], json!(1));
        assert_eq!(result.data["skew"], json!("Unknown operation: skew"));

        let args = json!({"data": []}).as_object().cloned().unwrap();
        assert!(StatisticsTool.execute(&args).await.is_err());
    }
}
