//! Values that may be missing for an expected reason.

use serde::{Deserialize, Serialize};

use std::fmt;

/// Why a metric could not be computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub reason: String,
}

impl Failure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    /// Prefixes the reason with where it surfaced, keeping the original cause.
    pub fn context(self, context: &str) -> Self {
        Self {
            reason: format!("{context}: {}", self.reason),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {}", self.reason)
    }
}

pub type Failable<T> = Result<T, Failure>;

pub fn fail<T>(reason: impl Into<String>) -> Failable<T> {
    Err(Failure::new(reason))
}

/// Collects values until the first failure, which is passed through unchanged.
pub fn all_ok<T>(values: impl IntoIterator<Item = Failable<T>>) -> Failable<Vec<T>> {
    values.into_iter().collect()
}

/// A metric value. Counts are ints, percentages and aggregates are floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl MetricValue {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Renders a report cell. Failures stay visible instead of collapsing to zero or blank.
pub fn render_failable<T: fmt::Display>(value: &Failable<T>) -> String {
    match value {
        Ok(v) => v.to_string(),
        Err(failure) => failure.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ok_passes_first_failure_through() {
        let values = vec![Ok(1), fail("first"), fail("second")];
        assert_eq!(all_ok(values), Err(Failure::new("first")));
        assert_eq!(all_ok(vec![Ok(1), Ok(2)]), Ok(vec![1, 2]));
    }

    #[test]
    fn failures_render_as_error_cells() {
        let missing: Failable<MetricValue> = fail("no values");
        assert_eq!(render_failable(&missing), "error: no values");
        assert_eq!(render_failable(&Ok(MetricValue::Int(0))), "0");
    }

    #[test]
    fn context_keeps_original_reason() {
        let f = Failure::new("no values").context("TotalJoinMSec");
        assert_eq!(f.reason, "TotalJoinMSec: no values");
    }

    #[test]
    fn metric_values_serialize_untagged() {
        let json = serde_json::to_string(&vec![
            MetricValue::Bool(true),
            MetricValue::Int(3),
            MetricValue::Float(1.5),
        ])
        .unwrap();
        assert_eq!(json, "[true,3,1.5]");
    }
}
