//! Aggregations over a list of floats. Empty or too-short inputs fail instead of
//! producing `NaN`; only `Sum` has a natural value (0) for no input.

use serde::{Deserialize, Serialize};

use crate::{Failable, fail};

const NO_VALUES: &str = "no values";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AggregateFn {
    Mean,
    Max,
    Min,
    Sum,
    #[serde(rename = "95P")]
    P95,
    Stdev,
}

impl AggregateFn {
    pub const ALL: &'static [AggregateFn] = &[
        AggregateFn::Mean,
        AggregateFn::Max,
        AggregateFn::Min,
        AggregateFn::Sum,
        AggregateFn::P95,
        AggregateFn::Stdev,
    ];

    /// Suffix used in metric names, e.g. `TotalJoinMSec_95P`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Mean => "Mean",
            Self::Max => "Max",
            Self::Min => "Min",
            Self::Sum => "Sum",
            Self::P95 => "95P",
            Self::Stdev => "Stdev",
        }
    }

    pub fn apply(self, values: &[f64]) -> Failable<f64> {
        match self {
            Self::Mean => mean(values),
            Self::Max => max(values),
            Self::Min => min(values),
            Self::Sum => Ok(values.iter().sum()),
            Self::P95 => percentile(values, 95.0),
            Self::Stdev => stdev(values),
        }
    }
}

pub fn mean(values: &[f64]) -> Failable<f64> {
    if values.is_empty() {
        return fail(NO_VALUES);
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn max(values: &[f64]) -> Failable<f64> {
    values
        .iter()
        .copied()
        .reduce(f64::max)
        .map_or_else(|| fail(NO_VALUES), Ok)
}

pub fn min(values: &[f64]) -> Failable<f64> {
    values
        .iter()
        .copied()
        .reduce(f64::min)
        .map_or_else(|| fail(NO_VALUES), Ok)
}

/// Sample (n - 1) standard deviation.
pub fn stdev(values: &[f64]) -> Failable<f64> {
    if values.len() < 2 {
        return fail("not enough values for stdev");
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Ok((ss / (values.len() - 1) as f64).sqrt())
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(f64::total_cmp);
    out
}

/// Linear interpolation between the order statistics around rank `(n - 1) * pct / 100`.
pub fn percentile(values: &[f64], pct: f64) -> Failable<f64> {
    if values.is_empty() {
        return fail(NO_VALUES);
    }
    debug_assert!((0.0..=100.0).contains(&pct));
    let sorted = sorted(values);
    let rank = (sorted.len() - 1) as f64 * (pct / 100.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Ok(sorted[lo] * (1.0 - frac) + sorted[hi] * frac)
}

/// Middle value, or the mean of the two middle values.
pub fn median(values: &[f64]) -> Failable<f64> {
    if values.is_empty() {
        return fail(NO_VALUES);
    }
    let sorted = sorted(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Ok(sorted[mid])
    } else {
        Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Failure;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_inputs_fail_except_sum() {
        for f in AggregateFn::ALL {
            let out = f.apply(&[]);
            if *f == AggregateFn::Sum {
                assert_eq!(out, Ok(0.0));
            } else {
                assert!(out.is_err(), "{} should fail on empty input", f.name());
            }
        }
        assert_eq!(mean(&[]), Err(Failure::new("no values")));
    }

    #[test]
    fn stdev_needs_two_samples() {
        assert_eq!(stdev(&[]), Err(Failure::new("not enough values for stdev")));
        assert_eq!(stdev(&[4.0]), Err(Failure::new("not enough values for stdev")));
        // mean 5, squared deviations sum to 32, / (8 - 1)
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!(close(stdev(&values).unwrap(), (32.0f64 / 7.0).sqrt()));
    }

    #[test]
    fn p95_interpolates() {
        assert_eq!(percentile(&[7.0], 95.0), Ok(7.0));
        // 10 + 0.95 * (20 - 10)
        assert!(close(percentile(&[20.0, 10.0], 95.0).unwrap(), 19.5));
        let values: Vec<f64> = (1..=21).map(f64::from).collect();
        assert!(close(AggregateFn::P95.apply(&values).unwrap(), 20.0));
    }

    #[test]
    fn min_max_mean_median() {
        let values = [3.0, 1.0, 2.0, 10.0];
        assert_eq!(min(&values), Ok(1.0));
        assert_eq!(max(&values), Ok(10.0));
        assert_eq!(mean(&values), Ok(4.0));
        assert_eq!(median(&values), Ok(2.5));
        assert_eq!(median(&values[..3]), Ok(2.0));
    }

    #[test]
    fn names_match_metric_suffixes() {
        let names: Vec<_> = AggregateFn::ALL.iter().map(|f| f.name()).collect();
        assert_eq!(names, ["Mean", "Max", "Min", "Sum", "95P", "Stdev"]);
    }
}
