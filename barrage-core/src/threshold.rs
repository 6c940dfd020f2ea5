use crate::{ConfigError, MetricKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Statistic a threshold reads from a metric summary.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    /// Percentile in (0, 100].
    Percentile(f64),
}

impl Aggregation {
    pub fn supported_by(&self, kind: MetricKind) -> bool {
        use Aggregation::*;
        match kind {
            MetricKind::Trend => matches!(self, Avg | Min | Max | Med | Count | Percentile(_)),
            MetricKind::Counter => matches!(self, Count | Rate),
            MetricKind::Rate => matches!(self, Rate),
            MetricKind::Gauge => matches!(self, Value | Min | Max),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Value => f.write_str("value"),
            Aggregation::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let agg = match s {
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "med" => Aggregation::Med,
            "count" => Aggregation::Count,
            "rate" => Aggregation::Rate,
            "value" => Aggregation::Value,
            _ => {
                let inner = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown aggregation `{s}`"))?;
                let p: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid percentile `{inner}`"))?;
                if !(p > 0. && p <= 100.) {
                    return Err(format!("percentile {p} out of range (0, 100]"));
                }
                Aggregation::Percentile(p)
            }
        };
        Ok(agg)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    pub fn holds(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Eq => lhs == rhs,
            Comparison::Ne => lhs != rhs,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

/// A parsed predicate such as `p(99)<50ms` or `rate < 0.01`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    /// Milliseconds when `has_unit` is set.
    pub value: f64,
    pub has_unit: bool,
}

impl ThresholdExpr {
    pub fn holds(&self, observed: f64) -> bool {
        self.comparison.holds(observed, self.value)
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregation,
            self.comparison.as_str(),
            self.value
        )?;
        if self.has_unit {
            f.write_str("ms")?;
        }
        Ok(())
    }
}

impl FromStr for ThresholdExpr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let idx = s
            .find(&['<', '>', '=', '!'][..])
            .ok_or_else(|| "missing comparison operator".to_string())?;
        let (lhs, rest) = s.split_at(idx);

        let (comparison, rhs) = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("==", Comparison::Eq),
            ("!=", Comparison::Ne),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ]
        .iter()
        .find_map(|(op, cmp)| rest.strip_prefix(op).map(|rhs| (*cmp, rhs)))
        .ok_or_else(|| format!("invalid operator in `{rest}`"))?;

        let aggregation: Aggregation = lhs.trim().parse()?;
        let (value, has_unit) = parse_value(rhs.trim())?;

        Ok(Self {
            aggregation,
            comparison,
            value,
            has_unit,
        })
    }
}

fn parse_value(s: &str) -> Result<(f64, bool), String> {
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let num: f64 = num
        .parse()
        .map_err(|_| format!("invalid threshold value `{s}`"))?;
    if !num.is_finite() {
        return Err(format!("invalid threshold value `{s}`"));
    }

    let scale = match unit.trim() {
        "" => return Ok((num, false)),
        "us" | "µs" => 1e-3,
        "ms" => 1.,
        "s" => 1e3,
        "m" => 60e3,
        other => return Err(format!("unknown unit `{other}`")),
    };
    Ok((num * scale, true))
}

/// An SLO predicate attached to one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    /// The expression as written in the config.
    pub source: String,
    pub expr: ThresholdExpr,
    /// Stop the run early when this threshold fails during a live evaluation.
    pub abort_on_fail: bool,
    /// Live evaluation is not considered before this much of the run has elapsed.
    pub delay_abort_eval: Duration,
}

impl Threshold {
    pub fn parse(metric: &str, source: &str) -> Result<Self, ConfigError> {
        let expr = source
            .parse()
            .map_err(|reason| ConfigError::InvalidThreshold {
                metric: metric.to_string(),
                expression: source.to_string(),
                reason,
            })?;

        Ok(Self {
            metric: metric.to_string(),
            source: source.to_string(),
            expr,
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        })
    }

    pub fn abort_on_fail_after(mut self, delay: Duration) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay;
        self
    }

    /// Check the threshold is meaningful for a metric of the given kind.
    pub fn validate(&self, kind: MetricKind) -> Result<(), ConfigError> {
        if !self.expr.aggregation.supported_by(kind) {
            return Err(ConfigError::UnsupportedAggregation {
                metric: self.metric.clone(),
                kind,
                aggregation: self.expr.aggregation.to_string(),
            });
        }

        if self.expr.has_unit && kind != MetricKind::Trend {
            return Err(ConfigError::InvalidThreshold {
                metric: self.metric.clone(),
                expression: self.source.clone(),
                reason: format!("duration units only apply to trend metrics, not {kind}"),
            });
        }

        Ok(())
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.source)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    /// The metric had no samples to judge.
    Indeterminate,
}

impl Verdict {
    /// Pass only if every verdict passed; any failure outranks indeterminate.
    pub fn combine<'a>(verdicts: impl IntoIterator<Item = &'a Verdict>) -> Verdict {
        let mut overall = Verdict::Pass;
        for v in verdicts {
            match v {
                Verdict::Fail => return Verdict::Fail,
                Verdict::Indeterminate => overall = Verdict::Indeterminate,
                Verdict::Pass => {}
            }
        }
        overall
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Indeterminate => "indeterminate",
        };
        f.write_str(s)
    }
}
