//! Caller-side pass/fail helper. The engine itself never applies thresholds;
//! CI wrappers compare a finished `Summary` against operator expressions and
//! turn violations into exit codes.

use crate::stats::Summary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMetric {
    /// Percent of successful requests.
    SuccessRate,
    /// Achieved requests/sec.
    RequestsPerSecond,
    /// Total requests issued.
    Count,
    /// Mean latency (ms) of successful requests.
    LatencyAvg,
    /// Latency percentile (ms); only the summary's p50/p95/p99 exist.
    LatencyP(u32),
}

/// One parsed assertion, e.g. `success_rate>=99` or `p(95)<250`.
#[derive(Debug, Clone)]
pub struct ThresholdExpr {
    pub metric: ThresholdMetric,
    pub op: ThresholdOp,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct ThresholdViolation {
    pub expression: String,
    pub observed: Option<f64>,
}

pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let metric = if left.eq_ignore_ascii_case("success_rate") {
        ThresholdMetric::SuccessRate
    } else if left.eq_ignore_ascii_case("rps") {
        ThresholdMetric::RequestsPerSecond
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdMetric::Count
    } else if left.eq_ignore_ascii_case("avg") {
        ThresholdMetric::LatencyAvg
    } else if let Some(inner) = left.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) {
        let p: u32 = inner
            .parse()
            .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
        if !(1..=100).contains(&p) {
            return Err(format!("percentile out of range in threshold: {raw}"));
        }
        ThresholdMetric::LatencyP(p)
    } else {
        return Err(format!("unknown metric `{left}` in threshold: {raw}"));
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;

    Ok(ThresholdExpr { metric, op, value })
}

/// Evaluates every expression against the summary. An expression whose
/// metric cannot be observed (unsupported percentile) counts as violated.
pub fn evaluate_thresholds(
    summary: &Summary,
    expressions: &[String],
) -> Result<Vec<ThresholdViolation>, String> {
    let mut out = Vec::new();

    for raw in expressions {
        let expr = parse_threshold_expr(raw)?;
        let observed = observed_value(summary, expr.metric);
        let passed = observed
            .map(|v| compare(v, expr.op, expr.value))
            .unwrap_or(false);
        if !passed {
            out.push(ThresholdViolation {
                expression: raw.clone(),
                observed,
            });
        }
    }

    Ok(out)
}

fn compare(left: f64, op: ThresholdOp, right: f64) -> bool {
    match op {
        ThresholdOp::Lt => left < right,
        ThresholdOp::Lte => left <= right,
        ThresholdOp::Gt => left > right,
        ThresholdOp::Gte => left >= right,
        ThresholdOp::Eq => left == right,
    }
}

fn observed_value(summary: &Summary, metric: ThresholdMetric) -> Option<f64> {
    match metric {
        ThresholdMetric::SuccessRate => Some(summary.success_rate),
        ThresholdMetric::RequestsPerSecond => Some(summary.requests_per_second),
        ThresholdMetric::Count => Some(summary.total_requests as f64),
        ThresholdMetric::LatencyAvg => Some(summary.latency_ms.avg),
        ThresholdMetric::LatencyP(p) => match p {
            50 => Some(summary.latency_ms.p50),
            95 => Some(summary.latency_ms.p95),
            99 => Some(summary.latency_ms.p99),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::stats::LatencySummary;
    use std::collections::BTreeMap;

    fn summary() -> Summary {
        Summary {
            duration_seconds: 10.0,
            total_requests: 1000,
            successful_requests: 990,
            success_rate: 99.0,
            requests_per_second: 100.0,
            latency_ms: LatencySummary {
                avg: 40.0,
                p50: 35.0,
                p95: 80.0,
                p99: 120.0,
            },
            status_codes: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = parse_threshold_expr("  p(95)  <=  250  ").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.metric, ThresholdMetric::LatencyP(95));
        assert_eq!(expr.op, ThresholdOp::Lte);
        assert_eq!(expr.value, 250.0);
    }

    #[test]
    fn parse_threshold_expr_rejects_out_of_range_percentiles() {
        let err = match parse_threshold_expr("p(101)<1") {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.contains("out of range"));
    }

    #[test]
    fn parse_threshold_expr_rejects_unknown_metrics() {
        let err = match parse_threshold_expr("bytes>0") {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.contains("unknown metric"));
    }

    #[test]
    fn passing_summary_has_no_violations() {
        let violations = evaluate_thresholds(
            &summary(),
            &[
                "success_rate>=99".to_string(),
                "p(95)<100".to_string(),
                "rps>50".to_string(),
            ],
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(violations.is_empty());
    }

    #[test]
    fn violations_carry_the_observed_value() {
        let violations = evaluate_thresholds(&summary(), &["p(95)<50".to_string()])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].observed, Some(80.0));
    }

    #[test]
    fn unsupported_percentile_counts_as_violated() {
        let violations = evaluate_thresholds(&summary(), &["p(90)<100".to_string()])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].observed, None);
    }
}
