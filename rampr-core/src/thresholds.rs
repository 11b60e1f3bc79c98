use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ThresholdOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "==")]
    Eq,
}

impl ThresholdOp {
    pub fn compare(self, observed: f64, bound: f64) -> bool {
        match self {
            ThresholdOp::Lt => observed < bound,
            ThresholdOp::Lte => observed <= bound,
            ThresholdOp::Gt => observed > bound,
            ThresholdOp::Gte => observed >= bound,
            ThresholdOp::Eq => observed == bound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    /// Percentile in `(0, 100]`.
    P(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-character operators first so `<=` is not read as `<`.
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
        .ok_or_else(|| "missing comparison operator".to_string())?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err("expected `<aggregation><operator><number>`".to_string());
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        "value" => ThresholdAgg::Value,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{left}`"))?;
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile `{inner}`"))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile {inner} out of range (0, 100]"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric bound `{right}`"))?;
    if !value.is_finite() {
        return Err(format!("bound `{right}` is not finite"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

/// Splits `metric{key=value,...}` into the metric name and its tag filter.
pub fn parse_threshold_metric_key(
    key: &str,
) -> std::result::Result<(String, Vec<(String, String)>), String> {
    let key = key.trim();
    let Some(open) = key.find('{') else {
        if key.is_empty() {
            return Err("empty metric name".to_string());
        }
        return Ok((key.to_string(), Vec::new()));
    };

    let name = key[..open].trim();
    let inner = key[open + 1..]
        .strip_suffix('}')
        .ok_or_else(|| "unterminated tag selector".to_string())?;
    if name.is_empty() {
        return Err("empty metric name".to_string());
    }

    let mut tags = Vec::new();
    for pair in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (k, v) = pair
            .split_once('=')
            .or_else(|| pair.split_once(':'))
            .ok_or_else(|| format!("tag selector `{pair}` must be key=value"))?;
        tags.push((k.trim().to_string(), v.trim().to_string()));
    }
    Ok((name.to_string(), tags))
}

/// One `<agg><op><bound>` rule with its abort policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdCondition {
    pub source: String,
    pub expr: ThresholdExpr,
    /// Abort the run as soon as this condition is breached.
    pub abort_on_fail: bool,
    /// Ignore breaches for early-abort purposes until this much run time has
    /// elapsed.
    pub delay_abort_eval: Option<Duration>,
}

impl ThresholdCondition {
    pub fn parse(source: &str) -> std::result::Result<Self, String> {
        Ok(Self {
            source: source.trim().to_string(),
            expr: parse_threshold_expr(source)?,
            abort_on_fail: false,
            delay_abort_eval: None,
        })
    }

    #[must_use]
    pub fn abort_on_fail(mut self, delay: Option<Duration>) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay;
        self
    }
}

/// All conditions configured for one metric key.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    /// The key as written, e.g. `http_req_duration{name=login}`.
    pub key: String,
    pub metric: String,
    pub tags: Vec<(String, String)>,
    pub conditions: Vec<ThresholdCondition>,
}

impl ThresholdSet {
    pub fn new(key: &str, conditions: Vec<ThresholdCondition>) -> Result<Self> {
        let (metric, tags) = parse_threshold_metric_key(key).map_err(|reason| {
            Error::InvalidThreshold {
                metric: key.to_string(),
                expression: String::new(),
                reason,
            }
        })?;
        Ok(Self {
            key: key.trim().to_string(),
            metric,
            tags,
            conditions,
        })
    }

    /// Parses plain condition strings (no abort policy).
    pub fn parse<S: AsRef<str>>(key: &str, expressions: &[S]) -> Result<Self> {
        let conditions = expressions
            .iter()
            .map(|raw| {
                ThresholdCondition::parse(raw.as_ref()).map_err(|reason| Error::InvalidThreshold {
                    metric: key.to_string(),
                    expression: raw.as_ref().to_string(),
                    reason,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(key, conditions)
    }

    pub fn has_abort_conditions(&self) -> bool {
        self.conditions.iter().any(|c| c.abort_on_fail)
    }
}
