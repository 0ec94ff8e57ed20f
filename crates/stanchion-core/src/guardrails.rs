//! Metrics guardrails.
//!
//! A guardrail table maps gauge names to numeric bounds. Composites evaluate
//! their rolled-up metrics against the table after each run, producing a
//! report of anomalies instead of failing the run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Bounds for one gauge. Either side may be open.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GuardrailBound {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// One out-of-bounds gauge observation.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub gauge: String,
    pub value: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// The result of a guardrail evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct GuardrailReport {
    pub is_valid: bool,
    pub anomalies: Vec<Anomaly>,
    pub validated_at: DateTime<Utc>,
}

impl GuardrailReport {
    /// A report with no anomalies, used when no guardrails are configured.
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            anomalies: Vec::new(),
            validated_at: Utc::now(),
        }
    }
}

/// A table of numeric thresholds evaluated per run.
#[derive(Debug, Clone, Default)]
pub struct MetricsGuardrails {
    bounds: BTreeMap<String, GuardrailBound>,
}

impl MetricsGuardrails {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `gauge >= min`.
    pub fn with_min(mut self, gauge: impl Into<String>, min: f64) -> Self {
        self.bounds.entry(gauge.into()).or_default().min = Some(min);
        self
    }

    /// Requires `gauge <= max`.
    pub fn with_max(mut self, gauge: impl Into<String>, max: f64) -> Self {
        self.bounds.entry(gauge.into()).or_default().max = Some(max);
        self
    }

    /// Requires `min <= gauge <= max`.
    pub fn with_range(self, gauge: impl Into<String>, min: f64, max: f64) -> Self {
        let gauge = gauge.into();
        self.with_min(gauge.clone(), min).with_max(gauge, max)
    }

    /// True when no bounds are registered.
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Evaluates the table against a flat map of named gauges. Gauges absent
    /// from the input are skipped; bounds only apply to observed values.
    pub fn validate(&self, gauges: &BTreeMap<String, f64>) -> GuardrailReport {
        let mut anomalies = Vec::new();
        for (name, bound) in &self.bounds {
            let Some(&value) = gauges.get(name) else {
                continue;
            };
            let below = bound.min.map(|min| value < min).unwrap_or(false);
            let above = bound.max.map(|max| value > max).unwrap_or(false);
            if below || above {
                anomalies.push(Anomaly {
                    gauge: name.clone(),
                    value,
                    min: bound.min,
                    max: bound.max,
                });
            }
        }
        GuardrailReport {
            is_valid: anomalies.is_empty(),
            anomalies,
            validated_at: Utc::now(),
        }
    }
}
