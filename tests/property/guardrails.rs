//! Guardrail evaluation invariants.

use proptest::prelude::*;
use stanchion_core::MetricsGuardrails;
use std::collections::BTreeMap;

proptest! {
    /// A gauge is anomalous exactly when it falls outside its bounds.
    #[test]
    fn anomaly_iff_out_of_bounds(
        value in -1000.0f64..1000.0,
        min in -500.0f64..500.0,
        span in 0.0f64..500.0,
    ) {
        let max = min + span;
        let rails = MetricsGuardrails::new().with_range("gauge", min, max);
        let mut gauges = BTreeMap::new();
        gauges.insert("gauge".to_string(), value);

        let report = rails.validate(&gauges);
        let out_of_bounds = value < min || value > max;
        prop_assert_eq!(report.is_valid, !out_of_bounds);
        prop_assert_eq!(report.anomalies.len(), usize::from(out_of_bounds));
    }

    /// Gauges without configured bounds never produce anomalies.
    #[test]
    fn unbounded_gauges_always_pass(value in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
        let rails = MetricsGuardrails::new().with_max("other", 1.0);
        let mut gauges = BTreeMap::new();
        gauges.insert("unbounded".to_string(), value);
        prop_assert!(rails.validate(&gauges).is_valid);
    }
}
