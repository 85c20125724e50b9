//! Metrics definitions for token validation and key management.
//!
//! All metrics follow Prometheus naming conventions:
//! - `guard_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `status`: 2-3 values (success, rejected / error, timeout)
//! - `stage`: 5 values (`Stage` variants plus `none`)
//! - `kind`: 13 values (`ErrorKind` variants plus `none`)
//! - `trigger`: 3 values (miss, scheduled, manual)
//! - `result`: 2 values (hit, miss)
//!
//! No exporter is installed here; the embedding service chooses one.

use crate::errors::Rejection;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Validation Metrics
// ============================================================================

/// Record the outcome of one pipeline run.
///
/// Metric: `guard_token_validations_total`, `guard_token_validation_duration_seconds`
/// Labels: `status`, `stage`, `kind`
pub fn record_token_validation(rejection: Option<&Rejection>, duration: Duration) {
    let (status, stage, kind) = match rejection {
        None => ("success", "none", "none"),
        Some(r) => ("rejected", r.stage().as_str(), r.kind().as_str()),
    };

    histogram!("guard_token_validation_duration_seconds",
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("guard_token_validations_total",
        "status" => status,
        "stage" => stage,
        "kind" => kind
    )
    .increment(1);
}

// ============================================================================
// JWKS Metrics
// ============================================================================

/// Record a JWKS refresh attempt.
///
/// Metric: `guard_jwks_refresh_total`, `guard_jwks_refresh_duration_seconds`
/// Labels: `status` (success, error, timeout), `trigger`
pub fn record_jwks_refresh(status: &'static str, trigger: &'static str, duration: Duration) {
    histogram!("guard_jwks_refresh_duration_seconds",
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("guard_jwks_refresh_total",
        "status" => status,
        "trigger" => trigger
    )
    .increment(1);
}

/// Record a key store lookup.
///
/// Metric: `guard_jwks_cache_lookups_total`
/// Labels: `result`
pub fn record_jwks_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("guard_jwks_cache_lookups_total",
        "result" => result
    )
    .increment(1);
}

/// Set the number of usable keys in the current key set.
///
/// Metric: `guard_jwks_keys`
#[allow(clippy::cast_precision_loss)]
pub fn set_jwks_keys(count: usize) {
    gauge!("guard_jwks_keys").set(count as f64);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, Stage};
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_metrics_are_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_token_validation(None, Duration::from_millis(2));
            let rejection =
                Rejection::new(Stage::ClaimsValidation, ErrorKind::Expired, "exp passed");
            record_token_validation(Some(&rejection), Duration::from_millis(1));
            record_token_validation(Some(&rejection), Duration::from_millis(1));
            record_jwks_refresh("success", "miss", Duration::from_millis(40));
            record_jwks_cache_lookup(true);
            record_jwks_cache_lookup(false);
            set_jwks_keys(2);
        });

        let metrics = snapshotter.snapshot().into_vec();

        let rejected_expired = metrics.iter().find(|(key, _, _, _)| {
            let key = key.key();
            key.name() == "guard_token_validations_total"
                && key
                    .labels()
                    .any(|l| l.key() == "kind" && l.value() == "expired")
        });
        assert!(matches!(
            rejected_expired,
            Some((_, _, _, DebugValue::Counter(2)))
        ));

        let names: Vec<&str> = metrics.iter().map(|(key, _, _, _)| key.key().name()).collect();
        for expected in [
            "guard_token_validation_duration_seconds",
            "guard_jwks_refresh_total",
            "guard_jwks_refresh_duration_seconds",
            "guard_jwks_cache_lookups_total",
            "guard_jwks_keys",
        ] {
            assert!(names.contains(&expected), "missing metric {expected}");
        }

        let keys_gauge = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "guard_jwks_keys")
            .map(|(_, _, _, value)| value.clone());
        assert!(matches!(keys_gauge, Some(DebugValue::Gauge(v)) if v.into_inner() == 2.0));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_token_validation(None, Duration::from_millis(1));
        record_jwks_refresh("error", "scheduled", Duration::from_secs(10));
        record_jwks_cache_lookup(false);
        set_jwks_keys(0);
    }
}
