//! Power-threshold gating decision. Pure function, no IO: same inputs always
//! produce the same `Decision` (spec invariant 6).

use chrono::{DateTime, Utc};

use crate::types::{Decision, DueSchedulerEntry, MeasurementView, ProviderView};

const POWER_FACTOR_W: f64 = 1.0;
const POWER_FACTOR_KW: f64 = 1_000.0;
const POWER_FACTOR_MW: f64 = 1_000_000.0;

fn power_factor(unit: &str) -> Option<f64> {
    match unit {
        "W" => Some(POWER_FACTOR_W),
        "kW" => Some(POWER_FACTOR_KW),
        "MW" => Some(POWER_FACTOR_MW),
        _ => None,
    }
}

/// Case-insensitive `w|kw|mw` -> canonical `W|kW|MW`; anything else passes
/// through untouched so unrecognized units fail conversion loudly rather
/// than silently normalizing to something wrong.
pub fn normalize_unit(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(match trimmed.to_ascii_lowercase().as_str() {
        "kw" => "kW".to_string(),
        "mw" => "MW".to_string(),
        "w" => "W".to_string(),
        _ => trimmed.to_string(),
    })
}

/// Converts `value` between two power units via watts. Returns `None` if
/// either unit doesn't normalize or isn't one of `W`, `kW`, `MW`.
pub fn convert_power_unit(value: f64, from_unit: Option<&str>, to_unit: Option<&str>) -> Option<f64> {
    let from = normalize_unit(from_unit)?;
    let to = normalize_unit(to_unit)?;
    let from_factor = power_factor(&from)?;
    let to_factor = power_factor(&to)?;
    let watts = value * from_factor;
    Some(watts / to_factor)
}

/// Implements spec section 4.3's table in exact branch order. `provider` and
/// `latest_measurement` are `None` when the corresponding rows don't exist.
pub fn decide(
    entry: &DueSchedulerEntry,
    now_utc: DateTime<Utc>,
    provider: Option<&ProviderView>,
    latest_measurement: Option<&MeasurementView>,
) -> Decision {
    if !entry.use_power_threshold {
        return Decision::allow("SCHEDULER_MATCH");
    }

    let threshold_value = match entry.power_threshold_value {
        Some(v) => v,
        None => return Decision::skip_no_power_data("THRESHOLD_CONFIG_MISSING"),
    };
    let threshold_unit = match normalize_unit(entry.power_threshold_unit.as_deref()) {
        Some(u) => u,
        None => return Decision::skip_no_power_data("THRESHOLD_CONFIG_MISSING"),
    };

    let provider = match provider {
        Some(p) if p.enabled => p,
        _ => return Decision::skip_no_power_data("POWER_PROVIDER_UNAVAILABLE"),
    };

    let expected_interval_sec = match provider.expected_interval_sec {
        Some(s) if s > 0 => s,
        _ => return Decision::skip_no_power_data("POWER_INTERVAL_MISSING"),
    };

    let measurement = match latest_measurement {
        Some(m) => m,
        None => return Decision::skip_no_power_data("POWER_MISSING"),
    };

    let age_sec = (now_utc - measurement.measured_at).num_milliseconds() as f64 / 1000.0;
    if age_sec > expected_interval_sec as f64 {
        return Decision::skip_no_power_data("POWER_STALE");
    }

    let value = match measurement.measured_value {
        Some(v) => v,
        None => return Decision::skip_no_power_data("POWER_MISSING"),
    };

    let provider_unit = normalize_unit(provider.unit.as_deref());
    let measurement_unit =
        normalize_unit(measurement.measured_unit.as_deref()).or(provider_unit);

    let converted = match convert_power_unit(value, measurement_unit.as_deref(), Some(&threshold_unit)) {
        Some(c) => c,
        None => return Decision::skip_no_power_data("POWER_UNIT_MISMATCH"),
    };

    if converted >= threshold_value {
        return Decision::allow_with_measurement("SCHEDULER_MATCH", converted, threshold_unit);
    }

    Decision::skip_threshold_not_met(converted, threshold_unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DecisionKind;
    use scheduler_core::{SchedulerCommandAction, SchedulerDayOfWeek};

    fn entry(use_threshold: bool, value: Option<f64>, unit: Option<&str>) -> DueSchedulerEntry {
        DueSchedulerEntry {
            slot_id: 1,
            scheduler_id: 1,
            device_id: 1,
            microcontroller_id: 1,
            day_of_week: SchedulerDayOfWeek::Mon,
            start_utc_time: None,
            end_utc_time: None,
            use_power_threshold: use_threshold,
            power_provider_id: Some(1),
            power_threshold_value: value,
            power_threshold_unit: unit.map(String::from),
            action: SchedulerCommandAction::On,
        }
    }

    fn provider(enabled: bool, interval: Option<i64>) -> ProviderView {
        ProviderView {
            enabled,
            unit: Some("W".to_string()),
            expected_interval_sec: interval,
        }
    }

    #[test]
    fn no_threshold_always_allows() {
        let e = entry(false, None, None);
        let d = decide(&e, Utc::now(), None, None);
        assert_eq!(d.kind, DecisionKind::AllowOn);
        assert_eq!(d.trigger_reason, "SCHEDULER_MATCH");
    }

    #[test]
    fn missing_threshold_config_skips() {
        let e = entry(true, None, None);
        let d = decide(&e, Utc::now(), None, None);
        assert_eq!(d.kind, DecisionKind::SkipNoPowerData);
        assert_eq!(d.trigger_reason, "THRESHOLD_CONFIG_MISSING");
    }

    #[test]
    fn disabled_provider_skips() {
        let e = entry(true, Some(5000.0), Some("W"));
        let d = decide(&e, Utc::now(), Some(&provider(false, Some(60))), None);
        assert_eq!(d.trigger_reason, "POWER_PROVIDER_UNAVAILABLE");
    }

    #[test]
    fn missing_provider_skips() {
        let e = entry(true, Some(5000.0), Some("W"));
        let d = decide(&e, Utc::now(), None, None);
        assert_eq!(d.trigger_reason, "POWER_PROVIDER_UNAVAILABLE");
    }

    #[test]
    fn missing_interval_skips() {
        let e = entry(true, Some(5000.0), Some("W"));
        let d = decide(&e, Utc::now(), Some(&provider(true, None)), None);
        assert_eq!(d.trigger_reason, "POWER_INTERVAL_MISSING");

        let d = decide(&e, Utc::now(), Some(&provider(true, Some(0))), None);
        assert_eq!(d.trigger_reason, "POWER_INTERVAL_MISSING");
    }

    #[test]
    fn no_measurement_skips() {
        let e = entry(true, Some(5000.0), Some("W"));
        let d = decide(&e, Utc::now(), Some(&provider(true, Some(60))), None);
        assert_eq!(d.trigger_reason, "POWER_MISSING");
    }

    #[test]
    fn stale_measurement_boundary_is_strict_greater_than() {
        let e = entry(true, Some(5000.0), Some("W"));
        let now = Utc::now();
        let exactly_at_interval = MeasurementView {
            measured_at: now - chrono::Duration::seconds(60),
            measured_value: Some(6000.0),
            measured_unit: Some("W".to_string()),
        };
        let d = decide(
            &e,
            now,
            Some(&provider(true, Some(60))),
            Some(&exactly_at_interval),
        );
        assert_eq!(
            d.kind,
            DecisionKind::AllowOn,
            "age == expected_interval_sec must NOT be stale"
        );

        let just_over = MeasurementView {
            measured_at: now - chrono::Duration::seconds(61),
            measured_value: Some(6000.0),
            measured_unit: Some("W".to_string()),
        };
        let d = decide(&e, now, Some(&provider(true, Some(60))), Some(&just_over));
        assert_eq!(d.trigger_reason, "POWER_STALE");
    }

    #[test]
    fn null_measurement_value_skips() {
        let e = entry(true, Some(5000.0), Some("W"));
        let now = Utc::now();
        let m = MeasurementView {
            measured_at: now,
            measured_value: None,
            measured_unit: Some("W".to_string()),
        };
        let d = decide(&e, now, Some(&provider(true, Some(60))), Some(&m));
        assert_eq!(d.trigger_reason, "POWER_MISSING");
    }

    #[test]
    fn unit_mismatch_skips() {
        let e = entry(true, Some(5000.0), Some("W"));
        let now = Utc::now();
        let m = MeasurementView {
            measured_at: now,
            measured_value: Some(6000.0),
            measured_unit: Some("banana".to_string()),
        };
        let d = decide(&e, now, Some(&provider(true, Some(60))), Some(&m));
        assert_eq!(d.trigger_reason, "POWER_UNIT_MISMATCH");
    }

    #[test]
    fn threshold_exactly_equal_allows() {
        let e = entry(true, Some(5.0), Some("kW"));
        let now = Utc::now();
        let m = MeasurementView {
            measured_at: now,
            measured_value: Some(5000.0),
            measured_unit: Some("W".to_string()),
        };
        let d = decide(&e, now, Some(&provider(true, Some(60))), Some(&m));
        assert_eq!(d.kind, DecisionKind::AllowOn, ">= threshold must allow");
        assert_eq!(d.measured_value, Some(5.0));
        assert_eq!(d.measured_unit.as_deref(), Some("kW"));
    }

    #[test]
    fn below_threshold_skips_with_measurement() {
        let e = entry(true, Some(5.0), Some("kW"));
        let now = Utc::now();
        let m = MeasurementView {
            measured_at: now - chrono::Duration::seconds(10),
            measured_value: Some(3000.0),
            measured_unit: Some("W".to_string()),
        };
        let d = decide(&e, now, Some(&provider(true, Some(60))), Some(&m));
        assert_eq!(d.kind, DecisionKind::SkipThresholdNotMet);
        assert_eq!(d.trigger_reason, "THRESHOLD_NOT_MET");
        assert_eq!(d.measured_value, Some(3.0));
    }

    #[test]
    fn measurement_unit_falls_back_to_provider_unit() {
        let mut e = entry(true, Some(5.0), Some("kW"));
        e.power_provider_id = Some(1);
        let now = Utc::now();
        let m = MeasurementView {
            measured_at: now,
            measured_value: Some(6000.0),
            measured_unit: None,
        };
        let d = decide(&e, now, Some(&provider(true, Some(60))), Some(&m));
        assert_eq!(d.kind, DecisionKind::AllowOn);
    }

    #[test]
    fn unit_normalization_is_case_insensitive() {
        assert_eq!(normalize_unit(Some("kw")).as_deref(), Some("kW"));
        assert_eq!(normalize_unit(Some("KW")).as_deref(), Some("kW"));
        assert_eq!(normalize_unit(Some("mW")).as_deref(), Some("MW"));
        assert_eq!(normalize_unit(Some("w")).as_deref(), Some("W"));
        assert_eq!(normalize_unit(Some("banana")).as_deref(), Some("banana"));
        assert_eq!(normalize_unit(Some("  ")), None);
        assert_eq!(normalize_unit(None), None);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        /// Spec invariant 7: round-tripping a value through W -> kW -> W is lossless.
        #[test]
        fn unit_conversion_round_trip(v in 0.0f64..1_000_000.0) {
            let to_kw = convert_power_unit(v, Some("W"), Some("kW")).unwrap();
            let back = convert_power_unit(to_kw, Some("kW"), Some("W")).unwrap();
            prop_assert!((back - v).abs() < 1e-6);
        }

        /// Spec invariant 6: decide() is a pure function of its inputs.
        #[test]
        fn decide_is_deterministic(
            use_threshold in any::<bool>(),
            threshold in 0.0f64..10_000.0,
            measured in 0.0f64..10_000.0,
            interval in 1i64..3600,
            age in 0i64..7200,
        ) {
            let e = DueSchedulerEntry {
                slot_id: 1, scheduler_id: 1, device_id: 1, microcontroller_id: 1,
                day_of_week: SchedulerDayOfWeek::Mon,
                start_utc_time: None, end_utc_time: None,
                use_power_threshold: use_threshold,
                power_provider_id: Some(1),
                power_threshold_value: Some(threshold),
                power_threshold_unit: Some("W".to_string()),
                action: SchedulerCommandAction::On,
            };
            let now = Utc::now();
            let provider = ProviderView { enabled: true, unit: Some("W".to_string()), expected_interval_sec: Some(interval) };
            let measurement = MeasurementView {
                measured_at: now - chrono::Duration::seconds(age),
                measured_value: Some(measured),
                measured_unit: Some("W".to_string()),
            };
            let d1 = decide(&e, now, Some(&provider), Some(&measurement));
            let d2 = decide(&e, now, Some(&provider), Some(&measurement));
            prop_assert_eq!(d1, d2);
        }
    }
}
