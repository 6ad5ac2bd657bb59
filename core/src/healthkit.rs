//! Decoder for HealthKit sample payloads.
//!
//! The iOS side serializes `HKQuantitySample` / `HKCategorySample` objects as
//! `{ "type", "startDate", "endDate", "value", "unit" }` using the HealthKit
//! type identifiers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{HealthSample, Platform, SleepStage};
use crate::source::{HealthObservationSource, NativeHealthBridge, overlaps};

const KJ_PER_KCAL: f64 = 4.184;
const KG_PER_LB: f64 = 0.453_592;
const METERS_PER_MILE: f64 = 1_609.344;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HkSample {
    #[serde(rename = "type")]
    kind: String,
    start_date: DateTime<Utc>,
    #[serde(default)]
    end_date: Option<DateTime<Utc>>,
    value: serde_json::Value,
    #[serde(default)]
    unit: Option<String>,
}

pub struct HealthKitSource {
    bridge: Box<dyn NativeHealthBridge>,
}

impl HealthKitSource {
    pub fn new(bridge: Box<dyn NativeHealthBridge>) -> Self {
        Self { bridge }
    }
}

impl HealthObservationSource for HealthKitSource {
    fn platform(&self) -> Platform {
        Platform::HealthKit
    }

    fn is_available(&self) -> bool {
        self.bridge.is_authorized()
    }

    fn read_samples(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<HealthSample>> {
        let payload = self.bridge.query_samples(start, end)?;
        let samples = decode_samples(&payload)?;
        Ok(samples
            .into_iter()
            .filter(|s| overlaps(s, start, end))
            .collect())
    }
}

/// Decode a JSON array of HealthKit samples. Entries with unknown type
/// identifiers or unreadable values are skipped.
pub fn decode_samples(payload: &str) -> Result<Vec<HealthSample>> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(payload).context("HealthKit payload is not a JSON array")?;

    let mut samples = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_value::<HkSample>(value) {
            Ok(sample) => {
                if let Some(s) = convert(&sample) {
                    samples.push(s);
                } else {
                    tracing::debug!(kind = %sample.kind, "skipping unsupported HealthKit sample");
                }
            }
            Err(e) => tracing::debug!("skipping malformed HealthKit sample: {e}"),
        }
    }
    Ok(samples)
}

fn convert(sample: &HkSample) -> Option<HealthSample> {
    let start = sample.start_date;
    let end = sample.end_date.unwrap_or(start);
    let unit = sample.unit.as_deref().unwrap_or("").to_lowercase();
    let kind = sample
        .kind
        .strip_prefix("HKQuantityTypeIdentifier")
        .or_else(|| sample.kind.strip_prefix("HKCategoryTypeIdentifier"))
        .unwrap_or(&sample.kind);

    if kind == "SleepAnalysis" {
        let stage = sleep_stage(&sample.value)?;
        return Some(HealthSample::Sleep { start, end, stage });
    }

    let value = sample.value.as_f64()?;
    let converted = match kind {
        "StepCount" => HealthSample::Steps {
            start,
            end,
            count: value,
        },
        "DistanceWalkingRunning" => HealthSample::Distance {
            start,
            end,
            meters: match unit.as_str() {
                "km" => value * 1000.0,
                "mi" => value * METERS_PER_MILE,
                _ => value,
            },
        },
        "ActiveEnergyBurned" => HealthSample::ActiveEnergy {
            start,
            end,
            kilocalories: if unit == "kj" {
                value / KJ_PER_KCAL
            } else {
                value
            },
        },
        "AppleExerciseTime" => HealthSample::ExerciseTime {
            start,
            end,
            minutes: if unit == "s" { value / 60.0 } else { value },
        },
        "HeartRate" => HealthSample::HeartRate {
            at: start,
            bpm: value,
        },
        "RestingHeartRate" => HealthSample::RestingHeartRate {
            at: start,
            bpm: value,
        },
        "HeartRateVariabilitySDNN" => HealthSample::HeartRateVariability {
            at: start,
            millis: value,
        },
        "BloodPressureSystolic" => HealthSample::BloodPressureSystolic {
            at: start,
            mmhg: value,
        },
        "BloodPressureDiastolic" => HealthSample::BloodPressureDiastolic {
            at: start,
            mmhg: value,
        },
        "BodyMass" => HealthSample::BodyMass {
            at: start,
            kilograms: if unit == "lb" { value * KG_PER_LB } else { value },
        },
        // HealthKit reports body fat as a fraction unless the unit is "%"
        "BodyFatPercentage" => HealthSample::BodyFat {
            at: start,
            percent: if unit == "%" || value > 1.0 {
                value
            } else {
                value * 100.0
            },
        },
        _ => return None,
    };
    Some(converted)
}

fn sleep_stage(value: &serde_json::Value) -> Option<SleepStage> {
    if let Some(raw) = value.as_i64() {
        return match raw {
            0 => Some(SleepStage::InBed),
            1 => Some(SleepStage::Unspecified),
            2 => Some(SleepStage::Awake),
            3 => Some(SleepStage::Light),
            4 => Some(SleepStage::Deep),
            5 => Some(SleepStage::Rem),
            _ => None,
        };
    }
    let name = value.as_str()?;
    let name = name
        .strip_prefix("HKCategoryValueSleepAnalysis")
        .unwrap_or(name);
    match name {
        "InBed" => Some(SleepStage::InBed),
        "Awake" => Some(SleepStage::Awake),
        "AsleepCore" => Some(SleepStage::Light),
        "AsleepDeep" => Some(SleepStage::Deep),
        "AsleepREM" => Some(SleepStage::Rem),
        "Asleep" | "AsleepUnspecified" => Some(SleepStage::Unspecified),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct StaticBridge {
        payload: String,
        authorized: bool,
    }

    impl NativeHealthBridge for StaticBridge {
        fn is_authorized(&self) -> bool {
            self.authorized
        }

        fn query_samples(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<String> {
            Ok(self.payload.clone())
        }
    }

    const PAYLOAD: &str = r#"[
        {"type": "HKQuantityTypeIdentifierStepCount", "startDate": "2024-03-01T08:00:00Z",
         "endDate": "2024-03-01T08:30:00Z", "value": 1200, "unit": "count"},
        {"type": "HKQuantityTypeIdentifierDistanceWalkingRunning", "startDate": "2024-03-01T08:00:00Z",
         "endDate": "2024-03-01T08:30:00Z", "value": 0.9, "unit": "km"},
        {"type": "HKQuantityTypeIdentifierHeartRate", "startDate": "2024-03-01T09:15:00-05:00",
         "value": 72, "unit": "count/min"},
        {"type": "HKQuantityTypeIdentifierBodyFatPercentage", "startDate": "2024-03-01T07:00:00Z",
         "value": 0.215},
        {"type": "HKCategoryTypeIdentifierSleepAnalysis", "startDate": "2024-03-01T01:00:00Z",
         "endDate": "2024-03-01T02:30:00Z", "value": "HKCategoryValueSleepAnalysisAsleepDeep"},
        {"type": "HKQuantityTypeIdentifierDietaryWater", "startDate": "2024-03-01T10:00:00Z",
         "value": 250, "unit": "mL"},
        {"type": "HKQuantityTypeIdentifierStepCount", "value": 10}
    ]"#;

    #[test]
    fn test_decode_known_types() {
        let samples = decode_samples(PAYLOAD).unwrap();
        // Water is unsupported and the last entry has no startDate
        assert_eq!(samples.len(), 5);

        assert!(matches!(samples[0], HealthSample::Steps { count, .. } if (count - 1200.0).abs() < f64::EPSILON));
        assert!(matches!(samples[1], HealthSample::Distance { meters, .. } if (meters - 900.0).abs() < 1e-9));
        match &samples[2] {
            HealthSample::HeartRate { at, bpm } => {
                assert_eq!(*at, Utc.with_ymd_and_hms(2024, 3, 1, 14, 15, 0).unwrap());
                assert!((bpm - 72.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected sample {other:?}"),
        }
        assert!(matches!(samples[3], HealthSample::BodyFat { percent, .. } if (percent - 21.5).abs() < 1e-9));
        assert!(matches!(
            samples[4],
            HealthSample::Sleep {
                stage: SleepStage::Deep,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_numeric_sleep_values() {
        assert_eq!(sleep_stage(&serde_json::json!(0)), Some(SleepStage::InBed));
        assert_eq!(sleep_stage(&serde_json::json!(5)), Some(SleepStage::Rem));
        assert_eq!(sleep_stage(&serde_json::json!(9)), None);
        assert_eq!(
            sleep_stage(&serde_json::json!("HKCategoryValueSleepAnalysisAsleepCore")),
            Some(SleepStage::Light)
        );
    }

    #[test]
    fn test_decode_rejects_non_array() {
        assert!(decode_samples(r#"{"type": "x"}"#).is_err());
    }

    #[test]
    fn test_source_filters_window() {
        let source = HealthKitSource::new(Box::new(StaticBridge {
            payload: PAYLOAD.to_string(),
            authorized: true,
        }));
        assert!(source.is_available());
        assert_eq!(source.platform(), Platform::HealthKit);

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap();
        let samples = source.read_samples(start, end).unwrap();
        // Sleep at 01:00-02:30 falls before the window
        assert_eq!(samples.len(), 4);
        assert!(!samples.iter().any(|s| matches!(s, HealthSample::Sleep { .. })));
    }

    #[test]
    fn test_unit_conversions() {
        let lb: HkSample = serde_json::from_value(serde_json::json!({
            "type": "HKQuantityTypeIdentifierBodyMass",
            "startDate": "2024-03-01T07:00:00Z",
            "value": 160,
            "unit": "lb"
        }))
        .unwrap();
        assert!(matches!(convert(&lb), Some(HealthSample::BodyMass { kilograms, .. }) if (kilograms - 72.57472).abs() < 1e-6));

        let kj: HkSample = serde_json::from_value(serde_json::json!({
            "type": "HKQuantityTypeIdentifierActiveEnergyBurned",
            "startDate": "2024-03-01T07:00:00Z",
            "value": 418.4,
            "unit": "kJ"
        }))
        .unwrap();
        assert!(matches!(convert(&kj), Some(HealthSample::ActiveEnergy { kilocalories, .. }) if (kilocalories - 100.0).abs() < 1e-9));
    }
}
