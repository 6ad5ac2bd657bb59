//! Decoder for Health Connect record payloads.
//!
//! The Android side serializes `androidx.health.connect` records with a
//! `recordType` tag and the record's own field names.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{HealthSample, Platform, SleepStage};
use crate::source::{HealthObservationSource, NativeHealthBridge, overlaps};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Length {
    in_meters: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Energy {
    in_kilocalories: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pressure {
    in_millimeters_of_mercury: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Mass {
    in_kilograms: f64,
}

#[derive(Debug, Deserialize)]
struct Percentage {
    value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartRateSample {
    time: DateTime<Utc>,
    beats_per_minute: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SleepStageRecord {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    stage: i64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "recordType", rename_all_fields = "camelCase")]
enum HcRecord {
    Steps {
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        count: f64,
    },
    Distance {
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        distance: Length,
    },
    ActiveCaloriesBurned {
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        energy: Energy,
    },
    ExerciseSession {
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    },
    HeartRate {
        samples: Vec<HeartRateSample>,
    },
    RestingHeartRate {
        time: DateTime<Utc>,
        beats_per_minute: f64,
    },
    HeartRateVariabilityRmssd {
        time: DateTime<Utc>,
        heart_rate_variability_millis: f64,
    },
    SleepSession {
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        #[serde(default)]
        stages: Vec<SleepStageRecord>,
    },
    BloodPressure {
        time: DateTime<Utc>,
        systolic: Pressure,
        diastolic: Pressure,
    },
    Weight {
        time: DateTime<Utc>,
        weight: Mass,
    },
    BodyFat {
        time: DateTime<Utc>,
        percentage: Percentage,
    },
    #[serde(other)]
    Unsupported,
}

pub struct HealthConnectSource {
    bridge: Box<dyn NativeHealthBridge>,
}

impl HealthConnectSource {
    pub fn new(bridge: Box<dyn NativeHealthBridge>) -> Self {
        Self { bridge }
    }
}

impl HealthObservationSource for HealthConnectSource {
    fn platform(&self) -> Platform {
        Platform::HealthConnect
    }

    fn is_available(&self) -> bool {
        self.bridge.is_authorized()
    }

    fn read_samples(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<HealthSample>> {
        let payload = self.bridge.query_samples(start, end)?;
        let samples = decode_records(&payload)?;
        Ok(samples
            .into_iter()
            .filter(|s| overlaps(s, start, end))
            .collect())
    }
}

/// Decode a JSON array of Health Connect records into normalized samples.
/// A heart-rate series expands to one sample per reading; a sleep session
/// expands to one sample per stage.
pub fn decode_records(payload: &str) -> Result<Vec<HealthSample>> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(payload).context("Health Connect payload is not a JSON array")?;

    let mut samples = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_value::<HcRecord>(value) {
            Ok(HcRecord::Unsupported) => {
                tracing::debug!("skipping unsupported Health Connect record");
            }
            Ok(record) => expand(record, &mut samples),
            Err(e) => tracing::debug!("skipping malformed Health Connect record: {e}"),
        }
    }
    Ok(samples)
}

fn expand(record: HcRecord, out: &mut Vec<HealthSample>) {
    match record {
        HcRecord::Steps {
            start_time,
            end_time,
            count,
        } => out.push(HealthSample::Steps {
            start: start_time,
            end: end_time,
            count,
        }),
        HcRecord::Distance {
            start_time,
            end_time,
            distance,
        } => out.push(HealthSample::Distance {
            start: start_time,
            end: end_time,
            meters: distance.in_meters,
        }),
        HcRecord::ActiveCaloriesBurned {
            start_time,
            end_time,
            energy,
        } => out.push(HealthSample::ActiveEnergy {
            start: start_time,
            end: end_time,
            kilocalories: energy.in_kilocalories,
        }),
        HcRecord::ExerciseSession {
            start_time,
            end_time,
        } => out.push(HealthSample::ExerciseTime {
            start: start_time,
            end: end_time,
            minutes: minutes_between(start_time, end_time),
        }),
        HcRecord::HeartRate { samples } => {
            out.extend(samples.into_iter().map(|s| HealthSample::HeartRate {
                at: s.time,
                bpm: s.beats_per_minute,
            }));
        }
        HcRecord::RestingHeartRate {
            time,
            beats_per_minute,
        } => out.push(HealthSample::RestingHeartRate {
            at: time,
            bpm: beats_per_minute,
        }),
        HcRecord::HeartRateVariabilityRmssd {
            time,
            heart_rate_variability_millis,
        } => out.push(HealthSample::HeartRateVariability {
            at: time,
            millis: heart_rate_variability_millis,
        }),
        HcRecord::SleepSession {
            start_time,
            end_time,
            stages,
        } => {
            if stages.is_empty() {
                out.push(HealthSample::Sleep {
                    start: start_time,
                    end: end_time,
                    stage: SleepStage::Unspecified,
                });
            } else {
                out.extend(stages.into_iter().filter_map(|s| {
                    Some(HealthSample::Sleep {
                        start: s.start_time,
                        end: s.end_time,
                        stage: sleep_stage(s.stage)?,
                    })
                }));
            }
        }
        HcRecord::BloodPressure {
            time,
            systolic,
            diastolic,
        } => {
            out.push(HealthSample::BloodPressureSystolic {
                at: time,
                mmhg: systolic.in_millimeters_of_mercury,
            });
            out.push(HealthSample::BloodPressureDiastolic {
                at: time,
                mmhg: diastolic.in_millimeters_of_mercury,
            });
        }
        HcRecord::Weight { time, weight } => out.push(HealthSample::BodyMass {
            at: time,
            kilograms: weight.in_kilograms,
        }),
        HcRecord::BodyFat { time, percentage } => out.push(HealthSample::BodyFat {
            at: time,
            percent: percentage.value,
        }),
        HcRecord::Unsupported => {}
    }
}

/// `SleepSessionRecord.STAGE_TYPE_*` constants.
fn sleep_stage(stage: i64) -> Option<SleepStage> {
    match stage {
        0 | 2 => Some(SleepStage::Unspecified),
        1 | 7 => Some(SleepStage::Awake),
        3 => Some(SleepStage::InBed),
        4 => Some(SleepStage::Light),
        5 => Some(SleepStage::Deep),
        6 => Some(SleepStage::Rem),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn minutes_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    ((end - start).num_seconds().max(0) as f64) / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PAYLOAD: &str = r#"[
        {"recordType": "Steps", "startTime": "2024-03-01T08:00:00Z",
         "endTime": "2024-03-01T09:00:00Z", "count": 2400},
        {"recordType": "Distance", "startTime": "2024-03-01T08:00:00Z",
         "endTime": "2024-03-01T09:00:00Z", "distance": {"inMeters": 1800}},
        {"recordType": "ExerciseSession", "startTime": "2024-03-01T17:00:00Z",
         "endTime": "2024-03-01T17:45:00Z", "exerciseType": 56},
        {"recordType": "HeartRate", "startTime": "2024-03-01T10:00:00Z", "endTime": "2024-03-01T10:05:00Z",
         "samples": [{"time": "2024-03-01T10:00:00Z", "beatsPerMinute": 64},
                     {"time": "2024-03-01T10:05:00Z", "beatsPerMinute": 70}]},
        {"recordType": "SleepSession", "startTime": "2024-02-29T23:00:00Z", "endTime": "2024-03-01T06:00:00Z",
         "stages": [{"startTime": "2024-02-29T23:00:00Z", "endTime": "2024-03-01T01:00:00Z", "stage": 4},
                    {"startTime": "2024-03-01T01:00:00Z", "endTime": "2024-03-01T02:00:00Z", "stage": 5},
                    {"startTime": "2024-03-01T02:00:00Z", "endTime": "2024-03-01T02:10:00Z", "stage": 1},
                    {"startTime": "2024-03-01T02:10:00Z", "endTime": "2024-03-01T03:00:00Z", "stage": 42}]},
        {"recordType": "BloodPressure", "time": "2024-03-01T07:30:00Z",
         "systolic": {"inMillimetersOfMercury": 121}, "diastolic": {"inMillimetersOfMercury": 79}},
        {"recordType": "Hydration", "startTime": "2024-03-01T07:30:00Z", "endTime": "2024-03-01T07:31:00Z"},
        {"recordType": "Weight", "time": "2024-03-01T07:00:00Z"}
    ]"#;

    #[test]
    fn test_decode_records() {
        let samples = decode_records(PAYLOAD).unwrap();
        // steps, distance, exercise, 2 heart rates, 3 known sleep stages, 2 blood pressure
        assert_eq!(samples.len(), 10);

        assert!(matches!(samples[1], HealthSample::Distance { meters, .. } if (meters - 1800.0).abs() < f64::EPSILON));
        assert!(matches!(samples[2], HealthSample::ExerciseTime { minutes, .. } if (minutes - 45.0).abs() < f64::EPSILON));
        assert!(matches!(samples[4], HealthSample::HeartRate { bpm, .. } if (bpm - 70.0).abs() < f64::EPSILON));
        assert!(matches!(
            samples[6],
            HealthSample::Sleep {
                stage: SleepStage::Deep,
                ..
            }
        ));
        assert!(matches!(
            samples[7],
            HealthSample::Sleep {
                stage: SleepStage::Awake,
                ..
            }
        ));
        assert!(matches!(samples[9], HealthSample::BloodPressureDiastolic { mmhg, .. } if (mmhg - 79.0).abs() < f64::EPSILON));
    }

    #[test]
    fn test_session_without_stages_is_unspecified_sleep() {
        let samples = decode_records(
            r#"[{"recordType": "SleepSession", "startTime": "2024-02-29T23:00:00Z",
                 "endTime": "2024-03-01T06:00:00Z"}]"#,
        )
        .unwrap();
        assert_eq!(
            samples,
            vec![HealthSample::Sleep {
                start: Utc.with_ymd_and_hms(2024, 2, 29, 23, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap(),
                stage: SleepStage::Unspecified,
            }]
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_records("not json").is_err());
        assert!(decode_records("[]").unwrap().is_empty());
    }
}
