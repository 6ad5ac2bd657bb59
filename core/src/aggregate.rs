use chrono::{DateTime, Utc};

use crate::models::{HealthObservation, HealthSample, SleepStage};
use crate::source::SyncWindow;

#[derive(Default)]
struct Latest {
    at: Option<DateTime<Utc>>,
    value: Option<f64>,
}

impl Latest {
    fn offer(&mut self, at: DateTime<Utc>, value: f64) {
        if self.at.is_none_or(|seen| at >= seen) {
            self.at = Some(at);
            self.value = Some(value);
        }
    }
}

fn add(total: &mut Option<f64>, value: f64) {
    *total = Some(total.unwrap_or(0.0) + value);
}

#[allow(clippy::cast_precision_loss)]
fn clipped_minutes(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> f64 {
    let start = start.max(from);
    let end = end.min(to);
    ((end - start).num_seconds().max(0) as f64) / 60.0
}

/// Share of `[start, end]` that falls inside `[from, to]`. Point samples
/// (zero length) count fully.
#[allow(clippy::cast_precision_loss)]
fn share_inside(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> f64 {
    let total = (end - start).num_seconds();
    if total <= 0 {
        return 1.0;
    }
    let inside = (end.min(to) - start.max(from)).num_seconds().clamp(0, total);
    inside as f64 / total as f64
}

/// Reduce platform samples into today's partial observation.
///
/// Interval metrics overlapping today are summed, prorated by the share of
/// each sample that falls inside today; point metrics keep the most
/// recent reading; sleep stages are read from `window.sleep_start`. Metrics
/// with no samples stay unobserved. Hydration and mindfulness are user-edited
/// and never come from a platform.
#[must_use]
pub fn summarize(samples: &[HealthSample], window: &SyncWindow) -> HealthObservation {
    let mut obs = HealthObservation::default();
    let mut heart_rate = Latest::default();
    let mut resting = Latest::default();
    let mut hrv = Latest::default();
    let mut systolic = Latest::default();
    let mut diastolic = Latest::default();
    let mut weight = Latest::default();
    let mut body_fat = Latest::default();

    let mut saw_sleep = false;
    let (mut asleep, mut awake) = (0.0, 0.0);
    let (mut deep, mut rem, mut light) = (0.0, 0.0, 0.0);

    for sample in samples {
        if let HealthSample::Sleep { start, end, stage } = *sample {
            if end <= window.sleep_start || start > window.end {
                continue;
            }
            saw_sleep = true;
            let minutes = clipped_minutes(start, end, window.sleep_start, window.end);
            match stage {
                SleepStage::Deep => deep += minutes,
                SleepStage::Rem => rem += minutes,
                SleepStage::Light => light += minutes,
                SleepStage::Awake => awake += minutes,
                SleepStage::InBed | SleepStage::Unspecified => {}
            }
            if stage.is_asleep() {
                asleep += minutes;
            }
            continue;
        }

        if sample.end() <= window.day_start || sample.start() > window.end {
            continue;
        }

        let share = share_inside(sample.start(), sample.end(), window.day_start, window.end);
        match *sample {
            HealthSample::Steps { count, .. } => add(&mut obs.steps, count * share),
            HealthSample::Distance { meters, .. } => {
                add(&mut obs.distance, meters * share / 1000.0);
            }
            HealthSample::ActiveEnergy { kilocalories, .. } => {
                add(&mut obs.calories, kilocalories * share);
            }
            HealthSample::ExerciseTime { minutes, .. } => {
                add(&mut obs.active_minutes, minutes * share);
            }
            HealthSample::HeartRate { at, bpm } => heart_rate.offer(at, bpm),
            HealthSample::RestingHeartRate { at, bpm } => resting.offer(at, bpm),
            HealthSample::HeartRateVariability { at, millis } => hrv.offer(at, millis),
            HealthSample::BloodPressureSystolic { at, mmhg } => systolic.offer(at, mmhg),
            HealthSample::BloodPressureDiastolic { at, mmhg } => diastolic.offer(at, mmhg),
            HealthSample::BodyMass { at, kilograms } => weight.offer(at, kilograms),
            HealthSample::BodyFat { at, percent } => body_fat.offer(at, percent),
            HealthSample::Sleep { .. } => {}
        }
    }

    obs.heart_rate = heart_rate.value;
    obs.resting_heart_rate = resting.value;
    obs.hrv = hrv.value;
    obs.blood_pressure_systolic = systolic.value;
    obs.blood_pressure_diastolic = diastolic.value;
    obs.weight = weight.value;
    obs.body_fat = body_fat.value;

    if saw_sleep {
        obs.sleep_hours = Some(asleep / 60.0);
        obs.deep_sleep_minutes = Some(deep);
        obs.rem_sleep_minutes = Some(rem);
        obs.light_sleep_minutes = Some(light);
        if asleep > 0.0 {
            obs.sleep_quality = Some((100.0 * asleep / (asleep + awake)).round());
        }
    }

    obs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, min, 0).unwrap()
    }

    fn window() -> SyncWindow {
        SyncWindow {
            day_start: at(1, 0, 0),
            sleep_start: at(1, 0, 0) - chrono::Duration::hours(6),
            end: at(1, 20, 0),
        }
    }

    #[test]
    fn test_empty_samples_observe_nothing() {
        let obs = summarize(&[], &window());
        assert!(obs.is_empty());
    }

    #[test]
    fn test_sums_interval_metrics() {
        let samples = vec![
            HealthSample::Steps {
                start: at(1, 8, 0),
                end: at(1, 9, 0),
                count: 1500.0,
            },
            HealthSample::Steps {
                start: at(1, 12, 0),
                end: at(1, 12, 30),
                count: 700.0,
            },
            // Ended before local midnight
            HealthSample::Steps {
                start: at(1, 0, 0) - chrono::Duration::hours(2),
                end: at(1, 0, 0) - chrono::Duration::hours(1),
                count: 9999.0,
            },
            HealthSample::Distance {
                start: at(1, 8, 0),
                end: at(1, 9, 0),
                meters: 1250.0,
            },
            HealthSample::ActiveEnergy {
                start: at(1, 8, 0),
                end: at(1, 9, 0),
                kilocalories: 120.5,
            },
            HealthSample::ExerciseTime {
                start: at(1, 8, 0),
                end: at(1, 8, 30),
                minutes: 30.0,
            },
        ];
        let obs = summarize(&samples, &window());
        assert_eq!(obs.steps, Some(2200.0));
        assert_eq!(obs.distance, Some(1.25));
        assert_eq!(obs.calories, Some(120.5));
        assert_eq!(obs.active_minutes, Some(30.0));
        assert!(obs.heart_rate.is_none());
        assert!(obs.sleep_hours.is_none());
        assert!(obs.hydration.is_none());
        assert!(obs.mindfulness_minutes.is_none());
    }

    #[test]
    fn test_interval_straddling_midnight_is_prorated() {
        let midnight = at(1, 0, 0);
        let samples = vec![
            HealthSample::Steps {
                start: midnight - chrono::Duration::minutes(10),
                end: midnight + chrono::Duration::minutes(10),
                count: 100.0,
            },
            HealthSample::ActiveEnergy {
                start: midnight - chrono::Duration::minutes(30),
                end: midnight + chrono::Duration::minutes(10),
                kilocalories: 40.0,
            },
        ];
        let obs = summarize(&samples, &window());
        assert_eq!(obs.steps, Some(50.0));
        assert_eq!(obs.calories, Some(10.0));
    }

    #[test]
    fn test_share_inside() {
        let from = at(1, 0, 0);
        let to = at(1, 20, 0);
        assert!((share_inside(at(1, 8, 0), at(1, 9, 0), from, to) - 1.0).abs() < f64::EPSILON);
        assert!((share_inside(at(1, 19, 0), at(1, 21, 0), from, to) - 0.5).abs() < f64::EPSILON);
        assert!((share_inside(at(1, 7, 0), at(1, 7, 0), from, to) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_point_metrics_keep_latest() {
        let samples = vec![
            HealthSample::HeartRate {
                at: at(1, 15, 0),
                bpm: 88.0,
            },
            HealthSample::HeartRate {
                at: at(1, 9, 0),
                bpm: 61.0,
            },
            HealthSample::HeartRateVariability {
                at: at(1, 7, 0),
                millis: 42.0,
            },
            HealthSample::BodyMass {
                at: at(1, 7, 0),
                kilograms: 70.2,
            },
            HealthSample::BloodPressureSystolic {
                at: at(1, 7, 0),
                mmhg: 118.0,
            },
        ];
        let obs = summarize(&samples, &window());
        assert_eq!(obs.heart_rate, Some(88.0));
        assert_eq!(obs.hrv, Some(42.0));
        assert_eq!(obs.weight, Some(70.2));
        assert_eq!(obs.blood_pressure_systolic, Some(118.0));
        assert!(obs.blood_pressure_diastolic.is_none());
    }

    #[test]
    fn test_sleep_stages_from_last_night() {
        let night = at(1, 0, 0);
        let samples = vec![
            HealthSample::Sleep {
                start: night - chrono::Duration::hours(8),
                end: night + chrono::Duration::hours(7),
                stage: SleepStage::InBed,
            },
            HealthSample::Sleep {
                start: night - chrono::Duration::hours(1),
                end: night + chrono::Duration::hours(2),
                stage: SleepStage::Light,
            },
            HealthSample::Sleep {
                start: night + chrono::Duration::hours(2),
                end: night + chrono::Duration::hours(3),
                stage: SleepStage::Deep,
            },
            HealthSample::Sleep {
                start: night + chrono::Duration::hours(3),
                end: night + chrono::Duration::minutes(200),
                stage: SleepStage::Awake,
            },
            HealthSample::Sleep {
                start: night + chrono::Duration::minutes(200),
                end: night + chrono::Duration::minutes(290),
                stage: SleepStage::Rem,
            },
        ];
        let obs = summarize(&samples, &window());
        // light 180 + deep 60 + rem 90 = 330 asleep, 20 awake
        assert_eq!(obs.light_sleep_minutes, Some(180.0));
        assert_eq!(obs.deep_sleep_minutes, Some(60.0));
        assert_eq!(obs.rem_sleep_minutes, Some(90.0));
        assert_eq!(obs.sleep_hours, Some(5.5));
        assert_eq!(obs.sleep_quality, Some(94.0));
    }

    #[test]
    fn test_sleep_clipped_to_window() {
        let samples = vec![HealthSample::Sleep {
            start: window().sleep_start - chrono::Duration::hours(2),
            end: window().sleep_start + chrono::Duration::hours(1),
            stage: SleepStage::Unspecified,
        }];
        let obs = summarize(&samples, &window());
        assert_eq!(obs.sleep_hours, Some(1.0));
        assert_eq!(obs.sleep_quality, Some(100.0));
    }
}
