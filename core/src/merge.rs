//! Per-field merge of a fresh observation into the stored daily record.
//!
//! Field classes:
//! - additive (steps, distance, calories, active minutes): never regress within a day
//! - instantaneous (heart rate, HRV, sleep): latest non-zero sample wins
//! - optional scalars (blood pressure, weight, body fat): replaced when present
//! - editable cumulative (hydration, mindfulness): replaced verbatim when supplied,
//!   including an explicit zero, so that removals are possible

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};

use crate::models::{DailyHealthRecord, HealthObservation, RecordKey};

/// Calendar day of `at` in its own time zone.
///
/// Passing a local timestamp gives the device's calendar day; a UTC truncation
/// would roll evening syncs west of Greenwich over to tomorrow.
pub fn local_day<Tz: TimeZone>(at: &DateTime<Tz>) -> NaiveDate {
    at.date_naive()
}

#[must_use]
pub fn today() -> NaiveDate {
    local_day(&Local::now())
}

/// An all-zero record, used for heartbeats and as the base of a first merge.
#[must_use]
pub fn empty_record(key: &RecordKey, now: DateTime<Utc>) -> DailyHealthRecord {
    let ts = now.to_rfc3339();
    DailyHealthRecord {
        user_id: key.user_id.clone(),
        date: key.date,
        steps: 0,
        distance: 0.0,
        calories: 0,
        active_minutes: 0,
        heart_rate: 0,
        resting_heart_rate: 0,
        hrv: 0.0,
        sleep_hours: 0.0,
        sleep_quality: 0,
        deep_sleep_minutes: 0,
        rem_sleep_minutes: 0,
        light_sleep_minutes: 0,
        blood_pressure_systolic: None,
        blood_pressure_diastolic: None,
        weight: None,
        body_fat: None,
        hydration: 0,
        mindfulness_minutes: 0,
        created_at: ts.clone(),
        updated_at: ts,
    }
}

/// Merge `incoming` into `existing` for the day identified by `key`.
///
/// Total over its inputs: non-finite and negative values are treated as zero
/// before any policy is applied.
#[must_use]
pub fn merge(
    existing: Option<&DailyHealthRecord>,
    incoming: &HealthObservation,
    key: &RecordKey,
    now: DateTime<Utc>,
) -> DailyHealthRecord {
    let base = existing.cloned().unwrap_or_else(|| empty_record(key, now));
    let obs = sanitize(incoming);

    DailyHealthRecord {
        user_id: key.user_id.clone(),
        date: key.date,
        steps: additive_count(base.steps, obs.steps),
        distance: additive_decimal(base.distance, obs.distance, 2),
        calories: additive_count(base.calories, obs.calories),
        active_minutes: additive_count(base.active_minutes, obs.active_minutes),
        heart_rate: latest_count(base.heart_rate, obs.heart_rate),
        resting_heart_rate: latest_count(base.resting_heart_rate, obs.resting_heart_rate),
        hrv: latest_decimal(base.hrv, obs.hrv, 1),
        sleep_hours: latest_decimal(base.sleep_hours, obs.sleep_hours, 2),
        sleep_quality: latest_count(base.sleep_quality, obs.sleep_quality),
        deep_sleep_minutes: latest_count(base.deep_sleep_minutes, obs.deep_sleep_minutes),
        rem_sleep_minutes: latest_count(base.rem_sleep_minutes, obs.rem_sleep_minutes),
        light_sleep_minutes: latest_count(base.light_sleep_minutes, obs.light_sleep_minutes),
        blood_pressure_systolic: present_count(
            base.blood_pressure_systolic,
            obs.blood_pressure_systolic,
        ),
        blood_pressure_diastolic: present_count(
            base.blood_pressure_diastolic,
            obs.blood_pressure_diastolic,
        ),
        weight: present_decimal(base.weight, obs.weight, 2),
        body_fat: present_decimal(base.body_fat, obs.body_fat, 1),
        hydration: explicit_count(base.hydration, obs.hydration),
        mindfulness_minutes: explicit_count(base.mindfulness_minutes, obs.mindfulness_minutes),
        created_at: base.created_at,
        updated_at: now.to_rfc3339(),
    }
}

fn clean(value: Option<f64>) -> Option<f64> {
    value.map(|v| if v.is_finite() && v > 0.0 { v } else { 0.0 })
}

fn sanitize(obs: &HealthObservation) -> HealthObservation {
    HealthObservation {
        steps: clean(obs.steps),
        distance: clean(obs.distance),
        calories: clean(obs.calories),
        active_minutes: clean(obs.active_minutes),
        heart_rate: clean(obs.heart_rate),
        resting_heart_rate: clean(obs.resting_heart_rate),
        hrv: clean(obs.hrv),
        sleep_hours: clean(obs.sleep_hours),
        sleep_quality: clean(obs.sleep_quality),
        deep_sleep_minutes: clean(obs.deep_sleep_minutes),
        rem_sleep_minutes: clean(obs.rem_sleep_minutes),
        light_sleep_minutes: clean(obs.light_sleep_minutes),
        blood_pressure_systolic: clean(obs.blood_pressure_systolic),
        blood_pressure_diastolic: clean(obs.blood_pressure_diastolic),
        weight: clean(obs.weight),
        body_fat: clean(obs.body_fat),
        hydration: clean(obs.hydration),
        mindfulness_minutes: clean(obs.mindfulness_minutes),
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round() / factor
}

fn count(value: f64) -> i64 {
    value.round() as i64
}

fn additive_count(existing: i64, incoming: Option<f64>) -> i64 {
    incoming.map_or(existing, |v| existing.max(count(v)))
}

fn additive_decimal(existing: f64, incoming: Option<f64>, places: i32) -> f64 {
    incoming.map_or(existing, |v| existing.max(round_to(v, places)))
}

fn latest_count(existing: i64, incoming: Option<f64>) -> i64 {
    match incoming.map(count) {
        Some(v) if v > 0 => v,
        _ => existing,
    }
}

fn latest_decimal(existing: f64, incoming: Option<f64>, places: i32) -> f64 {
    match incoming.map(|v| round_to(v, places)) {
        Some(v) if v > 0.0 => v,
        _ => existing,
    }
}

/// Optional scalars replace the stored value when present, except that a
/// present `0` (after sanitizing) counts as absent: a zero blood pressure,
/// weight or body fat is never a real reading and must not erase one.
fn present_count(existing: Option<i64>, incoming: Option<f64>) -> Option<i64> {
    match incoming.map(count) {
        Some(v) if v > 0 => Some(v),
        _ => existing,
    }
}

/// Same zero-as-absent rule as [`present_count`].
fn present_decimal(existing: Option<f64>, incoming: Option<f64>, places: i32) -> Option<f64> {
    match incoming.map(|v| round_to(v, places)) {
        Some(v) if v > 0.0 => Some(v),
        _ => existing,
    }
}

fn explicit_count(existing: i64, incoming: Option<f64>) -> i64 {
    incoming.map_or(existing, count)
}
