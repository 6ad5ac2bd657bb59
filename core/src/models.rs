use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One persisted row per `(user_id, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyHealthRecord {
    pub user_id: String,
    pub date: NaiveDate,
    pub steps: i64,
    pub distance: f64,
    pub calories: i64,
    pub active_minutes: i64,
    pub heart_rate: i64,
    pub resting_heart_rate: i64,
    pub hrv: f64,
    pub sleep_hours: f64,
    pub sleep_quality: i64,
    pub deep_sleep_minutes: i64,
    pub rem_sleep_minutes: i64,
    pub light_sleep_minutes: i64,
    pub blood_pressure_systolic: Option<i64>,
    pub blood_pressure_diastolic: Option<i64>,
    pub weight: Option<f64>,
    pub body_fat: Option<f64>,
    pub hydration: i64,
    pub mindfulness_minutes: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Identity of a daily record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub user_id: String,
    pub date: NaiveDate,
}

impl RecordKey {
    pub fn new(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            date,
        }
    }
}

/// A partial set of freshly observed metrics.
///
/// `None` means "not observed this cycle" and is distinct from `Some(0.0)`.
/// Deserialization never fails on a metric value: non-numeric input becomes
/// `Some(0.0)` and is cleaned up again by the merge's sanitize step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthObservation {
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub steps: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub active_minutes: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub resting_heart_rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub hrv: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub sleep_hours: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub sleep_quality: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub deep_sleep_minutes: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub rem_sleep_minutes: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub light_sleep_minutes: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub blood_pressure_systolic: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub blood_pressure_diastolic: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub body_fat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub hydration: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub mindfulness_minutes: Option<f64>,
}

impl HealthObservation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(coerce_number))
}

/// Coerce an arbitrary JSON value into an observed metric.
///
/// `null` is "not observed"; anything else is observed, falling back to `0.0`
/// when it cannot be read as a number.
#[must_use]
pub fn coerce_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Number(n) => Some(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Some(s.trim().parse::<f64>().unwrap_or(0.0)),
        _ => Some(0.0),
    }
}

/// Result envelope returned by every sync and adjustment operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ActionResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ActionResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// A failure that still carries data, e.g. a record written after a
    /// fail-open read.
    pub fn fail_with(data: T, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(error.into()),
        }
    }
}

/// Health platform a sample source is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    HealthKit,
    HealthConnect,
}

impl Platform {
    /// Platform native to the target OS, if any.
    #[must_use]
    pub fn detect() -> Option<Self> {
        if cfg!(any(target_os = "ios", target_os = "macos")) {
            Some(Self::HealthKit)
        } else if cfg!(target_os = "android") {
            Some(Self::HealthConnect)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HealthKit => "healthkit",
            Self::HealthConnect => "health-connect",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "healthkit" | "health-kit" | "ios" => Ok(Self::HealthKit),
            "healthconnect" | "health-connect" | "health_connect" | "android" => {
                Ok(Self::HealthConnect)
            }
            _ => bail!("Invalid platform '{s}'. Use 'healthkit' or 'health-connect'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub record: DailyHealthRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// True when no samples were available and only a heartbeat row was written.
    pub heartbeat: bool,
    pub from_cache: bool,
    pub samples: usize,
}

// --- Normalized platform samples ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepStage {
    InBed,
    Awake,
    Light,
    Deep,
    Rem,
    Unspecified,
}

impl SleepStage {
    #[must_use]
    pub fn is_asleep(self) -> bool {
        matches!(self, Self::Light | Self::Deep | Self::Rem | Self::Unspecified)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealthSample {
    Steps {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        count: f64,
    },
    Distance {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        meters: f64,
    },
    ActiveEnergy {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kilocalories: f64,
    },
    ExerciseTime {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        minutes: f64,
    },
    HeartRate {
        at: DateTime<Utc>,
        bpm: f64,
    },
    RestingHeartRate {
        at: DateTime<Utc>,
        bpm: f64,
    },
    HeartRateVariability {
        at: DateTime<Utc>,
        millis: f64,
    },
    Sleep {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        stage: SleepStage,
    },
    BloodPressureSystolic {
        at: DateTime<Utc>,
        mmhg: f64,
    },
    BloodPressureDiastolic {
        at: DateTime<Utc>,
        mmhg: f64,
    },
    BodyMass {
        at: DateTime<Utc>,
        kilograms: f64,
    },
    BodyFat {
        at: DateTime<Utc>,
        percent: f64,
    },
}

impl HealthSample {
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        match *self {
            Self::Steps { start, .. }
            | Self::Distance { start, .. }
            | Self::ActiveEnergy { start, .. }
            | Self::ExerciseTime { start, .. }
            | Self::Sleep { start, .. } => start,
            Self::HeartRate { at, .. }
            | Self::RestingHeartRate { at, .. }
            | Self::HeartRateVariability { at, .. }
            | Self::BloodPressureSystolic { at, .. }
            | Self::BloodPressureDiastolic { at, .. }
            | Self::BodyMass { at, .. }
            | Self::BodyFat { at, .. } => at,
        }
    }

    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        match *self {
            Self::Steps { end, .. }
            | Self::Distance { end, .. }
            | Self::ActiveEnergy { end, .. }
            | Self::ExerciseTime { end, .. }
            | Self::Sleep { end, .. } => end,
            _ => self.start(),
        }
    }
}

// --- Goals and widget ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goals {
    pub steps: i64,
    pub hydration_ml: i64,
    pub mindfulness_minutes: i64,
    pub sleep_hours: f64,
}

impl Default for Goals {
    fn default() -> Self {
        Self {
            steps: 10_000,
            hydration_ml: 2_000,
            mindfulness_minutes: 10,
            sleep_hours: 8.0,
        }
    }
}

pub fn validate_goals(goals: &Goals) -> Result<()> {
    if goals.steps <= 0 {
        bail!("Step goal must be greater than 0");
    }
    if goals.hydration_ml <= 0 {
        bail!("Hydration goal must be greater than 0");
    }
    if goals.mindfulness_minutes <= 0 {
        bail!("Mindfulness goal must be greater than 0");
    }
    if !(goals.sleep_hours > 0.0 && goals.sleep_hours <= 24.0) {
        bail!("Sleep goal must be between 0 and 24 hours");
    }
    Ok(())
}

/// Compact "today" view for home-screen widgets and watch complications.
#[derive(Debug, Clone, Serialize)]
pub struct WidgetSnapshot {
    pub date: String,
    pub steps: i64,
    pub steps_goal: i64,
    pub steps_progress: f64,
    pub hydration_ml: i64,
    pub hydration_goal_ml: i64,
    pub hydration_progress: f64,
    pub mindfulness_minutes: i64,
    pub mindfulness_goal_minutes: i64,
    pub sleep_hours: f64,
    pub sleep_goal_hours: f64,
    pub heart_rate: i64,
    pub streak: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

pub fn parse_record_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{s}'. Use YYYY-MM-DD"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_absent_vs_zero() {
        let obs: HealthObservation =
            serde_json::from_str(r#"{"hydration": 0, "steps": null}"#).unwrap();
        assert_eq!(obs.hydration, Some(0.0));
        assert_eq!(obs.steps, None);
        assert_eq!(obs.mindfulness_minutes, None);
    }

    #[test]
    fn test_observation_lenient_numbers() {
        let obs: HealthObservation = serde_json::from_str(
            r#"{"steps": "1234", "calories": "lots", "heart_rate": true, "hrv": [1]}"#,
        )
        .unwrap();
        assert_eq!(obs.steps, Some(1234.0));
        assert_eq!(obs.calories, Some(0.0));
        assert_eq!(obs.heart_rate, Some(0.0));
        assert_eq!(obs.hrv, Some(0.0));
    }

    #[test]
    fn test_observation_serializes_only_present_fields() {
        let obs = HealthObservation {
            hydration: Some(0.0),
            ..Default::default()
        };
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json, serde_json::json!({ "hydration": 0.0 }));
    }

    #[test]
    fn test_observation_is_empty() {
        assert!(HealthObservation::default().is_empty());
        let obs = HealthObservation {
            steps: Some(1.0),
            ..Default::default()
        };
        assert!(!obs.is_empty());
    }

    #[test]
    fn test_action_result_envelope() {
        let ok = ActionResult::ok(5);
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({ "success": true, "data": 5 })
        );

        let failed: ActionResult<i32> = ActionResult::fail("nope");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({ "success": false, "error": "nope" })
        );

        let partial = ActionResult::fail_with(1, "read failed");
        assert!(!partial.success);
        assert_eq!(partial.data, Some(1));
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!("HealthKit".parse::<Platform>().unwrap(), Platform::HealthKit);
        assert_eq!(
            "health-connect".parse::<Platform>().unwrap(),
            Platform::HealthConnect
        );
        assert_eq!("android".parse::<Platform>().unwrap(), Platform::HealthConnect);
        assert!("fitbit".parse::<Platform>().is_err());
    }

    #[test]
    fn test_sleep_stage_asleep() {
        assert!(SleepStage::Deep.is_asleep());
        assert!(SleepStage::Unspecified.is_asleep());
        assert!(!SleepStage::Awake.is_asleep());
        assert!(!SleepStage::InBed.is_asleep());
    }

    #[test]
    fn test_validate_goals() {
        assert!(validate_goals(&Goals::default()).is_ok());
        let bad = Goals {
            steps: 0,
            ..Goals::default()
        };
        assert!(validate_goals(&bad).is_err());
        let bad_sleep = Goals {
            sleep_hours: 25.0,
            ..Goals::default()
        };
        assert!(validate_goals(&bad_sleep).is_err());
    }

    #[test]
    fn test_parse_record_date() {
        assert_eq!(
            parse_record_date("2024-03-01").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert!(parse_record_date("03/01/2024").is_err());
    }
}
