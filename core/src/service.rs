use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::summarize;
use crate::db::Database;
use crate::merge::{local_day, merge, today};
use crate::models::{
    ActionResult, DailyHealthRecord, Goals, HealthObservation, Platform, RecordKey, SyncSummary,
    WidgetSnapshot, validate_goals,
};
use crate::source::{HealthObservationSource, SyncWindow};
use crate::store::{RecordStore, SettingsStore};

/// Millilitres logged per water glass.
pub const GLASS_ML: i64 = 250;

/// Minimum spacing between unforced full syncs for one user.
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(60);

const GOAL_STEPS: &str = "goal_steps";
const GOAL_HYDRATION: &str = "goal_hydration_ml";
const GOAL_MINDFULNESS: &str = "goal_mindfulness_minutes";
const GOAL_SLEEP: &str = "goal_sleep_hours";

// --- Sync debounce ---

#[derive(Default)]
struct GateState {
    in_flight: HashSet<String>,
    last: HashMap<String, ActionResult<SyncSummary>>,
}

/// In-flight tracking for full syncs.
///
/// Holds which users have a sync running and the last result each produced in
/// this process. The minimum interval between unforced syncs is checked
/// against a [`SyncStamp`] in the settings store instead, so it also holds
/// across separate CLI runs. Advisory only: another device syncing the same
/// user/day is not excluded.
pub struct SyncGate {
    state: Mutex<GateState>,
    min_interval: Duration,
}

/// Marks a user's sync as in flight until dropped.
pub struct SyncPermit<'a> {
    gate: &'a SyncGate,
    user_id: String,
}

impl Drop for SyncPermit<'_> {
    fn drop(&mut self) {
        self.gate.lock().in_flight.remove(&self.user_id);
    }
}

impl SyncGate {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            min_interval,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` when a sync for `user_id` is already running.
    pub fn try_begin(&self, user_id: &str) -> Option<SyncPermit<'_>> {
        if self.lock().in_flight.insert(user_id.to_string()) {
            Some(SyncPermit {
                gate: self,
                user_id: user_id.to_string(),
            })
        } else {
            None
        }
    }

    /// Last result for the user, marked as served from cache.
    pub fn last_result(&self, user_id: &str) -> Option<ActionResult<SyncSummary>> {
        self.lock()
            .last
            .get(user_id)
            .map(as_cached)
    }

    pub fn remember(&self, user_id: &str, result: &ActionResult<SyncSummary>) {
        self.lock()
            .last
            .insert(user_id.to_string(), result.clone());
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl Default for SyncGate {
    fn default() -> Self {
        Self::new(MIN_SYNC_INTERVAL)
    }
}

/// Last completed sync for a user, persisted as a setting.
#[derive(Debug, Serialize, Deserialize)]
struct SyncStamp {
    at: DateTime<Utc>,
    result: ActionResult<SyncSummary>,
}

impl SyncStamp {
    /// Served instead of a new sync only when it succeeded, is for `today`
    /// and is younger than `min_interval`.
    fn reusable(&self, today: NaiveDate, now: DateTime<Utc>, min_interval: Duration) -> bool {
        let same_day = self
            .result
            .data
            .as_ref()
            .is_some_and(|s| s.record.date == today);
        let fresh = (now - self.at)
            .to_std()
            .is_ok_and(|age| age < min_interval);
        self.result.success && same_day && fresh
    }
}

fn sync_stamp_key(user_id: &str) -> String {
    format!("last_sync:{user_id}")
}

fn as_cached(result: &ActionResult<SyncSummary>) -> ActionResult<SyncSummary> {
    let mut cached = result.clone();
    if let Some(summary) = cached.data.as_mut() {
        summary.from_cache = true;
    }
    cached
}

// --- Quick adjustments ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjustable {
    Water,
    Mindfulness,
}

impl Adjustable {
    fn unit(self) -> i64 {
        match self {
            Self::Water => GLASS_ML,
            Self::Mindfulness => 1,
        }
    }

    fn current(self, record: &DailyHealthRecord) -> i64 {
        match self {
            Self::Water => record.hydration,
            Self::Mindfulness => record.mindfulness_minutes,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn observation(self, value: i64) -> HealthObservation {
        let value = Some(value as f64);
        match self {
            Self::Water => HealthObservation {
                hydration: value,
                ..Default::default()
            },
            Self::Mindfulness => HealthObservation {
                mindfulness_minutes: value,
                ..Default::default()
            },
        }
    }

    fn nothing_to_remove(self) -> &'static str {
        match self {
            Self::Water => "No water logged today to remove",
            Self::Mindfulness => "No mindfulness minutes logged today to remove",
        }
    }
}

struct Observed {
    observation: HealthObservation,
    platform: Option<Platform>,
    samples: usize,
    error: Option<String>,
}

// --- Service ---

pub struct HealthService<S = Database> {
    store: S,
    gate: SyncGate,
}

impl HealthService<Database> {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(db_path.as_ref())?;
        Ok(Self::with_store(db))
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::with_store(db))
    }
}

impl<S> HealthService<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            store,
            gate: SyncGate::default(),
        }
    }

    #[must_use]
    pub fn with_sync_interval(mut self, min_interval: Duration) -> Self {
        self.gate = SyncGate::new(min_interval);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: RecordStore> HealthService<S> {
    /// Read the stored record, treating a failed read as "no record yet".
    fn load_existing(&self, key: &RecordKey) -> (Option<DailyHealthRecord>, Option<String>) {
        match self.store.get_record(&key.user_id, key.date) {
            Ok(record) => (record, None),
            Err(e) => {
                warn!(
                    user_id = %key.user_id,
                    date = %key.date,
                    "failed to read existing record, merging against defaults: {e:#}"
                );
                (None, Some(format!("Failed to read existing record: {e:#}")))
            }
        }
    }

    fn save(&self, record: &DailyHealthRecord) -> std::result::Result<DailyHealthRecord, String> {
        self.store.upsert_record(record).map_err(|e| {
            warn!(
                user_id = %record.user_id,
                date = %record.date,
                "failed to upsert daily record: {e:#}"
            );
            format!("Failed to save daily record: {e:#}")
        })
    }

    // --- Observations ---

    /// Merge an observation into the record for `date` (default: today) and persist it.
    pub fn record_observation(
        &self,
        user_id: &str,
        date: Option<NaiveDate>,
        observation: &HealthObservation,
    ) -> ActionResult<DailyHealthRecord> {
        let key = RecordKey::new(user_id, date.unwrap_or_else(today));
        let (existing, read_error) = self.load_existing(&key);
        let merged = merge(existing.as_ref(), observation, &key, Utc::now());
        match self.save(&merged) {
            Ok(saved) => match read_error {
                Some(err) => ActionResult::fail_with(saved, err),
                None => ActionResult::ok(saved),
            },
            Err(err) => ActionResult::fail(err),
        }
    }

    fn run_sync<Tz: TimeZone>(
        &self,
        user_id: &str,
        source: Option<&dyn HealthObservationSource>,
        now: &DateTime<Tz>,
    ) -> ActionResult<SyncSummary> {
        let key = RecordKey::new(user_id, local_day(now));
        let (existing, read_error) = self.load_existing(&key);
        let observed = observe(source, &SyncWindow::ending_at(now));

        let merged = merge(
            existing.as_ref(),
            &observed.observation,
            &key,
            now.with_timezone(&Utc),
        );
        let saved = match self.save(&merged) {
            Ok(saved) => saved,
            Err(err) => return ActionResult::fail(err),
        };

        let summary = SyncSummary {
            record: saved,
            platform: observed.platform,
            heartbeat: observed.samples == 0,
            from_cache: false,
            samples: observed.samples,
        };

        match read_error.or(observed.error) {
            Some(err) => ActionResult::fail_with(summary, err),
            None => {
                info!(
                    user_id,
                    date = %key.date,
                    samples = summary.samples,
                    heartbeat = summary.heartbeat,
                    "health data synced"
                );
                ActionResult::ok(summary)
            }
        }
    }

    // --- Quick adjustments ---

    pub fn add_water_glasses(&self, user_id: &str, glasses: i64) -> ActionResult<DailyHealthRecord> {
        self.adjust(user_id, Adjustable::Water, glasses, false)
    }

    pub fn remove_water_glasses(
        &self,
        user_id: &str,
        glasses: i64,
    ) -> ActionResult<DailyHealthRecord> {
        self.adjust(user_id, Adjustable::Water, glasses, true)
    }

    pub fn add_mindfulness_minutes(
        &self,
        user_id: &str,
        minutes: i64,
    ) -> ActionResult<DailyHealthRecord> {
        self.adjust(user_id, Adjustable::Mindfulness, minutes, false)
    }

    pub fn remove_mindfulness_minutes(
        &self,
        user_id: &str,
        minutes: i64,
    ) -> ActionResult<DailyHealthRecord> {
        self.adjust(user_id, Adjustable::Mindfulness, minutes, true)
    }

    /// Add or remove `quantity` units from today's cumulative total, clamped
    /// at zero, and write the new total as an explicit value.
    fn adjust(
        &self,
        user_id: &str,
        metric: Adjustable,
        quantity: i64,
        remove: bool,
    ) -> ActionResult<DailyHealthRecord> {
        if quantity <= 0 {
            return ActionResult::fail("Quantity must be greater than 0");
        }

        let now = Local::now();
        let key = RecordKey::new(user_id, local_day(&now));
        let (existing, read_error) = self.load_existing(&key);
        let current = existing.as_ref().map_or(0, |r| metric.current(r));

        if remove && current == 0 {
            return ActionResult::fail(metric.nothing_to_remove());
        }

        let delta = quantity.saturating_mul(metric.unit());
        let new_value = if remove {
            current.saturating_sub(delta).max(0)
        } else {
            current.saturating_add(delta)
        };

        let merged = merge(
            existing.as_ref(),
            &metric.observation(new_value),
            &key,
            now.with_timezone(&Utc),
        );
        match self.save(&merged) {
            Ok(saved) => match read_error {
                Some(err) => ActionResult::fail_with(saved, err),
                None => ActionResult::ok(saved),
            },
            Err(err) => ActionResult::fail(err),
        }
    }

    // --- Reads ---

    pub fn get_today(&self, user_id: &str) -> Result<Option<DailyHealthRecord>> {
        self.store.get_record(user_id, today())
    }

    pub fn get_record(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyHealthRecord>> {
        self.store.get_record(user_id, date)
    }

    pub fn get_history(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyHealthRecord>> {
        if start > end {
            bail!("Start date {start} is after end date {end}");
        }
        self.store.get_records_between(user_id, start, end)
    }

    pub fn get_latest(&self, user_id: &str) -> Result<Option<DailyHealthRecord>> {
        self.store.get_latest_record(user_id)
    }

    pub fn delete_record(&self, user_id: &str, date: NaiveDate) -> Result<bool> {
        let deleted = self.store.delete_record(user_id, date)?;
        if deleted {
            info!(user_id, %date, "daily record deleted");
        }
        Ok(deleted)
    }

    /// Consecutive days with a record, ending today or yesterday.
    pub fn get_sync_streak(&self, user_id: &str, today: NaiveDate) -> Result<i64> {
        let dates: Vec<NaiveDate> = self
            .store
            .get_record_dates(user_id)?
            .into_iter()
            .filter(|d| *d <= today)
            .collect();

        let start = match dates.first() {
            Some(d) if *d == today => today,
            Some(d) if Some(*d) == today.pred_opt() => *d,
            _ => return Ok(0),
        };

        let mut streak: i64 = 0;
        let mut expected = Some(start);
        for date in &dates {
            if Some(*date) == expected {
                streak += 1;
                expected = date.pred_opt();
            } else {
                break;
            }
        }
        Ok(streak)
    }
}

impl<S: RecordStore + SettingsStore> HealthService<S> {
    // --- Full sync ---

    pub fn sync_health_data(
        &self,
        user_id: &str,
        source: Option<&dyn HealthObservationSource>,
        force: bool,
    ) -> ActionResult<SyncSummary> {
        self.sync_health_data_at(user_id, source, force, &Local::now())
    }

    /// Full sync as of `now`, whose time zone decides the record's calendar day.
    ///
    /// Without an available source a zero-valued heartbeat row is still written
    /// so the day counts towards the streak.
    pub fn sync_health_data_at<Tz: TimeZone>(
        &self,
        user_id: &str,
        source: Option<&dyn HealthObservationSource>,
        force: bool,
        now: &DateTime<Tz>,
    ) -> ActionResult<SyncSummary> {
        let Some(_permit) = self.gate.try_begin(user_id) else {
            debug!(user_id, "sync already in flight, serving last result");
            return self
                .gate
                .last_result(user_id)
                .unwrap_or_else(|| ActionResult::fail("Sync already in progress"));
        };

        let synced_at = now.with_timezone(&Utc);
        let recent = if force {
            None
        } else {
            self.recent_sync(user_id, local_day(now), synced_at)
        };
        if let Some(cached) = recent {
            debug!(user_id, "synced recently, serving cached result");
            return cached;
        }

        let result = self.run_sync(user_id, source, now);
        self.remember_sync(user_id, synced_at, &result);
        result
    }

    fn recent_sync(
        &self,
        user_id: &str,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Option<ActionResult<SyncSummary>> {
        let raw = match self.store.get_setting(&sync_stamp_key(user_id)) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(user_id, "failed to read last sync stamp: {e:#}");
                return None;
            }
        };
        let stamp: SyncStamp = match serde_json::from_str(&raw) {
            Ok(stamp) => stamp,
            Err(e) => {
                debug!(user_id, "ignoring unreadable sync stamp: {e}");
                return None;
            }
        };
        stamp
            .reusable(today, now, self.gate.min_interval())
            .then(|| as_cached(&stamp.result))
    }

    fn remember_sync(&self, user_id: &str, at: DateTime<Utc>, result: &ActionResult<SyncSummary>) {
        self.gate.remember(user_id, result);
        let stamp = SyncStamp {
            at,
            result: result.clone(),
        };
        let stored = serde_json::to_string(&stamp)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.store.set_setting(&sync_stamp_key(user_id), &json));
        if let Err(e) = stored {
            warn!(user_id, "failed to persist sync stamp: {e:#}");
        }
    }

    // --- Goals ---

    pub fn get_goals(&self) -> Result<Goals> {
        let defaults = Goals::default();
        Ok(Goals {
            steps: self.setting_or(GOAL_STEPS, defaults.steps)?,
            hydration_ml: self.setting_or(GOAL_HYDRATION, defaults.hydration_ml)?,
            mindfulness_minutes: self.setting_or(GOAL_MINDFULNESS, defaults.mindfulness_minutes)?,
            sleep_hours: self.setting_or(GOAL_SLEEP, defaults.sleep_hours)?,
        })
    }

    pub fn set_goals(&self, goals: &Goals) -> Result<Goals> {
        validate_goals(goals)?;
        self.store.set_setting(GOAL_STEPS, &goals.steps.to_string())?;
        self.store
            .set_setting(GOAL_HYDRATION, &goals.hydration_ml.to_string())?;
        self.store
            .set_setting(GOAL_MINDFULNESS, &goals.mindfulness_minutes.to_string())?;
        self.store
            .set_setting(GOAL_SLEEP, &goals.sleep_hours.to_string())?;
        self.get_goals()
    }

    /// Drop stored goals so the defaults apply again.
    pub fn reset_goals(&self) -> Result<Goals> {
        for key in [GOAL_STEPS, GOAL_HYDRATION, GOAL_MINDFULNESS, GOAL_SLEEP] {
            self.store.delete_setting(key)?;
        }
        self.get_goals()
    }

    fn setting_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T>
    where
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.store.get_setting(key)? {
            Some(v) => Ok(v.parse::<T>()?),
            None => Ok(default),
        }
    }

    // --- Widget ---

    pub fn get_widget_snapshot(&self, user_id: &str) -> Result<WidgetSnapshot> {
        self.get_widget_snapshot_for(user_id, today())
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn get_widget_snapshot_for(&self, user_id: &str, date: NaiveDate) -> Result<WidgetSnapshot> {
        let record = self.store.get_record(user_id, date)?;
        let goals = self.get_goals()?;
        let streak = self.get_sync_streak(user_id, date)?;

        let progress = |value: i64, goal: i64| (value as f64 / goal as f64).min(1.0);
        let steps = record.as_ref().map_or(0, |r| r.steps);
        let hydration = record.as_ref().map_or(0, |r| r.hydration);

        Ok(WidgetSnapshot {
            date: date.format("%Y-%m-%d").to_string(),
            steps,
            steps_goal: goals.steps,
            steps_progress: progress(steps, goals.steps),
            hydration_ml: hydration,
            hydration_goal_ml: goals.hydration_ml,
            hydration_progress: progress(hydration, goals.hydration_ml),
            mindfulness_minutes: record.as_ref().map_or(0, |r| r.mindfulness_minutes),
            mindfulness_goal_minutes: goals.mindfulness_minutes,
            sleep_hours: record.as_ref().map_or(0.0, |r| r.sleep_hours),
            sleep_goal_hours: goals.sleep_hours,
            heart_rate: record.as_ref().map_or(0, |r| r.heart_rate),
            streak,
            last_updated: record.map(|r| r.updated_at),
        })
    }
}

fn observe(source: Option<&dyn HealthObservationSource>, window: &SyncWindow) -> Observed {
    let Some(source) = source else {
        return Observed {
            observation: HealthObservation::default(),
            platform: None,
            samples: 0,
            error: None,
        };
    };

    let platform = Some(source.platform());
    if !source.is_available() {
        info!(
            platform = source.platform().as_str(),
            "health permissions not granted, writing heartbeat"
        );
        return Observed {
            observation: HealthObservation::default(),
            platform,
            samples: 0,
            error: None,
        };
    }

    match source.read_samples(window.sleep_start, window.end) {
        Ok(samples) => Observed {
            observation: summarize(&samples, window),
            platform,
            samples: samples.len(),
            error: None,
        },
        Err(e) => {
            warn!(
                platform = source.platform().as_str(),
                "failed to read health samples: {e:#}"
            );
            Observed {
                observation: HealthObservation::default(),
                platform,
                samples: 0,
                error: Some(format!("Failed to read health samples: {e:#}")),
            }
        }
    }
}
