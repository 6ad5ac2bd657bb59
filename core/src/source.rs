use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::healthconnect::HealthConnectSource;
use crate::healthkit::HealthKitSource;
use crate::models::{HealthSample, Platform};

/// What the native side implements: authorization state and a raw query
/// returning the platform's own JSON sample payload.
///
/// iOS hands over `HKSample` dictionaries, Android hands over Health Connect
/// records; the CLI reads an exported payload from disk. Called synchronously,
/// so mobile callers should invoke the service from a background thread.
pub trait NativeHealthBridge: Send + Sync {
    fn is_authorized(&self) -> bool;
    fn query_samples(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<String>;
}

/// Capability interface over a device health platform.
pub trait HealthObservationSource: Send + Sync {
    fn platform(&self) -> Platform;

    /// False when permissions were not granted or the platform SDK is absent.
    fn is_available(&self) -> bool;

    /// Normalized samples overlapping `[start, end]`.
    fn read_samples(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<HealthSample>>;
}

/// Build the source for `platform` around the native bridge. Chosen once at
/// startup, usually from [`Platform::detect`].
#[must_use]
pub fn select_source(
    platform: Platform,
    bridge: Box<dyn NativeHealthBridge>,
) -> Box<dyn HealthObservationSource> {
    match platform {
        Platform::HealthKit => Box::new(HealthKitSource::new(bridge)),
        Platform::HealthConnect => Box::new(HealthConnectSource::new(bridge)),
    }
}

pub(crate) fn overlaps(sample: &HealthSample, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    sample.end() >= start && sample.start() <= end
}

/// Time range read by one sync, in UTC instants derived from the local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    /// Local midnight of today.
    pub day_start: DateTime<Utc>,
    /// 18:00 local on the previous day, so last night's sleep counts for today.
    pub sleep_start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub fn ending_at<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let end = now.with_timezone(&Utc);
        let tz = now.timezone();
        let today = now.date_naive();

        let day_start =
            local_instant(&tz, today, 0).unwrap_or_else(|| end - Duration::hours(24));
        let sleep_start = today
            .pred_opt()
            .and_then(|yesterday| local_instant(&tz, yesterday, 18))
            .unwrap_or_else(|| day_start - Duration::hours(6));

        Self {
            day_start,
            sleep_start,
            end,
        }
    }
}

fn local_instant<Tz: TimeZone>(tz: &Tz, date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(hour, 0, 0)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
