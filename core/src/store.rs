use anyhow::Result;
use chrono::NaiveDate;

use crate::models::DailyHealthRecord;

/// Record store with upsert-by-`(user_id, date)` semantics.
///
/// `Database` is the SQLite implementation; tests substitute failing stores to
/// exercise the fail-open paths of the service.
pub trait RecordStore {
    fn get_record(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyHealthRecord>>;

    /// Insert or replace the row keyed on `(record.user_id, record.date)`.
    /// `created_at` of an existing row is never overwritten.
    fn upsert_record(&self, record: &DailyHealthRecord) -> Result<DailyHealthRecord>;

    /// Records in `[start, end]`, ordered by date ascending.
    fn get_records_between(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyHealthRecord>>;

    fn get_latest_record(&self, user_id: &str) -> Result<Option<DailyHealthRecord>>;

    /// Returns `false` when no row existed.
    fn delete_record(&self, user_id: &str, date: NaiveDate) -> Result<bool>;

    /// Distinct record dates for a user, most recent first.
    fn get_record_dates(&self, user_id: &str) -> Result<Vec<NaiveDate>>;
}

/// Small key/value settings table (goals, default user id).
pub trait SettingsStore {
    fn get_setting(&self, key: &str) -> Result<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;
    fn delete_setting(&self, key: &str) -> Result<bool>;
}
