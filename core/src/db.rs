use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::models::DailyHealthRecord;
use crate::store::{RecordStore, SettingsStore};

const RECORD_COLUMNS: &str = "user_id, date, steps, distance, calories, active_minutes,
    heart_rate, resting_heart_rate, hrv, sleep_hours, sleep_quality,
    deep_sleep_minutes, rem_sleep_minutes, light_sleep_minutes,
    blood_pressure_systolic, blood_pressure_diastolic, weight, body_fat,
    hydration, mindfulness_minutes, created_at, updated_at";

const DEFAULT_USER_KEY: &str = "default_user_id";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS daily_health_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL,
                    date TEXT NOT NULL,
                    steps INTEGER NOT NULL DEFAULT 0,
                    distance REAL NOT NULL DEFAULT 0,
                    calories INTEGER NOT NULL DEFAULT 0,
                    active_minutes INTEGER NOT NULL DEFAULT 0,
                    heart_rate INTEGER NOT NULL DEFAULT 0,
                    resting_heart_rate INTEGER NOT NULL DEFAULT 0,
                    hrv REAL NOT NULL DEFAULT 0,
                    sleep_hours REAL NOT NULL DEFAULT 0,
                    sleep_quality INTEGER NOT NULL DEFAULT 0,
                    deep_sleep_minutes INTEGER NOT NULL DEFAULT 0,
                    rem_sleep_minutes INTEGER NOT NULL DEFAULT 0,
                    light_sleep_minutes INTEGER NOT NULL DEFAULT 0,
                    blood_pressure_systolic INTEGER,
                    blood_pressure_diastolic INTEGER,
                    weight REAL,
                    body_fat REAL,
                    hydration INTEGER NOT NULL DEFAULT 0,
                    mindfulness_minutes INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (user_id, date)
                );

                CREATE INDEX IF NOT EXISTS idx_daily_health_records_user_date
                    ON daily_health_records(user_id, date);

                CREATE TABLE IF NOT EXISTS user_settings (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<DailyHealthRecord> {
        let date_str: String = row.get(1)?;
        let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(DailyHealthRecord {
            user_id: row.get(0)?,
            date,
            steps: row.get(2)?,
            distance: row.get(3)?,
            calories: row.get(4)?,
            active_minutes: row.get(5)?,
            heart_rate: row.get(6)?,
            resting_heart_rate: row.get(7)?,
            hrv: row.get(8)?,
            sleep_hours: row.get(9)?,
            sleep_quality: row.get(10)?,
            deep_sleep_minutes: row.get(11)?,
            rem_sleep_minutes: row.get(12)?,
            light_sleep_minutes: row.get(13)?,
            blood_pressure_systolic: row.get(14)?,
            blood_pressure_diastolic: row.get(15)?,
            weight: row.get(16)?,
            body_fat: row.get(17)?,
            hydration: row.get(18)?,
            mindfulness_minutes: row.get(19)?,
            created_at: row.get(20)?,
            updated_at: row.get(21)?,
        })
    }

    /// User id the CLI acts as when none is given, generated on first use.
    pub fn get_or_create_user_id(&self) -> Result<String> {
        if let Some(id) = self.get_setting(DEFAULT_USER_KEY)? {
            return Ok(id);
        }
        let id = Uuid::new_v4().to_string();
        self.set_setting(DEFAULT_USER_KEY, &id)?;
        Ok(id)
    }
}

impl RecordStore for Database {
    fn get_record(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyHealthRecord>> {
        let date_str = date.format("%Y-%m-%d").to_string();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM daily_health_records WHERE user_id = ?1 AND date = ?2"
        ))?;
        let mut rows = stmt.query(params![user_id, date_str])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::record_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    fn upsert_record(&self, record: &DailyHealthRecord) -> Result<DailyHealthRecord> {
        let date_str = record.date.format("%Y-%m-%d").to_string();
        self.conn.execute(
            &format!(
                "INSERT INTO daily_health_records ({RECORD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21, ?22)
                 ON CONFLICT(user_id, date) DO UPDATE SET
                    steps = excluded.steps,
                    distance = excluded.distance,
                    calories = excluded.calories,
                    active_minutes = excluded.active_minutes,
                    heart_rate = excluded.heart_rate,
                    resting_heart_rate = excluded.resting_heart_rate,
                    hrv = excluded.hrv,
                    sleep_hours = excluded.sleep_hours,
                    sleep_quality = excluded.sleep_quality,
                    deep_sleep_minutes = excluded.deep_sleep_minutes,
                    rem_sleep_minutes = excluded.rem_sleep_minutes,
                    light_sleep_minutes = excluded.light_sleep_minutes,
                    blood_pressure_systolic = excluded.blood_pressure_systolic,
                    blood_pressure_diastolic = excluded.blood_pressure_diastolic,
                    weight = excluded.weight,
                    body_fat = excluded.body_fat,
                    hydration = excluded.hydration,
                    mindfulness_minutes = excluded.mindfulness_minutes,
                    updated_at = excluded.updated_at"
            ),
            params![
                record.user_id,
                date_str,
                record.steps,
                record.distance,
                record.calories,
                record.active_minutes,
                record.heart_rate,
                record.resting_heart_rate,
                record.hrv,
                record.sleep_hours,
                record.sleep_quality,
                record.deep_sleep_minutes,
                record.rem_sleep_minutes,
                record.light_sleep_minutes,
                record.blood_pressure_systolic,
                record.blood_pressure_diastolic,
                record.weight,
                record.body_fat,
                record.hydration,
                record.mindfulness_minutes,
                record.created_at,
                record.updated_at,
            ],
        )?;
        self.get_record(&record.user_id, record.date)?
            .context("Daily record not found after upsert")
    }

    fn get_records_between(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyHealthRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM daily_health_records
             WHERE user_id = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date ASC"
        ))?;
        let records = stmt
            .query_map(
                params![
                    user_id,
                    start.format("%Y-%m-%d").to_string(),
                    end.format("%Y-%m-%d").to_string()
                ],
                Self::record_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn get_latest_record(&self, user_id: &str) -> Result<Option<DailyHealthRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM daily_health_records
             WHERE user_id = ?1 ORDER BY date DESC LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![user_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::record_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    fn delete_record(&self, user_id: &str, date: NaiveDate) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM daily_health_records WHERE user_id = ?1 AND date = ?2",
            params![user_id, date.format("%Y-%m-%d").to_string()],
        )?;
        Ok(rows > 0)
    }

    fn get_record_dates(&self, user_id: &str) -> Result<Vec<NaiveDate>> {
        let mut stmt = self.conn.prepare(
            "SELECT date FROM daily_health_records WHERE user_id = ?1 ORDER BY date DESC",
        )?;
        let dates: Vec<String> = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        dates
            .iter()
            .map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .with_context(|| format!("Corrupt record date '{d}'"))
            })
            .collect()
    }
}

impl SettingsStore for Database {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM user_settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO user_settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn delete_setting(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM user_settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::empty_record;
    use crate::models::RecordKey;
    use chrono::{TimeZone, Utc};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn record(user: &str, d: u32) -> DailyHealthRecord {
        let now = Utc.with_ymd_and_hms(2024, 3, d, 8, 0, 0).unwrap();
        empty_record(&RecordKey::new(user, date(d)), now)
    }

    #[test]
    fn test_upsert_and_get_record() {
        let db = Database::open_in_memory().unwrap();
        let mut r = record("alice", 1);
        r.steps = 4000;
        r.weight = Some(70.5);
        r.blood_pressure_systolic = Some(118);

        let saved = db.upsert_record(&r).unwrap();
        assert_eq!(saved, r);

        let fetched = db.get_record("alice", date(1)).unwrap().unwrap();
        assert_eq!(fetched.steps, 4000);
        assert_eq!(fetched.weight, Some(70.5));
        assert_eq!(fetched.blood_pressure_systolic, Some(118));
        assert!(fetched.body_fat.is_none());
    }

    #[test]
    fn test_get_record_missing() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_record("alice", date(1)).unwrap().is_none());
    }

    #[test]
    fn test_upsert_keeps_one_row_per_user_day() {
        let db = Database::open_in_memory().unwrap();
        let first = record("alice", 1);
        db.upsert_record(&first).unwrap();

        let mut second = record("alice", 1);
        second.steps = 900;
        second.created_at = "2099-01-01T00:00:00+00:00".to_string();
        second.updated_at = "2024-03-01T12:00:00+00:00".to_string();
        let saved = db.upsert_record(&second).unwrap();

        assert_eq!(saved.steps, 900);
        // created_at belongs to the first insert
        assert_eq!(saved.created_at, first.created_at);
        assert_eq!(saved.updated_at, "2024-03-01T12:00:00+00:00");

        let all = db.get_records_between("alice", date(1), date(1)).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_records_are_scoped_by_user() {
        let db = Database::open_in_memory().unwrap();
        let mut a = record("alice", 1);
        a.steps = 10;
        let mut b = record("bob", 1);
        b.steps = 20;
        db.upsert_record(&a).unwrap();
        db.upsert_record(&b).unwrap();

        assert_eq!(db.get_record("alice", date(1)).unwrap().unwrap().steps, 10);
        assert_eq!(db.get_record("bob", date(1)).unwrap().unwrap().steps, 20);
    }

    #[test]
    fn test_records_between_ordered() {
        let db = Database::open_in_memory().unwrap();
        for d in [5, 1, 3, 9] {
            db.upsert_record(&record("alice", d)).unwrap();
        }
        let range = db.get_records_between("alice", date(2), date(6)).unwrap();
        let dates: Vec<NaiveDate> = range.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![date(3), date(5)]);
    }

    #[test]
    fn test_latest_record() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_latest_record("alice").unwrap().is_none());
        for d in [2, 7, 4] {
            db.upsert_record(&record("alice", d)).unwrap();
        }
        db.upsert_record(&record("bob", 20)).unwrap();
        assert_eq!(db.get_latest_record("alice").unwrap().unwrap().date, date(7));
    }

    #[test]
    fn test_delete_record() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_record(&record("alice", 1)).unwrap();
        assert!(db.delete_record("alice", date(1)).unwrap());
        assert!(db.get_record("alice", date(1)).unwrap().is_none());
        assert!(!db.delete_record("alice", date(1)).unwrap());
    }

    #[test]
    fn test_record_dates_desc() {
        let db = Database::open_in_memory().unwrap();
        for d in [1, 3, 2] {
            db.upsert_record(&record("alice", d)).unwrap();
        }
        assert_eq!(
            db.get_record_dates("alice").unwrap(),
            vec![date(3), date(2), date(1)]
        );
    }

    #[test]
    fn test_settings_crud() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_setting("steps_goal").unwrap().is_none());
        db.set_setting("steps_goal", "8000").unwrap();
        db.set_setting("steps_goal", "9000").unwrap();
        assert_eq!(db.get_setting("steps_goal").unwrap().as_deref(), Some("9000"));
        assert!(db.delete_setting("steps_goal").unwrap());
        assert!(!db.delete_setting("steps_goal").unwrap());
    }

    #[test]
    fn test_default_user_id_persists() {
        let db = Database::open_in_memory().unwrap();
        let first = db.get_or_create_user_id().unwrap();
        let second = db.get_or_create_user_id().unwrap();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = std::env::temp_dir().join(format!("vitals-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("vitals.db");
        {
            let db = Database::open(&path).unwrap();
            db.upsert_record(&record("alice", 1)).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert!(db.get_record("alice", date(1)).unwrap().is_some());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
