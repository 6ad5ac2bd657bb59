use anyhow::Result;
use chrono::Local;
use std::process;

use vitals_core::models::HealthObservation;
use vitals_core::service::HealthService;

use super::helpers::{finish, json_error, parse_date, print_history_table, print_record};

/// Metric flags accepted by `vitals log`.
#[derive(clap::Args, Debug, Default)]
pub(crate) struct ObservationArgs {
    /// Step count
    #[arg(long)]
    steps: Option<f64>,
    /// Distance in km
    #[arg(long)]
    distance: Option<f64>,
    /// Active energy in kcal
    #[arg(long)]
    calories: Option<f64>,
    /// Exercise minutes
    #[arg(long)]
    active_minutes: Option<f64>,
    /// Heart rate (bpm)
    #[arg(long)]
    heart_rate: Option<f64>,
    /// Resting heart rate (bpm)
    #[arg(long)]
    resting_heart_rate: Option<f64>,
    /// Heart rate variability (ms)
    #[arg(long)]
    hrv: Option<f64>,
    /// Hours slept
    #[arg(long)]
    sleep_hours: Option<f64>,
    /// Sleep quality score (0-100)
    #[arg(long)]
    sleep_quality: Option<f64>,
    /// Deep sleep minutes
    #[arg(long)]
    deep_sleep: Option<f64>,
    /// REM sleep minutes
    #[arg(long)]
    rem_sleep: Option<f64>,
    /// Light sleep minutes
    #[arg(long)]
    light_sleep: Option<f64>,
    /// Systolic blood pressure (mmHg)
    #[arg(long)]
    systolic: Option<f64>,
    /// Diastolic blood pressure (mmHg)
    #[arg(long)]
    diastolic: Option<f64>,
    /// Body weight in kg
    #[arg(long)]
    weight: Option<f64>,
    /// Body fat percentage
    #[arg(long)]
    body_fat: Option<f64>,
    /// Total water for the day in ml (replaces the current total)
    #[arg(long)]
    hydration: Option<f64>,
    /// Total mindfulness minutes for the day (replaces the current total)
    #[arg(long)]
    mindfulness: Option<f64>,
}

impl From<ObservationArgs> for HealthObservation {
    fn from(a: ObservationArgs) -> Self {
        HealthObservation {
            steps: a.steps,
            distance: a.distance,
            calories: a.calories,
            active_minutes: a.active_minutes,
            heart_rate: a.heart_rate,
            resting_heart_rate: a.resting_heart_rate,
            hrv: a.hrv,
            sleep_hours: a.sleep_hours,
            sleep_quality: a.sleep_quality,
            deep_sleep_minutes: a.deep_sleep,
            rem_sleep_minutes: a.rem_sleep,
            light_sleep_minutes: a.light_sleep,
            blood_pressure_systolic: a.systolic,
            blood_pressure_diastolic: a.diastolic,
            weight: a.weight,
            body_fat: a.body_fat,
            hydration: a.hydration,
            mindfulness_minutes: a.mindfulness,
        }
    }
}

pub(crate) fn cmd_show(
    svc: &HealthService,
    user_id: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let date_str = date.format("%Y-%m-%d");

    if let Some(record) = svc.get_record(user_id, date)? {
        if json {
            println!("{}", serde_json::to_string_pretty(&record)?);
        } else {
            print_record(&record);
        }
    } else {
        if json {
            println!("{}", json_error(&format!("No record for {date_str}")));
        } else {
            eprintln!("No record for {date_str}. Run `vitals sync` or `vitals log` first.");
        }
        process::exit(2);
    }

    Ok(())
}

pub(crate) fn cmd_history(svc: &HealthService, user_id: &str, days: u32, json: bool) -> Result<()> {
    let end = Local::now().date_naive();
    let start = end - chrono::Duration::days(i64::from(days.max(1)) - 1);
    let records = svc.get_history(user_id, start, end)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        eprintln!("No records in the last {days} days");
        process::exit(2);
    }

    print_history_table(&records);
    Ok(())
}

pub(crate) fn cmd_log(
    svc: &HealthService,
    user_id: &str,
    observation: ObservationArgs,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let observation = HealthObservation::from(observation);
    if observation.is_empty() {
        anyhow::bail!("Nothing to log. Pass at least one metric, e.g. --steps 4000");
    }

    let result = svc.record_observation(user_id, Some(date), &observation);
    finish(&result, json, |record| {
        println!("Logged observation for {}", record.date.format("%Y-%m-%d"));
        print_record(record);
    })
}

pub(crate) fn cmd_delete(svc: &HealthService, user_id: &str, date: String, json: bool) -> Result<()> {
    let date = parse_date(Some(date))?;
    let date_str = date.format("%Y-%m-%d").to_string();

    if !svc.delete_record(user_id, date)? {
        if json {
            println!("{}", json_error(&format!("No record for {date_str}")));
        } else {
            eprintln!("No record for {date_str}");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::json!({ "deleted": date_str }));
    } else {
        println!("Deleted record for {date_str}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_args_map_every_flag() {
        let args = ObservationArgs {
            steps: Some(4000.0),
            deep_sleep: Some(55.0),
            systolic: Some(120.0),
            mindfulness: Some(0.0),
            ..Default::default()
        };
        let obs = HealthObservation::from(args);
        assert_eq!(obs.steps, Some(4000.0));
        assert_eq!(obs.deep_sleep_minutes, Some(55.0));
        assert_eq!(obs.blood_pressure_systolic, Some(120.0));
        assert_eq!(obs.mindfulness_minutes, Some(0.0));
        assert!(obs.hydration.is_none());
    }

    #[test]
    fn test_empty_args_are_empty_observation() {
        assert!(HealthObservation::from(ObservationArgs::default()).is_empty());
    }
}
