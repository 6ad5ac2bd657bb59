use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use vitals_core::models::{ActionResult, DailyHealthRecord};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

pub(crate) fn parse_quantity(n: i64, what: &str) -> Result<i64> {
    if n <= 0 {
        bail!("Number of {what} must be greater than 0");
    }
    Ok(n)
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// Print an envelope and turn `success: false` into a non-zero exit.
///
/// With `--json` the envelope itself is printed, otherwise `render` shows the
/// data. A failure that still carries data (written after a fail-open read)
/// renders the data before reporting the error.
pub(crate) fn finish<T: Serialize>(
    result: &ActionResult<T>,
    json: bool,
    render: impl FnOnce(&T),
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        if !result.success {
            process::exit(1);
        }
        return Ok(());
    }

    if let Some(data) = &result.data {
        render(data);
    }
    if result.success {
        Ok(())
    } else {
        bail!(
            "{}",
            result.error.as_deref().unwrap_or("Operation failed")
        )
    }
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

fn or_dash(v: i64) -> String {
    if v == 0 { "-".into() } else { v.to_string() }
}

pub(crate) fn print_record(r: &DailyHealthRecord) {
    let date = r.date.format("%Y-%m-%d");
    println!("=== {date} ===\n");

    println!("  ACTIVITY");
    println!(
        "    Steps: {}  Distance: {:.2} km  Active: {} kcal, {} min",
        r.steps,
        no_neg_zero(r.distance),
        r.calories,
        r.active_minutes
    );

    println!("  HEART");
    println!(
        "    Heart rate: {} bpm  Resting: {} bpm  HRV: {:.1} ms",
        or_dash(r.heart_rate),
        or_dash(r.resting_heart_rate),
        no_neg_zero(r.hrv)
    );
    if let (Some(sys), Some(dia)) = (r.blood_pressure_systolic, r.blood_pressure_diastolic) {
        println!("    Blood pressure: {sys}/{dia} mmHg");
    }

    println!("  SLEEP");
    println!(
        "    {:.2} h  Quality: {}  Deep: {} min  REM: {} min  Light: {} min",
        no_neg_zero(r.sleep_hours),
        or_dash(r.sleep_quality),
        r.deep_sleep_minutes,
        r.rem_sleep_minutes,
        r.light_sleep_minutes
    );

    if r.weight.is_some() || r.body_fat.is_some() {
        println!("  BODY");
        let weight = r.weight.map_or("-".into(), |w| format!("{w:.2} kg"));
        let fat = r.body_fat.map_or("-".into(), |f| format!("{f:.1}%"));
        println!("    Weight: {weight}  Body fat: {fat}");
    }

    println!("  DAILY");
    println!(
        "    Water: {} ml  Mindfulness: {} min",
        r.hydration, r.mindfulness_minutes
    );
    println!("\n  Updated: {}", r.updated_at);
}

pub(crate) fn print_history_table(records: &[DailyHealthRecord]) {
    #[derive(Tabled)]
    struct HistoryRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Steps")]
        steps: i64,
        #[tabled(rename = "km")]
        distance: String,
        #[tabled(rename = "kcal")]
        calories: i64,
        #[tabled(rename = "HR")]
        heart_rate: String,
        #[tabled(rename = "Sleep")]
        sleep: String,
        #[tabled(rename = "Water")]
        water: String,
        #[tabled(rename = "Mindful")]
        mindful: String,
    }

    let rows: Vec<HistoryRow> = records
        .iter()
        .map(|r| HistoryRow {
            date: r.date.format("%Y-%m-%d").to_string(),
            steps: r.steps,
            distance: format!("{:.2}", no_neg_zero(r.distance)),
            calories: r.calories,
            heart_rate: or_dash(r.heart_rate),
            sleep: format!("{:.1}h", no_neg_zero(r.sleep_hours)),
            water: format!("{}ml", r.hydration),
            mindful: format!("{}m", r.mindfulness_minutes),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}
