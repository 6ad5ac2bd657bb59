use anyhow::Result;

use vitals_core::service::{GLASS_ML, HealthService};

use super::helpers::{finish, parse_quantity};

pub(crate) fn cmd_water_add(svc: &HealthService, user_id: &str, glasses: i64, json: bool) -> Result<()> {
    let glasses = parse_quantity(glasses, "glasses")?;
    let result = svc.add_water_glasses(user_id, glasses);
    finish(&result, json, |r| {
        let ml = glasses * GLASS_ML;
        println!("Added {glasses} glass(es) ({ml} ml). Today: {} ml", r.hydration);
    })
}

pub(crate) fn cmd_water_remove(
    svc: &HealthService,
    user_id: &str,
    glasses: i64,
    json: bool,
) -> Result<()> {
    let glasses = parse_quantity(glasses, "glasses")?;
    let result = svc.remove_water_glasses(user_id, glasses);
    finish(&result, json, |r| {
        println!("Removed {glasses} glass(es). Today: {} ml", r.hydration);
    })
}

pub(crate) fn cmd_mindful_add(
    svc: &HealthService,
    user_id: &str,
    minutes: i64,
    json: bool,
) -> Result<()> {
    let minutes = parse_quantity(minutes, "minutes")?;
    let result = svc.add_mindfulness_minutes(user_id, minutes);
    finish(&result, json, |r| {
        println!(
            "Added {minutes} mindful minute(s). Today: {} min",
            r.mindfulness_minutes
        );
    })
}

pub(crate) fn cmd_mindful_remove(
    svc: &HealthService,
    user_id: &str,
    minutes: i64,
    json: bool,
) -> Result<()> {
    let minutes = parse_quantity(minutes, "minutes")?;
    let result = svc.remove_mindfulness_minutes(user_id, minutes);
    finish(&result, json, |r| {
        println!(
            "Removed {minutes} mindful minute(s). Today: {} min",
            r.mindfulness_minutes
        );
    })
}
