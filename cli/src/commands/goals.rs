use anyhow::Result;
use chrono::Local;

use vitals_core::models::Goals;
use vitals_core::service::HealthService;

fn print_goals(goals: &Goals) {
    println!("Daily goals:");
    println!("  Steps:        {}", goals.steps);
    println!("  Water:        {} ml", goals.hydration_ml);
    println!("  Mindfulness:  {} min", goals.mindfulness_minutes);
    println!("  Sleep:        {:.1} h", goals.sleep_hours);
}

pub(crate) fn cmd_goals_show(svc: &HealthService, json: bool) -> Result<()> {
    let goals = svc.get_goals()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&goals)?);
    } else {
        print_goals(&goals);
    }
    Ok(())
}

/// Update the goals that were passed, keeping the rest.
pub(crate) fn cmd_goals_set(
    svc: &HealthService,
    steps: Option<i64>,
    water_ml: Option<i64>,
    mindful_minutes: Option<i64>,
    sleep_hours: Option<f64>,
    json: bool,
) -> Result<()> {
    let current = svc.get_goals()?;
    let updated = Goals {
        steps: steps.unwrap_or(current.steps),
        hydration_ml: water_ml.unwrap_or(current.hydration_ml),
        mindfulness_minutes: mindful_minutes.unwrap_or(current.mindfulness_minutes),
        sleep_hours: sleep_hours.unwrap_or(current.sleep_hours),
    };
    let saved = svc.set_goals(&updated)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&saved)?);
    } else {
        print_goals(&saved);
    }
    Ok(())
}

pub(crate) fn cmd_goals_reset(svc: &HealthService, json: bool) -> Result<()> {
    let goals = svc.reset_goals()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&goals)?);
    } else {
        println!("Goals reset to defaults.");
        print_goals(&goals);
    }
    Ok(())
}

pub(crate) fn cmd_streak(svc: &HealthService, user_id: &str, json: bool) -> Result<()> {
    let streak = svc.get_sync_streak(user_id, Local::now().date_naive())?;
    if json {
        println!("{}", serde_json::json!({ "streak": streak }));
    } else if streak == 0 {
        println!("No current streak. Sync today to start one.");
    } else {
        println!("{streak} day streak");
    }
    Ok(())
}

pub(crate) fn cmd_widget(svc: &HealthService, user_id: &str, json: bool) -> Result<()> {
    let w = svc.get_widget_snapshot(user_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&w)?);
        return Ok(());
    }

    let pct = |p: f64| (p * 100.0).round();
    println!("=== {} ===", w.date);
    println!(
        "  Steps   {:>6} / {:<6} {:>3.0}%",
        w.steps,
        w.steps_goal,
        pct(w.steps_progress)
    );
    println!(
        "  Water   {:>6} / {:<6} {:>3.0}%",
        w.hydration_ml,
        w.hydration_goal_ml,
        pct(w.hydration_progress)
    );
    println!(
        "  Mindful {:>6} / {:<6} min",
        w.mindfulness_minutes, w.mindfulness_goal_minutes
    );
    println!("  Sleep   {:>6.1} / {:<6.1} h", w.sleep_hours, w.sleep_goal_hours);
    if w.heart_rate > 0 {
        println!("  Heart   {:>6} bpm", w.heart_rate);
    }
    println!("  Streak  {:>6} days", w.streak);
    Ok(())
}
