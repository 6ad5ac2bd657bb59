mod adjust;
mod goals;
mod helpers;
mod ping;
mod record;
mod sync;

pub(crate) use adjust::{cmd_mindful_add, cmd_mindful_remove, cmd_water_add, cmd_water_remove};
pub(crate) use goals::{cmd_goals_reset, cmd_goals_set, cmd_goals_show, cmd_streak, cmd_widget};
pub(crate) use ping::cmd_ping;
pub(crate) use record::{ObservationArgs, cmd_delete, cmd_history, cmd_log, cmd_show};
pub(crate) use sync::cmd_sync;
