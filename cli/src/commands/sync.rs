use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use vitals_core::models::Platform;
use vitals_core::service::HealthService;
use vitals_core::source::select_source;

use super::helpers::{finish, print_record};
use crate::bridge::{FileBridge, sniff_platform};

fn resolve_platform(path: &Path, platform: Option<&str>) -> Result<Platform> {
    if let Some(p) = platform {
        return p.parse();
    }
    std::fs::read_to_string(path)
        .ok()
        .as_deref()
        .and_then(sniff_platform)
        .or_else(Platform::detect)
        .context("Could not tell which platform the export came from. Use --platform healthkit or --platform health-connect")
}

pub(crate) fn cmd_sync(
    svc: &HealthService,
    user_id: &str,
    file: Option<PathBuf>,
    platform: Option<String>,
    force: bool,
    json: bool,
) -> Result<()> {
    let source = match file {
        Some(path) => {
            let platform = resolve_platform(&path, platform.as_deref())?;
            Some(select_source(platform, Box::new(FileBridge::new(path))))
        }
        None if platform.is_some() => bail!("--platform needs an export file (--file PATH)"),
        None => None,
    };

    let result = svc.sync_health_data(user_id, source.as_deref(), force);
    finish(&result, json, |summary| {
        if summary.heartbeat {
            println!("No health samples available; recorded a heartbeat for today.");
        } else {
            let platform = summary.platform.map_or("unknown", Platform::as_str);
            println!("Synced {} samples from {platform}.", summary.samples);
        }
        if summary.from_cache {
            println!("(synced recently; showing the cached result, use --force to resync)");
        }
        println!();
        print_record(&summary.record);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_platform_wins() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("export.json");
        std::fs::write(&path, r#"[{"recordType": "Steps"}]"#).unwrap();
        assert_eq!(
            resolve_platform(&path, Some("healthkit")).unwrap(),
            Platform::HealthKit
        );
        assert_eq!(
            resolve_platform(&path, None).unwrap(),
            Platform::HealthConnect
        );
        assert!(resolve_platform(&path, Some("fitbit")).is_err());
    }
}
