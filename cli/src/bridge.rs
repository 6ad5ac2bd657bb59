use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use vitals_core::models::Platform;
use vitals_core::source::NativeHealthBridge;

/// Serves a health export file as if it came from the device platform.
///
/// Desktop builds have no HealthKit or Health Connect SDK; the phone app (or a
/// shortcut) exports the raw sample JSON and `vitals sync --file` replays it.
/// A missing file reads as "permission not granted".
pub struct FileBridge {
    path: PathBuf,
}

impl FileBridge {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl NativeHealthBridge for FileBridge {
    fn is_authorized(&self) -> bool {
        self.path.is_file()
    }

    fn query_samples(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read health export: {}", self.path.display()))
    }
}

/// Serves an export that arrived in a request body.
pub struct PayloadBridge {
    payload: String,
}

impl PayloadBridge {
    pub fn new(payload: String) -> Self {
        Self { payload }
    }
}

impl NativeHealthBridge for PayloadBridge {
    fn is_authorized(&self) -> bool {
        true
    }

    fn query_samples(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<String> {
        Ok(self.payload.clone())
    }
}

/// Guess the platform from an export: Health Connect records carry a
/// `recordType` tag, HealthKit samples a `type` identifier.
pub fn sniff_platform(payload: &str) -> Option<Platform> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let first = value.as_array()?.first()?;
    if first.get("recordType").is_some() {
        Some(Platform::HealthConnect)
    } else if first.get("type").is_some() {
        Some(Platform::HealthKit)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_unauthorized() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bridge = FileBridge::new(tmp.path().join("export.json"));
        assert!(!bridge.is_authorized());
    }

    #[test]
    fn test_reads_export() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("export.json");
        std::fs::write(&path, "[]").unwrap();
        let bridge = FileBridge::new(path);
        assert!(bridge.is_authorized());
        assert_eq!(
            bridge.query_samples(Utc::now(), Utc::now()).unwrap(),
            "[]"
        );
    }

    #[test]
    fn test_payload_bridge_serves_body() {
        let bridge = PayloadBridge::new(r#"[{"recordType": "Steps"}]"#.to_string());
        assert!(bridge.is_authorized());
        assert_eq!(
            bridge.query_samples(Utc::now(), Utc::now()).unwrap(),
            r#"[{"recordType": "Steps"}]"#
        );
    }

    #[test]
    fn test_sniff_platform() {
        assert_eq!(
            sniff_platform(r#"[{"recordType": "Steps"}]"#),
            Some(Platform::HealthConnect)
        );
        assert_eq!(
            sniff_platform(r#"[{"type": "HKQuantityTypeIdentifierStepCount"}]"#),
            Some(Platform::HealthKit)
        );
        assert_eq!(sniff_platform("[]"), None);
        assert_eq!(sniff_platform("nope"), None);
    }
}
