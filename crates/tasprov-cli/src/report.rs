//! Writing the run report

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tasprov_core::RunReport;

/// Report file name used when none is configured
pub fn default_report_path(now: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!("tasmota_report_{}.json", now.format("%Y%m%d_%H%M%S")))
}

/// Serialize the report as indented JSON
pub fn render(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("serializing run report")
}

/// Write the report to `path` and return the rendered JSON
pub fn write_report(report: &RunReport, path: &Path) -> Result<String> {
    let json = render(report)?;
    std::fs::write(path, &json)
        .with_context(|| format!("writing report to {}", path.display()))?;
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::net::{IpAddr, Ipv4Addr};
    use tasprov_core::{DeviceRecord, RunRecord};

    #[test]
    fn test_default_path_is_timestamped() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 8, 30, 5).unwrap();
        assert_eq!(
            default_report_path(now),
            PathBuf::from("tasmota_report_20240501_083005.json")
        );
    }

    #[test]
    fn test_written_report_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let mut record = RunRecord::default();
        record
            .devices
            .push(DeviceRecord::manual(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))));
        record
            .skips
            .insert("10.0.0.7".to_string(), "Could not determine MQTT topic".to_string());
        let config = json!({"broker": {"host": "mqtt.lab", "password": "hunter2"}});
        let report = RunReport::build(&config, record);

        let json = write_report(&report, &path).unwrap();
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(json, on_disk);
        assert!(on_disk.contains('\n'));

        let value: Value = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(value["summary"]["devices_found"], 1);
        assert_eq!(value["discovered_devices"][0]["discovered_by"], "manual");
        assert_eq!(value["config_used"], json!({"broker": {"host": "mqtt.lab"}}));
        assert!(!on_disk.contains("hunter2"));
        assert_eq!(value["validation_skips"]["10.0.0.7"], "Could not determine MQTT topic");
    }

    #[test]
    fn test_unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("report.json");
        let report = RunReport::build(&json!({}), RunRecord::default());
        assert!(write_report(&report, &path).is_err());
    }
}
