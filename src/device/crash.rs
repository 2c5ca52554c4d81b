use super::DeviceMetrics;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Instant;

/// Context attached to crash reports: breadcrumb logs, custom segments and
/// the process start time.
#[derive(Debug)]
pub struct CrashDetails {
    started: Instant,
    logs: Mutex<Vec<String>>,
    custom: Mutex<BTreeMap<String, String>>,
}

impl Default for CrashDetails {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashDetails {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            logs: Mutex::new(Vec::new()),
            custom: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn add_log(&self, record: impl Into<String>) {
        self.logs.lock().push(record.into());
    }

    pub fn set_custom_segments(&self, segments: BTreeMap<String, String>) {
        self.custom.lock().extend(segments);
    }

    pub fn run_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// The crash blob as a JSON object.
    pub fn crash_json(&self, metrics: &DeviceMetrics, error: &str, nonfatal: bool) -> Value {
        let name = error.lines().next().unwrap_or_default();
        let mut crash = json!({
            "_os": metrics.os,
            "_os_version": metrics.os_version,
            "_device": metrics.device,
            "_resolution": metrics.resolution,
            "_app_version": metrics.app_version,
            "_name": name,
            "_error": error,
            "_nonfatal": nonfatal.to_string(),
            "_logs": self.logs.lock().join("\n"),
            "_run": self.run_seconds(),
        });

        let custom = self.custom.lock();
        if !custom.is_empty()
            && let Value::Object(fields) = &mut crash
        {
            let segments: Map<String, Value> = custom
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            fields.insert("_custom".to_string(), Value::Object(segments));
        }

        crash
    }

    /// Form-encoded crash blob, ready for the `crash` parameter.
    pub fn crash_data(&self, metrics: &DeviceMetrics, error: &str, nonfatal: bool) -> String {
        let json = self.crash_json(metrics, error, nonfatal).to_string();
        url::form_urlencoded::byte_serialize(json.as_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> DeviceMetrics {
        DeviceMetrics {
            device: "host-1".to_string(),
            os: "linux".to_string(),
            app_version: "1.0".to_string(),
            ..DeviceMetrics::default()
        }
    }

    #[test]
    fn test_crash_fields() {
        let details = CrashDetails::new();
        details.add_log("opened settings");
        details.add_log("tapped save");

        let crash = details.crash_json(&metrics(), "panic: index out of bounds\n  at main.rs:3", false);
        assert_eq!(crash["_name"], "panic: index out of bounds");
        assert_eq!(crash["_error"], "panic: index out of bounds\n  at main.rs:3");
        assert_eq!(crash["_nonfatal"], "false");
        assert_eq!(crash["_logs"], "opened settings\ntapped save");
        assert_eq!(crash["_os"], "linux");
        assert_eq!(crash["_device"], "host-1");
        assert!(crash["_run"].is_u64());
        assert!(crash.get("_custom").is_none());
    }

    #[test]
    fn test_custom_segments() {
        let details = CrashDetails::new();
        details.set_custom_segments(BTreeMap::from([("build".to_string(), "nightly".to_string())]));

        let crash = details.crash_json(&metrics(), "boom", true);
        assert_eq!(crash["_custom"]["build"], "nightly");
        assert_eq!(crash["_nonfatal"], "true");
    }

    #[test]
    fn test_crash_data_is_form_encoded() {
        let data = CrashDetails::new().crash_data(&metrics(), "a&b=c", true);
        assert!(!data.contains('&'));
        assert!(!data.contains('='));
        assert!(data.starts_with("%7B"));
    }
}
