//! Device and platform collaborators: metrics, identity, user profile data
//! and crash details.

pub mod crash;
pub mod identity;
pub mod user_data;

pub use crash::CrashDetails;
pub use identity::{DeviceId, DurableIdSource, IdentityProvider, StoredUuidSource};
pub use user_data::UserData;

#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use std::net::UdpSocket;

/// Flat device facts reported with session begins and crash reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceMetrics {
    #[serde(rename = "_device", skip_serializing_if = "String::is_empty")]
    pub device: String,
    #[serde(rename = "_os", skip_serializing_if = "String::is_empty")]
    pub os: String,
    #[serde(rename = "_os_version", skip_serializing_if = "String::is_empty")]
    pub os_version: String,
    #[serde(rename = "_carrier", skip_serializing_if = "String::is_empty")]
    pub carrier: String,
    #[serde(rename = "_resolution", skip_serializing_if = "String::is_empty")]
    pub resolution: String,
    #[serde(rename = "_density", skip_serializing_if = "String::is_empty")]
    pub density: String,
    #[serde(rename = "_locale", skip_serializing_if = "String::is_empty")]
    pub locale: String,
    #[serde(rename = "_app_version", skip_serializing_if = "String::is_empty")]
    pub app_version: String,
    #[serde(rename = "_store", skip_serializing_if = "String::is_empty")]
    pub store: String,
}

impl DeviceMetrics {
    /// JSON object of the non-empty facts.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Form-encoded JSON, ready for the `metrics` parameter.
    pub fn to_encoded_json(&self) -> String {
        url::form_urlencoded::byte_serialize(self.to_json().as_bytes()).collect()
    }
}

/// Platform lookups. Pure from the pipeline's point of view.
#[cfg_attr(test, automock)]
pub trait DeviceFacts: Send + Sync {
    fn metrics(&self) -> DeviceMetrics;

    /// Local address of the host, if one can be determined.
    fn ip_address(&self) -> Option<String>;
}

/// Facts gathered from the host process.
#[derive(Debug, Clone)]
pub struct HostDeviceFacts {
    app_version: String,
}

impl HostDeviceFacts {
    pub fn new(app_version: impl Into<String>) -> Self {
        Self {
            app_version: app_version.into(),
        }
    }

    fn os_version() -> String {
        std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .map(|release| release.trim().to_string())
            .unwrap_or_default()
    }

    fn locale() -> String {
        std::env::var("LC_ALL")
            .or_else(|_| std::env::var("LANG"))
            .map(|lang| {
                lang.split('.')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            })
            .unwrap_or_default()
    }
}

impl DeviceFacts for HostDeviceFacts {
    fn metrics(&self) -> DeviceMetrics {
        let device = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();

        DeviceMetrics {
            device,
            os: std::env::consts::OS.to_string(),
            os_version: Self::os_version(),
            locale: Self::locale(),
            app_version: self.app_version.clone(),
            ..DeviceMetrics::default()
        }
    }

    fn ip_address(&self) -> Option<String> {
        // Connecting a UDP socket sends nothing; it only selects a route.
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        let address = socket.local_addr().ok()?.ip();
        if address.is_unspecified() {
            None
        } else {
            Some(address.to_string())
        }
    }
}
