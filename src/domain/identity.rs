use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the device identifier is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceIdType {
    /// Supplied verbatim by the embedding application.
    DeveloperSupplied,
    /// Generated once on the platform and persisted.
    OpenUdid,
    /// Advertising identifier, resolved asynchronously by the platform.
    AdvertisingId,
}

impl DeviceIdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceIdType::DeveloperSupplied => "DEVELOPER_SUPPLIED",
            DeviceIdType::OpenUdid => "OPEN_UDID",
            DeviceIdType::AdvertisingId => "ADVERTISING_ID",
        }
    }
}

impl fmt::Display for DeviceIdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceIdType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEVELOPER_SUPPLIED" => Ok(DeviceIdType::DeveloperSupplied),
            "OPEN_UDID" => Ok(DeviceIdType::OpenUdid),
            "ADVERTISING_ID" => Ok(DeviceIdType::AdvertisingId),
            other => Err(format!("unknown device id type '{other}'")),
        }
    }
}

/// Immutable identifier snapshot read once per dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id_type: DeviceIdType,
    pub value: Option<String>,
}

impl DeviceIdentity {
    pub fn resolved(id_type: DeviceIdType, value: impl Into<String>) -> Self {
        Self {
            id_type,
            value: Some(value.into()),
        }
    }

    pub fn unresolved(id_type: DeviceIdType) -> Self {
        Self {
            id_type,
            value: None,
        }
    }

    /// The identifier value, if it has been resolved to something non-empty.
    pub fn id(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }

    pub fn is_resolved(&self) -> bool {
        self.id().is_some()
    }
}

/// Precedence rule evaluated at initialization: a persisted override always
/// wins over the freshly requested type.
pub fn effective_type(stored_override: Option<DeviceIdType>, requested: DeviceIdType) -> DeviceIdType {
    stored_override.unwrap_or(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_override_wins() {
        assert_eq!(
            effective_type(Some(DeviceIdType::OpenUdid), DeviceIdType::AdvertisingId),
            DeviceIdType::OpenUdid
        );
        assert_eq!(
            effective_type(None, DeviceIdType::AdvertisingId),
            DeviceIdType::AdvertisingId
        );
    }

    #[test]
    fn test_type_string_round_trip() {
        for id_type in [
            DeviceIdType::DeveloperSupplied,
            DeviceIdType::OpenUdid,
            DeviceIdType::AdvertisingId,
        ] {
            assert_eq!(id_type.to_string().parse::<DeviceIdType>().unwrap(), id_type);
        }
        assert!("SOMETHING_ELSE".parse::<DeviceIdType>().is_err());
    }

    #[test]
    fn test_empty_value_is_unresolved() {
        let identity = DeviceIdentity::resolved(DeviceIdType::DeveloperSupplied, "");
        assert!(!identity.is_resolved());
        assert!(DeviceIdentity::resolved(DeviceIdType::OpenUdid, "abc").is_resolved());
        assert!(!DeviceIdentity::unresolved(DeviceIdType::AdvertisingId).is_resolved());
    }
}
