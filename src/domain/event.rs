use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Segmentation values attached to an event. Ordered so the encoded JSON is
/// stable for identical inputs.
pub type Segmentation = BTreeMap<String, String>;

/// A single buffered usage event.
///
/// Identity is `(key, timestamp, hour, dow, segmentation)`; `count` and `sum`
/// are deliberately excluded so duplicates recorded at the same moment compare
/// equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub key: String,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    pub timestamp: i64,
    pub hour: u32,
    pub dow: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<Segmentation>,
}

impl Event {
    /// Builds an event, dropping a non-finite `sum`.
    pub fn new(
        key: impl Into<String>,
        segmentation: Option<Segmentation>,
        count: u32,
        sum: Option<f64>,
        timestamp: i64,
        hour: u32,
        dow: u32,
    ) -> Self {
        Self {
            key: key.into(),
            count,
            sum: sum.filter(|s| s.is_finite()),
            timestamp,
            hour,
            dow,
            segmentation,
        }
    }

    /// Parses an event back out of its JSON form.
    ///
    /// Returns `None` when the object is malformed or carries no usable key.
    /// Null segmentation values are skipped rather than rejected.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        let key = object.get("key")?.as_str()?;
        if key.is_empty() {
            return None;
        }

        let int = |field: &str| object.get(field).and_then(serde_json::Value::as_i64).unwrap_or(0);

        let segmentation = match object.get("segmentation") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Object(map)) => Some(
                map.iter()
                    .filter_map(|(k, v)| match v {
                        serde_json::Value::Null => None,
                        serde_json::Value::String(s) => Some((k.clone(), s.clone())),
                        other => Some((k.clone(), other.to_string())),
                    })
                    .collect(),
            ),
            Some(_) => return None,
        };

        Some(Self::new(
            key,
            segmentation,
            u32::try_from(int("count")).unwrap_or(0),
            object.get("sum").and_then(serde_json::Value::as_f64),
            int("timestamp"),
            u32::try_from(int("hour")).unwrap_or(0),
            u32::try_from(int("dow")).unwrap_or(0),
        ))
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.timestamp == other.timestamp
            && self.hour == other.hour
            && self.dow == other.dow
            && self.segmentation == other.segmentation
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.timestamp.hash(state);
        self.hour.hash(state);
        self.dow.hash(state);
        self.segmentation.hash(state);
    }
}
