use serde::Serialize;
use std::collections::BTreeMap;

/// Query parameter carrying a local picture path. Its presence switches the
/// request to a multipart upload.
pub const PICTURE_PATH_PARAM: &str = "picturePath";

/// Profile data attached to the device's user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Remote picture URL.
    #[serde(rename = "picture", skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    /// Local picture file, uploaded as a multipart part.
    #[serde(skip)]
    pub picture_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(rename = "byear", skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<u16>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

impl UserData {
    pub fn is_empty(&self) -> bool {
        *self == UserData::default()
    }

    /// `&user_details=<json>` plus `&picturePath=<path>` when a local picture
    /// is set, both form-encoded. Empty when there is nothing to send.
    pub fn to_request_fragment(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut fragment = String::new();
        if let Ok(json) = serde_json::to_string(self)
            && json != "{}"
        {
            fragment.push_str("&user_details=");
            fragment.extend(url::form_urlencoded::byte_serialize(json.as_bytes()));
        }

        if let Some(path) = self.picture_path.as_deref().filter(|p| !p.is_empty()) {
            fragment.push('&');
            fragment.push_str(PICTURE_PATH_PARAM);
            fragment.push('=');
            fragment.extend(url::form_urlencoded::byte_serialize(path.as_bytes()));
        }

        fragment
    }
}
