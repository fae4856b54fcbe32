//! Request bodies and the caller-facing property types
//!
//! | Path | Body |
//! |------|------|
//! | `/e` | url, contextId, identifier?, displayName?, name, customData?, userData? |
//! | `/l` | url, contextId, identifier?, displayName? |
//! | `/i` | identifier, displayName?, data? |
//! | `/u` | data |
//! | `/r` | empty object |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mutations applied to the stored user profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    /// Properties to overwrite
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub set: Map<String, Value>,

    /// Properties to write only if not already present
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub set_once: Map<String, Value>,

    /// Properties to remove
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unset: Vec<String>,
}

impl UserData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(key.into(), value.into());
        self
    }

    pub fn set_once(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_once.insert(key.into(), value.into());
        self
    }

    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.unset.push(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.set_once.is_empty() && self.unset.is_empty()
    }
}

/// Options for `track_event`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventProps {
    /// Sent as `customData` when non-empty
    pub event_data: Map<String, Value>,
    /// Sent as `userData` when non-empty
    pub user_data: Option<UserData>,
    /// Deliver as a beacon instead of an awaited request
    pub beacon: bool,
}

impl EventProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.event_data.insert(key.into(), value.into());
        self
    }

    pub fn user_data(mut self, user_data: UserData) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn beacon(mut self) -> Self {
        self.beacon = true;
        self
    }
}

/// Options for `identify`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifyProps {
    pub identifier: String,
    pub display_name: Option<String>,
    pub data: Option<UserData>,
    /// Overrides the configured `Allow-Cookies` header for this request
    pub allow_cookies: Option<bool>,
}

impl IdentifyProps {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn data(mut self, data: UserData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn allow_cookies(mut self, allow_cookies: bool) -> Self {
        self.allow_cookies = Some(allow_cookies);
        self
    }
}

/// Fields shared by page-bound payloads
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagePayload {
    /// Current URL after masking
    pub url: String,
    pub context_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Body of `/e`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(flatten)]
    pub page: PagePayload,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<UserData>,
}

/// Body of `/i`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyPayload {
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<UserData>,
}

/// Body of `/u`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateUserPayload {
    pub data: UserData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_payload_omits_empty_fields() {
        let payload = EventPayload {
            page: PagePayload {
                url: "https://example.com/".to_string(),
                context_id: "42".to_string(),
                identifier: None,
                display_name: None,
            },
            name: "signup".to_string(),
            custom_data: None,
            user_data: None,
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"url": "https://example.com/", "contextId": "42", "name": "signup"})
        );
    }

    #[test]
    fn test_user_data_wire_format() {
        let data = UserData::new()
            .set("plan", "pro")
            .set_once("firstSeen", "2024-01-01")
            .unset("trial");
        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            json!({"set": {"plan": "pro"}, "setOnce": {"firstSeen": "2024-01-01"}, "unset": ["trial"]})
        );
        assert!(UserData::new().is_empty());
        assert!(!data.is_empty());
    }

    #[test]
    fn test_identify_payload() {
        let payload = IdentifyPayload {
            identifier: "user-1".to_string(),
            display_name: Some("Ada".to_string()),
            data: None,
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"identifier": "user-1", "displayName": "Ada"})
        );
    }
}
