use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which probe produced a signal. Serialized as the kebab-case identifier
/// carried on the `adBlockerDetected` event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DetectionMethod {
    ElementVisibility,
    ScriptBlock,
    GlobalSymbol,
    FetchBlock,
    AdvancedElement,
    ImageLoad,
    /// Method reported over the event bus that this crate has no probe for.
    Other(String),
}

impl DetectionMethod {
    pub fn as_str(&self) -> &str {
        match self {
            DetectionMethod::ElementVisibility => "element-visibility",
            DetectionMethod::ScriptBlock => "script-block",
            DetectionMethod::GlobalSymbol => "global-symbol",
            DetectionMethod::FetchBlock => "fetch-block",
            DetectionMethod::AdvancedElement => "advanced-element",
            DetectionMethod::ImageLoad => "image-load",
            DetectionMethod::Other(name) => name,
        }
    }
}

impl From<String> for DetectionMethod {
    fn from(value: String) -> Self {
        match value.as_str() {
            "element-visibility" => DetectionMethod::ElementVisibility,
            "script-block" => DetectionMethod::ScriptBlock,
            "global-symbol" => DetectionMethod::GlobalSymbol,
            "fetch-block" => DetectionMethod::FetchBlock,
            "advanced-element" => DetectionMethod::AdvancedElement,
            "image-load" => DetectionMethod::ImageLoad,
            _ => DetectionMethod::Other(value),
        }
    }
}

impl From<&str> for DetectionMethod {
    fn from(value: &str) -> Self {
        DetectionMethod::from(value.to_string())
    }
}

impl From<DetectionMethod> for String {
    fn from(method: DetectionMethod) -> Self {
        match method {
            DetectionMethod::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One positive observation from a probe. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSignal {
    pub method: DetectionMethod,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl DetectionSignal {
    pub fn new(method: DetectionMethod, details: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            method,
            details,
            timestamp,
        }
    }
}

/// Payload of the `adBlockerDetected` event: `{ method, details?, url? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdBlockerDetectedEvent {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl AdBlockerDetectedEvent {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            details: None,
            url: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Folds `url` into the details object so the signal keeps a single
    /// free-form context value.
    pub fn into_parts(self) -> (DetectionMethod, Value) {
        let method = DetectionMethod::from(self.method);
        let details = match (self.details, self.url) {
            (details, None) => details.unwrap_or(Value::Null),
            (Some(Value::Object(mut map)), Some(url)) => {
                map.entry("url").or_insert(Value::String(url));
                Value::Object(map)
            }
            (None | Some(Value::Null), Some(url)) => {
                let mut map = Map::new();
                map.insert("url".into(), Value::String(url));
                Value::Object(map)
            }
            (Some(other), Some(url)) => {
                let mut map = Map::new();
                map.insert("detail".into(), other);
                map.insert("url".into(), Value::String(url));
                Value::Object(map)
            }
        };
        (method, details)
    }
}
