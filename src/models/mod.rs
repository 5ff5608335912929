use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[1-7][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("token pattern is valid")
});

/// Identifier correlating the init, upload and commit calls of one request.
/// Only UUID-shaped values are representable, so a token is always safe to
/// use as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestToken(String);

impl RequestToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts a hyphenated UUID with a version nibble of 1-7 and the
    /// RFC 4122 variant.
    pub fn parse(raw: &str) -> Option<Self> {
        TOKEN_PATTERN
            .is_match(raw)
            .then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<std::path::Path> for RequestToken {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

/// A single processing option, e.g. `{"name": "dsm", "value": true}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskOption {
    pub name: String,
    #[schema(value_type = Object)]
    pub value: Value,
}

/// Body submitted at initialization. Form submissions deliver every field as
/// a string, so structured fields also accept their JSON-encoded form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
#[serde(default)]
pub struct RequestMetadata {
    pub name: Option<String>,

    #[serde(deserialize_with = "lenient::json_or_string")]
    pub options: Vec<TaskOption>,

    #[validate(url)]
    pub webhook: Option<String>,

    #[serde(rename = "dateCreated", deserialize_with = "lenient::timestamp")]
    pub date_created: Option<DateTime<Utc>>,

    #[serde(alias = "importPath")]
    pub import_path: Option<String>,

    #[validate(url)]
    pub zipurl: Option<String>,

    #[serde(rename = "skipPostProcessing", deserialize_with = "lenient::flag")]
    pub skip_post_processing: bool,

    #[serde(deserialize_with = "lenient::json_or_string")]
    pub outputs: Option<Vec<String>>,
}

impl RequestMetadata {
    /// Builds metadata from flat string fields (urlencoded or multipart form).
    pub fn from_fields(fields: HashMap<String, String>) -> Result<Self, serde_json::Error> {
        let object: serde_json::Map<String, Value> = fields
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        serde_json::from_value(Value::Object(object))
    }

    pub fn import_path(&self) -> Option<&str> {
        self.import_path.as_deref().filter(|p| !p.is_empty())
    }

    pub fn zipurl(&self) -> Option<&str> {
        self.zipurl.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// Record handed to the job scheduler once a request is accepted
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobRecord {
    #[schema(value_type = String)]
    pub token: RequestToken,
    pub name: Option<String>,
    pub options: Vec<TaskOption>,
    pub webhook: Option<String>,
    pub skip_post_processing: bool,
    pub outputs: Option<Vec<String>>,
    pub date_created: Option<DateTime<Utc>>,
    pub images_count_estimate: usize,
}

mod lenient {
    use super::*;

    pub fn json_or_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        let value = Value::deserialize(deserializer)?;
        let value = match value {
            Value::Null => return Ok(T::default()),
            Value::String(s) if s.trim().is_empty() => return Ok(T::default()),
            Value::String(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom)?,
            other => other,
        };
        serde_json::from_value(value).map_err(serde::de::Error::custom)
    }

    pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Bool(b) => b,
            Value::String(s) => s == "true",
            _ => false,
        })
    }

    /// Milliseconds since the epoch as a number or a numeric string, or an
    /// RFC 3339 string.
    pub fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = match Value::deserialize(deserializer)? {
            Value::Null => return Ok(None),
            Value::Number(n) => n.as_i64(),
            Value::String(s) if s.trim().is_empty() => return Ok(None),
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(ms) => Some(ms),
                Err(_) => {
                    return DateTime::parse_from_rfc3339(s.trim())
                        .map(|dt| Some(dt.with_timezone(&Utc)))
                        .map_err(serde::de::Error::custom);
                }
            },
            _ => None,
        };
        millis
            .map(|ms| {
                DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| serde::de::Error::custom("dateCreated out of range"))
            })
            .transpose()
    }
}
