// workhub-messaging-core/src/replica/record.rs
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::MessagingError;

/// Flat field map of a replica record.
pub type Fields = serde_json::Map<String, Value>;

/// External identifier of a replicated entity, as issued by the owning service.
///
/// Integer ids arrive either as JSON numbers or as their decimal string (URL
/// primary keys), so a string in canonical decimal form is always read as
/// [`RecordId::Int`]. `7` and `"7"` name the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl RecordId {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordId::Int),
            Value::String(s) if !s.is_empty() => Some(RecordId::from_text(s)),
            _ => None,
        }
    }

    fn from_text(s: &str) -> Self {
        match s.parse::<i64>() {
            Ok(i) if i.to_string() == s => RecordId::Int(i),
            _ => RecordId::Str(s.to_string()),
        }
    }

    /// Reads the identifier from a bare scalar payload, or from the first of
    /// `fields` present on an object payload.
    pub fn from_payload(payload: &Value, fields: &[&str]) -> Result<Self, MessagingError> {
        let found = match payload {
            Value::Object(map) => fields
                .iter()
                .find_map(|f| map.get(*f).and_then(RecordId::from_value)),
            other => RecordId::from_value(other),
        };
        found.ok_or_else(|| {
            MessagingError::Handler(format!(
                "payload carries no identifier (looked for {fields:?}): {payload}"
            ))
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(i) => Value::from(*i),
            RecordId::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RecordId::from_value(&value).ok_or_else(|| {
            serde::de::Error::custom(format!("not a record identifier: {value}"))
        })
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{i}"),
            RecordId::Str(s) => f.write_str(s),
        }
    }
}

/// Discriminator between the two person subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonKind {
    Customer,
    Worker,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginStatus {
    #[default]
    Login,
    Logout,
}

impl LoginStatus {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "login" => Some(Self::Login),
            "logout" => Some(Self::Logout),
            _ => None,
        }
    }
}

/// Local copy of a person owned by the user service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonReplica {
    pub id_person: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_user: Option<RecordId>,
    #[serde(default)]
    pub login_status: LoginStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<PersonKind>,
}

impl PersonReplica {
    pub fn into_fields(self) -> Result<Fields, MessagingError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(MessagingError::Serialization(format!(
                "person replica serialized to a non-object: {other}"
            ))),
        }
    }

    pub fn from_fields(fields: Fields) -> Result<Self, MessagingError> {
        Ok(serde_json::from_value(Value::Object(fields))?)
    }
}
