use crate::domain::context::ElementContext;
use crate::error::FailureKind;
use crate::types::Key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded, operator-visible processing failure
///
/// An incident pins the failure classification and message to the element
/// instance and the context that was in flight when the failure happened.
/// Processing of that instance halts until the incident is resolved, which
/// replays the original command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Key of the incident record
    pub key: Key,
    /// Element instance the incident is attached to
    pub element_instance_key: Key,
    /// Failure classification
    pub kind: FailureKind,
    /// Human-readable failure description
    pub message: String,
    /// The command to replay on resolution; carries the in-flight context,
    /// not the originally received one
    pub command: ElementContext,
    /// When the incident was raised
    pub created_at: DateTime<Utc>,
}

impl Incident {
    /// Record a new incident for the given in-flight command context
    pub fn new(key: Key, kind: FailureKind, message: impl Into<String>, command: ElementContext) -> Self {
        Self {
            key,
            element_instance_key: command.element_instance_key,
            kind,
            message: message.into(),
            command,
            created_at: Utc::now(),
        }
    }
}

impl FailureKind {
    /// Serialized marker kept stable for operator tooling
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Expression => "EXPRESSION",
            FailureKind::RecordTooLarge => "RECORD_TOO_LARGE",
            FailureKind::CalledElement => "CALLED_ELEMENT",
            FailureKind::Configuration => "CONFIGURATION",
        }
    }
}

impl Serialize for FailureKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FailureKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let marker = String::deserialize(deserializer)?;
        match marker.as_str() {
            "EXPRESSION" => Ok(FailureKind::Expression),
            "RECORD_TOO_LARGE" => Ok(FailureKind::RecordTooLarge),
            "CALLED_ELEMENT" => Ok(FailureKind::CalledElement),
            "CONFIGURATION" => Ok(FailureKind::Configuration),
            other => Err(serde::de::Error::custom(format!("unknown failure kind '{other}'"))),
        }
    }
}
