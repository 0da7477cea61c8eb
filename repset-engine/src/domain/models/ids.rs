use serde::{Deserialize, Serialize};
use std::fmt;

/// A training session identifier.
///
/// Wraps String: identifiers are assigned by the remote backend and are
/// opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of the preset exercise group a session is created from.
/// The template itself lives outside this engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetGroupId(String);

impl PresetGroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PresetGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PresetGroupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for PresetGroupId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for PresetGroupId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// An athlete identifier. Absent means the acting user, which the backend
/// resolves on its side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AthleteId(String);

impl AthleteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AthleteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AthleteId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for AthleteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for AthleteId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// An exercise identifier within a preset group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExerciseId(String);

impl ExerciseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExerciseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ExerciseId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for ExerciseId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ExerciseId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of a persisted performance detail. Only exists once the
/// backend has accepted the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetailId(String);

impl DetailId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DetailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DetailId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for DetailId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DetailId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
