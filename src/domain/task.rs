//! Identities for providers and fan-out tasks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an external provider (e.g. `gemini`, `elevenlabs`, `imagen`)
///
/// Rate limiters, semaphores and registry strategies are all keyed by this id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity of one task within a fan-out group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskId {
    /// Group label (usually the owning stage name)
    pub group: String,

    /// Position in submission order
    pub index: usize,

    /// Script segment the task belongs to, when it matters
    pub segment: Option<usize>,
}

impl TaskId {
    pub fn new(group: impl Into<String>, index: usize) -> Self {
        Self {
            group: group.into(),
            index,
            segment: None,
        }
    }

    /// Tag the task with the segment it serves
    pub fn for_segment(mut self, segment: usize) -> Self {
        self.segment = Some(segment);
        self
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.segment {
            Some(segment) => write!(f, "{}[{}] (segment {})", self.group, self.index, segment),
            None => write!(f, "{}[{}]", self.group, self.index),
        }
    }
}
