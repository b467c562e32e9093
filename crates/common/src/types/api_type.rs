use serde::{Deserialize, Serialize};
use std::fmt;

/// Routing tag that partitions the worker fleet and the per-type task queues.
///
/// The closed set shipped by default is `{crunchbase, tracxn, social}`, but the
/// set is configuration-driven (worker token maps in `OrchestratorConfig` name
/// whichever api_types they authenticate), so this is a thin newtype over the
/// wire string rather than a hardcoded enum.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ApiType(pub String);

impl ApiType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn crunchbase() -> Self {
        Self::new("crunchbase")
    }

    pub fn tracxn() -> Self {
        Self::new("tracxn")
    }

    pub fn social() -> Self {
        Self::new("social")
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ApiType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ApiType {
    fn from(s: String) -> Self {
        Self(s)
    }
}
