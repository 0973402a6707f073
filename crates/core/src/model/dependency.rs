use serde::{Deserialize, Serialize};

/// Aggregated edge between two services, produced from search results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DependencyLink {
    pub parent: String,
    pub child: String,
    pub call_count: u64,
    #[serde(default)]
    pub error_count: u64,
}

impl DependencyLink {
    pub fn new(parent: impl Into<String>, child: impl Into<String>, call_count: u64) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            call_count,
            error_count: 0,
        }
    }
}
