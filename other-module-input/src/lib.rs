//! Input record for `OtherModuleInputRequestHandler`.
//! It lives in its own crate so that the handler depends on another module
//! and has a non-trivial dependency closure to package.
use serde::{Deserialize, Serialize};

/// A flat record with a single string property, serialized as `{"otherTestProperty": "..."}`.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OtherModuleInput {
    /// A missing or `null` property is kept as `None` and echoed back as `null`
    #[serde(default)]
    other_test_property: Option<String>,
}

impl OtherModuleInput {
    pub fn new(other_test_property: impl Into<String>) -> Self {
        Self {
            other_test_property: Some(other_test_property.into()),
        }
    }

    pub fn other_test_property(&self) -> Option<&str> {
        self.other_test_property.as_deref()
    }
}
