use crate::RequestHandler;
use lambda_runtime::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Input record defined next to its handler, serialized as `{"testProperty": "..."}`.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SameModuleInput {
    #[serde(default)]
    test_property: Option<String>,
}

impl SameModuleInput {
    pub fn new(test_property: impl Into<String>) -> Self {
        Self {
            test_property: Some(test_property.into()),
        }
    }

    pub fn test_property(&self) -> Option<&str> {
        self.test_property.as_deref()
    }
}

/// Returns `testProperty` of the input unchanged.
/// Packaged on its own: the archive holds only the `bootstrap` executable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameModuleInputRequestHandler;

impl RequestHandler for SameModuleInputRequestHandler {
    type Input = SameModuleInput;

    fn handle_request(&self, input: SameModuleInput, _ctx: &Context) -> Option<String> {
        info!("testProperty: {:?}", input.test_property);
        input.test_property
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn echoes_the_property() {
        for value in ["Testing", "", "  padded  ", "ünïcødé", "{\"nested\": true}"] {
            let output = SameModuleInputRequestHandler.handle_request(SameModuleInput::new(value), &Context::default());
            assert_eq!(output.as_deref(), Some(value));
        }
    }

    #[test]
    fn missing_or_null_property_is_echoed_as_null() {
        for payload in [json!({}), json!({ "testProperty": null })] {
            let input: SameModuleInput = serde_json::from_value(payload).unwrap();
            let output = SameModuleInputRequestHandler.handle_request(input, &Context::default());
            assert_eq!(serde_json::to_value(output).unwrap(), json!(null));
        }
    }

    #[test]
    fn serializes_to_camel_case() {
        assert_eq!(
            serde_json::to_string(&SameModuleInput::new("Testing")).unwrap(),
            r#"{"testProperty":"Testing"}"#
        );
        assert_eq!(
            serde_json::to_string(&SameModuleInput::new("")).unwrap(),
            r#"{"testProperty":""}"#
        );
    }

    #[test]
    fn null_record_does_not_deserialize() {
        assert!(serde_json::from_str::<SameModuleInput>("null").is_err());
    }
}
