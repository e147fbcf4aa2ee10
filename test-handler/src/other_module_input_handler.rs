use crate::RequestHandler;
use lambda_runtime::Context;
use other_module_input::OtherModuleInput;
use tracing::info;

/// Returns `otherTestProperty` of the input unchanged.
/// The input type comes from another crate, so this handler is packaged with its
/// dependency closure under `lib/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtherModuleInputRequestHandler;

impl RequestHandler for OtherModuleInputRequestHandler {
    type Input = OtherModuleInput;

    fn handle_request(&self, input: OtherModuleInput, _ctx: &Context) -> Option<String> {
        let value = input.other_test_property().map(str::to_owned);
        info!("otherTestProperty: {:?}", value);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn echoes_the_property() {
        for value in ["Testing", "", "tab\tand\nnewline"] {
            let output =
                OtherModuleInputRequestHandler.handle_request(OtherModuleInput::new(value), &Context::default());
            assert_eq!(output.as_deref(), Some(value));
        }
    }

    #[test]
    fn reads_the_camel_case_field() {
        let input: OtherModuleInput = serde_json::from_value(json!({ "otherTestProperty": "Testing" })).unwrap();
        let output = OtherModuleInputRequestHandler.handle_request(input, &Context::default());
        assert_eq!(output.as_deref(), Some("Testing"));
    }

    #[test]
    fn ignores_the_other_handlers_field() {
        let input: OtherModuleInput = serde_json::from_value(json!({ "testProperty": "Testing" })).unwrap();
        assert_eq!(
            OtherModuleInputRequestHandler.handle_request(input, &Context::default()),
            None
        );
    }
}
