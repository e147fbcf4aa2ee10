//! Function registration and synchronous invocation.

use crate::Error;
use aws_sdk_lambda::operation::create_function::CreateFunctionOutput;
use aws_sdk_lambda::operation::invoke::InvokeOutput;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{Environment, FunctionCode, InvocationType, Runtime};
use aws_sdk_lambda::Client as LambdaClient;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Runtime of a Rust function: an OS-only runtime that starts `bootstrap`.
pub const DEFAULT_RUNTIME: &str = "provided.al2023";
pub const DEFAULT_DESCRIPTION: &str = "Test Lambda Function";
pub const DEFAULT_TIMEOUT_SECS: i32 = 15;
pub const DEFAULT_MEMORY_MB: i32 = 128;

/// Everything CreateFunction needs apart from the code location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub function_name: String,
    pub runtime: String,
    /// The entry point. OS-only runtimes pass it to `bootstrap` as `_HANDLER`.
    pub handler: String,
    pub description: String,
    pub timeout: i32,
    pub memory_size: i32,
    pub publish: bool,
    pub role: String,
    pub environment: HashMap<String, String>,
}

impl FunctionSpec {
    pub fn new(function_name: impl Into<String>, handler: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            runtime: DEFAULT_RUNTIME.to_owned(),
            handler: handler.into(),
            description: DEFAULT_DESCRIPTION.to_owned(),
            timeout: DEFAULT_TIMEOUT_SECS,
            memory_size: DEFAULT_MEMORY_MB,
            publish: true,
            role: role.into(),
            environment: HashMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: i32) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

/// The parts of InvokeOutput the scenarios look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    pub status_code: i32,
    /// `Unhandled` or `Handled` if the function failed, None otherwise
    pub function_error: Option<String>,
    /// The response body as text, e.g. `"Testing"` for a JSON string
    pub payload: Option<String>,
    pub executed_version: Option<String>,
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        self.status_code == 200 && self.function_error.is_none()
    }

    /// Decodes the payload as JSON. An empty payload is `null`.
    pub fn json_payload(&self) -> Result<serde_json::Value, Error> {
        match self.payload.as_deref() {
            None | Some("") => Ok(serde_json::Value::Null),
            Some(v) => Ok(serde_json::from_str(v)?),
        }
    }
}

impl From<InvokeOutput> for InvocationResult {
    fn from(output: InvokeOutput) -> Self {
        let payload = output
            .payload()
            .map(|blob| String::from_utf8_lossy(blob.as_ref()).into_owned());

        Self {
            status_code: output.status_code(),
            function_error: output.function_error().map(str::to_owned),
            payload,
            executed_version: output.executed_version().map(str::to_owned),
        }
    }
}

/// Registers the function with its code in `s3://bucket/key`.
/// A response without a function ARN means the function was not registered.
pub async fn create_function(
    client: &LambdaClient,
    spec: &FunctionSpec,
    bucket: &str,
    key: &str,
) -> Result<CreateFunctionOutput, Error> {
    let code = FunctionCode::builder().s3_bucket(bucket).s3_key(key).build();

    let mut request = client
        .create_function()
        .function_name(&spec.function_name)
        .runtime(Runtime::from(spec.runtime.as_str()))
        .role(&spec.role)
        .handler(&spec.handler)
        .code(code)
        .description(&spec.description)
        .timeout(spec.timeout)
        .memory_size(spec.memory_size)
        .publish(spec.publish);

    if !spec.environment.is_empty() {
        request = request.environment(
            Environment::builder()
                .set_variables(Some(spec.environment.clone()))
                .build(),
        );
    }

    let output = request.send().await?;

    match output.function_arn() {
        Some(arn) => info!("Function created: {arn}, version {}", output.version().unwrap_or("?")),
        None => return Err(format!("No ARN for function {}", spec.function_name).into()),
    }

    Ok(output)
}

/// Serializes the request as JSON and invokes the function synchronously.
pub async fn invoke_function<T: Serialize + ?Sized>(
    client: &LambdaClient,
    function_name: &str,
    request: &T,
) -> Result<InvocationResult, Error> {
    let payload = serde_json::to_string(request)?;
    invoke_raw(client, function_name, &payload).await
}

/// Invokes the function synchronously with an already serialized payload.
pub async fn invoke_raw(client: &LambdaClient, function_name: &str, payload: &str) -> Result<InvocationResult, Error> {
    debug!("Invoking {function_name} with {payload}");

    let output = client
        .invoke()
        .function_name(function_name)
        .invocation_type(InvocationType::RequestResponse)
        .payload(Blob::new(payload.as_bytes()))
        .send()
        .await?;

    let result = InvocationResult::from(output);

    match &result.function_error {
        None => info!("{function_name} responded with {}: {:?}", result.status_code, result.payload),
        Some(e) => warn!("{function_name} failed with {e}: {:?}", result.payload),
    }

    Ok(result)
}

pub async fn delete_function(client: &LambdaClient, function_name: &str) -> Result<(), Error> {
    client.delete_function().function_name(function_name).send().await?;
    debug!("Deleted function {function_name}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_match_the_test_function() {
        let spec = FunctionSpec::new("SameModuleInputRequestHandler", "same_module_input_handler", "role");
        assert_eq!(spec.runtime, "provided.al2023");
        assert_eq!(spec.description, "Test Lambda Function");
        assert_eq!(spec.timeout, 15);
        assert_eq!(spec.memory_size, 128);
        assert!(spec.publish);
        assert!(spec.environment.is_empty());

        let spec = spec.with_timeout(3).with_env("RUST_LOG", "debug");
        assert_eq!(spec.timeout, 3);
        assert_eq!(spec.environment.get("RUST_LOG").map(String::as_str), Some("debug"));
    }

    #[test]
    fn success_needs_200_and_no_function_error() {
        let mut result = InvocationResult {
            status_code: 200,
            function_error: None,
            payload: Some("\"Testing\"".to_owned()),
            executed_version: Some("$LATEST".to_owned()),
        };
        assert!(result.is_success());
        assert_eq!(result.json_payload().unwrap(), serde_json::json!("Testing"));

        result.function_error = Some("Unhandled".to_owned());
        assert!(!result.is_success());

        result.function_error = None;
        result.status_code = 202;
        assert!(!result.is_success());
    }

    #[test]
    fn empty_payload_is_null() {
        let result = InvocationResult {
            status_code: 204,
            function_error: None,
            payload: None,
            executed_version: None,
        };
        assert_eq!(result.json_payload().unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn converts_invoke_output() {
        let output = InvokeOutput::builder()
            .status_code(200)
            .function_error("Unhandled")
            .payload(Blob::new(r#"{"errorType":"x"}"#))
            .executed_version("$LATEST")
            .build();

        let result = InvocationResult::from(output);
        assert_eq!(result.status_code, 200);
        assert_eq!(result.function_error.as_deref(), Some("Unhandled"));
        assert_eq!(result.payload.as_deref(), Some(r#"{"errorType":"x"}"#));
        assert_eq!(result.executed_version.as_deref(), Some("$LATEST"));
    }
}
