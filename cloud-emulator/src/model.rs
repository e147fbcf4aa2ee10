//! JSON documents of the Lambda control plane. Field names are PascalCase on the wire.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Runtimes that start `bootstrap` from the root of the zip.
pub(crate) const SUPPORTED_RUNTIMES: [&str; 3] = ["provided", "provided.al2", "provided.al2023"];

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CreateFunctionRequest {
    pub function_name: String,
    #[serde(default)]
    pub runtime: Option<String>,
    pub role: String,
    #[serde(default)]
    pub handler: Option<String>,
    pub code: FunctionCode,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    #[serde(default = "default_memory_size")]
    pub memory_size: u32,
    #[serde(default)]
    pub publish: bool,
    #[serde(default)]
    pub environment: Option<Environment>,
}

fn default_timeout() -> u32 {
    3
}

fn default_memory_size() -> u32 {
    128
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct FunctionCode {
    #[serde(rename = "S3Bucket")]
    pub s3_bucket: Option<String>,
    #[serde(rename = "S3Key")]
    pub s3_key: Option<String>,
    /// Base64 of the zip
    pub zip_file: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Environment {
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct FunctionConfiguration {
    pub function_name: String,
    pub function_arn: String,
    pub runtime: String,
    pub role: String,
    pub handler: String,
    pub code_size: usize,
    pub description: String,
    pub timeout: u32,
    pub memory_size: u32,
    /// E.g. `2024-05-14T10:12:01.123+0000`
    pub last_modified: String,
    /// Base64 of the SHA-256 of the zip
    pub code_sha256: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    pub state: &'static str,
    pub last_update_status: &'static str,
    pub package_type: &'static str,
    pub architectures: Vec<&'static str>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct GetFunctionResponse {
    pub configuration: FunctionConfiguration,
    pub code: FunctionCodeLocation,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct FunctionCodeLocation {
    pub repository_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListFunctionsResponse {
    pub functions: Vec<FunctionConfiguration>,
}

/// The architecture the functions actually run on, which is the host's.
pub(crate) fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        _ => "x86_64",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_create_function_request() {
        let request: CreateFunctionRequest = serde_json::from_str(
            r#"{
                "FunctionName": "SameModuleInputRequestHandler",
                "Runtime": "provided.al2023",
                "Role": "arn:aws:iam::000000000000:role/lambda-role",
                "Handler": "same_module_input_handler",
                "Code": {"S3Bucket": "test-bucket", "S3Key": "testing.zip"},
                "Description": "Test Lambda Function",
                "Timeout": 15,
                "MemorySize": 128,
                "Publish": true,
                "Environment": {"Variables": {"RUST_LOG": "debug"}}
            }"#,
        )
        .unwrap();

        assert_eq!(request.function_name, "SameModuleInputRequestHandler");
        assert_eq!(request.code.s3_bucket.as_deref(), Some("test-bucket"));
        assert_eq!(request.code.s3_key.as_deref(), Some("testing.zip"));
        assert!(request.code.zip_file.is_none());
        assert_eq!(request.timeout, 15);
        assert!(request.publish);
        assert_eq!(request.environment.unwrap().variables["RUST_LOG"], "debug");
    }

    #[test]
    fn applies_lambda_defaults() {
        let request: CreateFunctionRequest =
            serde_json::from_str(r#"{"FunctionName": "f", "Role": "r", "Code": {"ZipFile": "UEs="}}"#).unwrap();
        assert_eq!(request.timeout, 3);
        assert_eq!(request.memory_size, 128);
        assert!(!request.publish);
        assert!(request.runtime.is_none());
    }
}
