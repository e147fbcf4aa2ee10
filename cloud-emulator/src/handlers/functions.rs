//! CreateFunction, GetFunction, GetFunctionConfiguration, ListFunctions and DeleteFunction.

use super::{empty, json_response, read_body, ResponseBody};
use crate::error::ServiceError;
use crate::model::{
    host_architecture, CreateFunctionRequest, FunctionCodeLocation, FunctionConfiguration, GetFunctionResponse,
    ListFunctionsResponse, SUPPORTED_RUNTIMES,
};
use crate::state::{EmulatorState, Function};
use base64::Engine;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::sync::OnceLock;
use tracing::info;

static FUNCTION_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

/// The executable OS-only runtimes start.
const BOOTSTRAP: &str = "bootstrap";

pub(crate) async fn create(
    req: Request<Incoming>,
    state: &EmulatorState,
) -> Result<Response<ResponseBody>, ServiceError> {
    let body = read_body(req).await?;
    let request = serde_json::from_slice::<CreateFunctionRequest>(&body)
        .map_err(|e| ServiceError::invalid_parameter(format!("Invalid CreateFunction request: {e}")))?;

    validate_function_name(&request.function_name)?;

    let runtime = request.runtime.clone().unwrap_or_default();
    if !SUPPORTED_RUNTIMES.contains(&runtime.as_str()) {
        return Err(ServiceError::invalid_parameter(format!(
            "Unsupported runtime: {runtime:?}. Use one of {SUPPORTED_RUNTIMES:?}"
        )));
    }

    let (code, code_location) = function_code(state, &request)?;
    validate_zip(&code)?;

    let configuration = FunctionConfiguration {
        function_arn: state.function_arn(&request.function_name),
        function_name: request.function_name,
        runtime,
        role: request.role,
        handler: request.handler.unwrap_or_default(),
        code_size: code.len(),
        description: request.description.unwrap_or_default(),
        timeout: request.timeout,
        memory_size: request.memory_size,
        last_modified: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f%z").to_string(),
        code_sha256: base64::engine::general_purpose::STANDARD.encode(Sha256::digest(&code)),
        version: if request.publish { "1" } else { "$LATEST" }.to_owned(),
        environment: request.environment,
        state: "Active",
        last_update_status: "Successful",
        package_type: "Zip",
        architectures: vec![host_architecture()],
    };

    let function = state.add_function(Function {
        configuration,
        code,
        code_location,
        instance: tokio::sync::Mutex::new(None),
    })?;

    info!(
        "Function created: {}, {} bytes",
        function.configuration.function_arn, function.configuration.code_size
    );

    Ok(json_response(StatusCode::CREATED, &function.configuration))
}

pub(crate) fn get(state: &EmulatorState, name: &str) -> Result<Response<ResponseBody>, ServiceError> {
    let function = state.function(name)?;

    let response = GetFunctionResponse {
        configuration: function.configuration.clone(),
        code: FunctionCodeLocation {
            repository_type: "S3",
            location: function
                .code_location
                .as_ref()
                .map(|v| format!("{}/{v}", state.endpoint_url)),
        },
    };

    Ok(json_response(StatusCode::OK, &response))
}

pub(crate) fn get_configuration(state: &EmulatorState, name: &str) -> Result<Response<ResponseBody>, ServiceError> {
    let function = state.function(name)?;
    Ok(json_response(StatusCode::OK, &function.configuration))
}

pub(crate) fn list(state: &EmulatorState) -> Response<ResponseBody> {
    json_response(
        StatusCode::OK,
        &ListFunctionsResponse {
            functions: state.list_functions(),
        },
    )
}

/// The function's runtime process, if any, is killed once in-flight invocations return.
pub(crate) fn delete(state: &EmulatorState, name: &str) -> Result<Response<ResponseBody>, ServiceError> {
    let function = state.remove_function(name)?;
    info!("Function deleted: {}", function.configuration.function_arn);

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(empty())
        .expect("Failed to create a response"))
}

fn validate_function_name(name: &str) -> Result<(), ServiceError> {
    let regex = FUNCTION_NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9\-_]{1,64}$").expect("Invalid function name regex. It's a bug.")
    });

    if !regex.is_match(name) {
        return Err(ServiceError::invalid_parameter(format!(
            "Invalid function name: {name:?}. Use 1 to 64 letters, digits, - or _"
        )));
    }

    Ok(())
}

/// Returns the zip and `bucket/key` if it came from S3.
fn function_code(
    state: &EmulatorState,
    request: &CreateFunctionRequest,
) -> Result<(Bytes, Option<String>), ServiceError> {
    let code = &request.code;

    match (&code.s3_bucket, &code.s3_key, &code.zip_file) {
        (Some(bucket), Some(key), None) => {
            let object = state.get_object(bucket, key).map_err(|e| {
                ServiceError::invalid_parameter(format!("Error occurred while GetObject. S3 Bucket: {bucket}, S3 Key: {key}. {e}"))
            })?;
            Ok((object.body, Some(format!("{bucket}/{key}"))))
        }
        (None, None, Some(zip_file)) => {
            let zip = base64::engine::general_purpose::STANDARD
                .decode(zip_file)
                .map_err(|e| ServiceError::invalid_parameter(format!("ZipFile is not valid base64: {e}")))?;
            Ok((Bytes::from(zip), None))
        }
        _ => Err(ServiceError::invalid_parameter(
            "Code must have either S3Bucket and S3Key or ZipFile",
        )),
    }
}

/// The zip must open and have `bootstrap` at its root.
fn validate_zip(code: &Bytes) -> Result<(), ServiceError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(code.as_ref()))
        .map_err(|e| ServiceError::invalid_parameter(format!("Could not unzip uploaded file: {e}")))?;

    if archive.by_name(BOOTSTRAP).is_err() {
        return Err(ServiceError::invalid_parameter(format!(
            "The zip has no {BOOTSTRAP} at its root. Files: {:?}",
            archive.file_names().collect::<Vec<_>>()
        )));
    }

    Ok(())
}
