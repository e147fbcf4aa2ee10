//! Invoke: hands the payload to the function's runtime and returns what it responds with.

use super::{empty, full, read_body, ResponseBody};
use crate::error::ServiceError;
use crate::runtime::{InvocationOutcome, RuntimeInstance};
use crate::state::{EmulatorState, Function};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{error, info};

const INVOCATION_TYPE_HEADER: &str = "x-amz-invocation-type";
const FUNCTION_ERROR_HEADER: &str = "x-amz-function-error";
const EXECUTED_VERSION_HEADER: &str = "x-amz-executed-version";

pub(crate) async fn handler(
    req: Request<Incoming>,
    state: Arc<EmulatorState>,
    name: &str,
) -> Result<Response<ResponseBody>, ServiceError> {
    let function = state.function(name)?;

    let invocation_type = req
        .headers()
        .get(INVOCATION_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("RequestResponse")
        .to_owned();

    let payload = read_body(req).await?;

    match invocation_type.as_str() {
        "RequestResponse" => {
            let outcome = invoke(&function, &state, payload).await;
            Ok(outcome_response(outcome, function.configuration.timeout))
        }
        "Event" => {
            tokio::spawn(async move {
                let outcome = invoke(&function, &state, payload).await;
                info!(
                    "Async invocation of {} finished: {:?}",
                    function.configuration.function_name, outcome
                );
            });
            Ok(Response::builder()
                .status(StatusCode::ACCEPTED)
                .body(empty())
                .expect("Failed to create a response"))
        }
        "DryRun" => Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(empty())
            .expect("Failed to create a response")),
        other => Err(ServiceError::invalid_parameter(format!(
            "Invalid invocation type: {other}. Use RequestResponse, Event or DryRun"
        ))),
    }
}

/// Runs one invocation, starting the runtime if it is not running yet.
/// A runtime that timed out or died is discarded and the next invocation starts a new one.
async fn invoke(function: &Function, state: &EmulatorState, payload: Bytes) -> InvocationOutcome {
    let request_id = uuid::Uuid::new_v4().to_string();
    let mut instance = function.instance.lock().await;

    let running = match instance.take() {
        Some(v) if !v.has_exited() => v,
        _ => {
            let started =
                RuntimeInstance::start(&function.configuration, &function.code, &state.work_dir, &state.config.region)
                    .await;
            match started {
                Ok(v) => v,
                Err(e) => {
                    error!("{e}");
                    return InvocationOutcome::FunctionError(error_document(
                        "Runtime.InvalidEntrypoint",
                        &format!("RequestId: {request_id} Error: {e}"),
                    ));
                }
            }
        }
    };

    let outcome = running.invoke(&request_id, payload).await;

    if outcome != InvocationOutcome::TimedOut && !running.has_exited() {
        *instance = Some(running);
    }

    outcome
}

/// RequestResponse results always have status 200. Failures are flagged with `X-Amz-Function-Error`.
fn outcome_response(outcome: InvocationOutcome, timeout: u32) -> Response<ResponseBody> {
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .header(EXECUTED_VERSION_HEADER, "$LATEST");

    let response = match outcome {
        InvocationOutcome::Response(body) => builder.body(full(body)),
        InvocationOutcome::FunctionError(body) => builder.header(FUNCTION_ERROR_HEADER, "Unhandled").body(full(body)),
        InvocationOutcome::TimedOut => builder.header(FUNCTION_ERROR_HEADER, "Unhandled").body(full(
            serde_json::json!({
                "errorMessage": format!(
                    "{} Task timed out after {timeout}.00 seconds",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
                ),
            })
            .to_string(),
        )),
    };

    response.expect("Failed to create a response")
}

fn error_document(error_type: &str, message: &str) -> Bytes {
    Bytes::from(serde_json::json!({ "errorType": error_type, "errorMessage": message }).to_string())
}
