use super::{runtime_api_error, InvocationOutcome, RuntimeApi};
use crate::handlers::{empty, ResponseBody};
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use regex::Regex;
use std::sync::{Arc, OnceLock, PoisonError};
use tracing::{info, warn};

static REQUEST_ID_REGEX: OnceLock<Regex> = OnceLock::new();

/// Extracts the request ID from `/2018-06-01/runtime/invocation/[aws-req-id]/error`.
pub(crate) fn request_id(path: &str) -> Option<&str> {
    let regex = REQUEST_ID_REGEX.get_or_init(|| {
        Regex::new(r"/runtime/invocation/([^/]+)/error$").expect("Invalid error URL regex. It's a bug.")
    });
    Some(regex.captures(path)?.get(1)?.as_str())
}

/// Invocation error (https://docs.aws.amazon.com/lambda/latest/dg/runtimes-api.html#runtimes-api-invokeerror).
/// The error document is passed to the caller as the payload of an `Unhandled` function error.
pub(crate) async fn handler(req: Request<Incoming>, api: Arc<RuntimeApi>) -> Response<ResponseBody> {
    let Some(request_id) = request_id(req.uri().path()).map(str::to_owned) else {
        return runtime_api_error(StatusCode::BAD_REQUEST, "InvalidRequestID", "No request ID in the URL");
    };

    let Some(error) = read_error(req).await else {
        return runtime_api_error(StatusCode::BAD_REQUEST, "InvalidErrorResponse", "Failed to read the body");
    };

    if !api.complete(&request_id, InvocationOutcome::FunctionError(error)) {
        warn!("Error for an unknown or expired request ID: {request_id}");
        return runtime_api_error(
            StatusCode::BAD_REQUEST,
            "InvalidRequestID",
            &format!("Unknown request ID: {request_id}"),
        );
    }

    accepted()
}

/// Initialization error (https://docs.aws.amazon.com/lambda/latest/dg/runtimes-api.html#runtimes-api-initerror).
/// The function exits after reporting it, so the error is kept for the invocation that is waiting.
pub(crate) async fn init_error(req: Request<Incoming>, api: Arc<RuntimeApi>) -> Response<ResponseBody> {
    let Some(error) = read_error(req).await else {
        return runtime_api_error(StatusCode::BAD_REQUEST, "InvalidErrorResponse", "Failed to read the body");
    };

    *api.init_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);

    accepted()
}

/// Reads and logs the error document.
async fn read_error(req: Request<Incoming>) -> Option<Bytes> {
    let error_type = req
        .headers()
        .get("lambda-runtime-function-error-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("Unhandled")
        .to_owned();

    let error = match req.into_body().collect().await {
        Ok(v) => v.to_bytes(),
        Err(e) => {
            warn!("Failed to read the error document: {:?}", e);
            return None;
        }
    };

    match std::str::from_utf8(&error) {
        Ok(v) => info!("Function error ({error_type}): {v}"),
        Err(e) => warn!(
            "Non-UTF-8 error response from the function. {:?}\n{}",
            e,
            hex::encode(error.as_ref())
        ),
    }

    Some(error)
}

fn accepted() -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::ACCEPTED)
        .body(empty())
        .expect("Failed to create a response")
}
