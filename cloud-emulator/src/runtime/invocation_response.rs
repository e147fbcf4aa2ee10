use super::{runtime_api_error, InvocationOutcome, RuntimeApi};
use crate::handlers::{empty, ResponseBody};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Contains compiled regex for extracting the request ID from the URL.
static REQUEST_ID_REGEX: OnceLock<Regex> = OnceLock::new();

/// Extracts the request ID from `/2018-06-01/runtime/invocation/[aws-req-id]/response`.
pub(crate) fn request_id(path: &str) -> Option<&str> {
    let regex = REQUEST_ID_REGEX.get_or_init(|| {
        Regex::new(r"/runtime/invocation/([^/]+)/response$").expect("Invalid response URL regex. It's a bug.")
    });
    Some(regex.captures(path)?.get(1)?.as_str())
}

/// Handles an invocation response from the function when it successfully completed processing.
/// The response goes back to the caller of Invoke waiting on the request ID.
/// See https://docs.aws.amazon.com/lambda/latest/dg/runtimes-api.html#runtimes-api-response
pub(crate) async fn handler(req: Request<Incoming>, api: Arc<RuntimeApi>) -> Response<ResponseBody> {
    let Some(request_id) = request_id(req.uri().path()).map(str::to_owned) else {
        return runtime_api_error(StatusCode::BAD_REQUEST, "InvalidRequestID", "No request ID in the URL");
    };

    // convert the function response to bytes
    let response = match req.into_body().collect().await {
        Ok(v) => v.to_bytes(),
        Err(e) => {
            warn!("Failed to read the response for {request_id}: {:?}", e);
            return runtime_api_error(StatusCode::BAD_REQUEST, "InvalidResponse", "Failed to read the body");
        }
    };

    match std::str::from_utf8(&response) {
        Ok(v) => info!("Response {request_id}: {v}"),
        Err(e) => warn!(
            "Non-UTF-8 response from the function. {:?}\n{}",
            e,
            hex::encode(response.as_ref())
        ),
    }

    if !api.complete(&request_id, InvocationOutcome::Response(response)) {
        warn!("Response for an unknown or expired request ID: {request_id}");
        return runtime_api_error(
            StatusCode::BAD_REQUEST,
            "InvalidRequestID",
            &format!("Unknown request ID: {request_id}"),
        );
    }

    Response::builder()
        .status(StatusCode::ACCEPTED)
        .body(empty())
        .expect("Failed to create a response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_request_ids() {
        assert_eq!(
            request_id("/2018-06-01/runtime/invocation/8476a536-e9f4-11e8-9739-2dfe598c3fcd/response"),
            Some("8476a536-e9f4-11e8-9739-2dfe598c3fcd")
        );
        assert_eq!(request_id("/2018-06-01/runtime/invocation//response"), None);
        assert_eq!(request_id("/2018-06-01/runtime/invocation/abc/error"), None);
    }
}
