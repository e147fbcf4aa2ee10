use crate::error::ServiceError;
use crate::state::EmulatorState;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) mod functions;
pub(crate) mod invoke;
pub(crate) mod s3;

pub(crate) type ResponseBody = BoxBody<Bytes, hyper::Error>;

/// All Lambda control plane paths start with this. Everything else is S3.
const FUNCTIONS_PATH: &str = "/2015-03-31/functions";

/// A body for 202/204 responses and HEAD requests.
pub(crate) fn empty() -> ResponseBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// Wraps anything convertible into Bytes, e.g. a String, into a response body.
pub(crate) fn full<T: Into<Bytes>>(chunk: T) -> ResponseBody {
    Full::new(chunk.into()).map_err(|never| match never {}).boxed()
}

pub(crate) fn json_response<T: serde::Serialize>(status: hyper::StatusCode, value: &T) -> Response<ResponseBody> {
    let body = serde_json::to_vec(value).expect("Failed to serialize a response. It's a bug.");
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full(body))
        .expect("Failed to create a response")
}

pub(crate) async fn read_body(req: Request<Incoming>) -> Result<Bytes, ServiceError> {
    Ok(req.into_body().collect().await?.to_bytes())
}

/// Percent-decodes a path segment, e.g. `arn%3Aaws%3Alambda` → `arn:aws:lambda`.
pub(crate) fn decode_segment(segment: &str) -> Result<String, ServiceError> {
    urlencoding::decode(segment)
        .map(|v| v.into_owned())
        .map_err(|_| ServiceError::invalid_parameter(format!("Invalid URL encoding: {segment}")))
}

/// Returns the value of a query parameter, e.g. `prefix` in `?list-type=2&prefix=lib%2F`.
pub(crate) fn query_param(req: &Request<Incoming>, name: &str) -> Option<String> {
    find_query_param(req.uri().query()?, name)
}

fn find_query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// The handler function converted into a Tower service to serve the incoming S3 and Lambda requests.
pub(crate) async fn cloud_api_handler(
    req: Request<Incoming>,
    state: Arc<EmulatorState>,
) -> Result<Response<ResponseBody>, hyper::Error> {
    debug!("{} {}", req.method(), req.uri());

    let functions_path = req
        .uri()
        .path()
        .strip_prefix(FUNCTIONS_PATH)
        .map(|rest| rest.trim_matches('/').to_owned());

    let response = match functions_path {
        Some(rest) => route_functions(req, state, rest).await,
        None => s3::handler(req, state).await,
    };

    match response {
        Ok(v) => Ok(v),
        Err(e) => {
            warn!("{e}");
            Ok(e.into_response())
        }
    }
}

/// `rest` is the path after `/2015-03-31/functions/` without the slashes around it.
async fn route_functions(
    req: Request<Incoming>,
    state: Arc<EmulatorState>,
    rest: String,
) -> Result<Response<ResponseBody>, ServiceError> {
    let segments = rest.split('/').filter(|v| !v.is_empty()).collect::<Vec<_>>();

    let method = req.method().clone();

    match (method.as_str(), segments.as_slice()) {
        ("POST", []) => functions::create(req, &state).await,
        ("GET", []) => Ok(functions::list(&state)),
        ("GET", [name]) => functions::get(&state, &decode_segment(name)?),
        ("GET", [name, "configuration"]) => functions::get_configuration(&state, &decode_segment(name)?),
        ("DELETE", [name]) => functions::delete(&state, &decode_segment(name)?),
        ("POST", [name, "invocations"]) => {
            let name = decode_segment(name)?;
            invoke::handler(req, state, &name).await
        }
        _ => Err(ServiceError::lambda(
            hyper::StatusCode::NOT_FOUND,
            "UnknownOperationException",
            format!("Unsupported operation: {method} {FUNCTIONS_PATH}/{rest}"),
        )),
    }
}
