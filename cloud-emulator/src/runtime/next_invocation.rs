use super::RuntimeApi;
use crate::handlers::{full, ResponseBody};
use hyper::{Response, StatusCode};
use std::sync::{Arc, PoisonError};
use tracing::{debug, info};

/// Handles _next invocation_ request from the function.
/// It waits indefinitely for the next invocation to be queued and hands it over with its context headers.
/// See https://docs.aws.amazon.com/lambda/latest/dg/runtimes-api.html#runtimes-api-next
pub(crate) async fn handler(api: Arc<RuntimeApi>) -> Response<ResponseBody> {
    // only one poller at a time can wait on the queue
    let next = api.queue.lock().await.recv().await;

    // The instance is being stopped and its process killed. Any response, even an error,
    // would make the runtime client fail on a missing request ID before the kill lands.
    let Some(invocation) = next else {
        debug!("No more invocations for {}", api.function_arn);
        return std::future::pending().await;
    };

    info!("Invocation {}: {}", invocation.request_id, String::from_utf8_lossy(&invocation.payload));

    api.in_flight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(invocation.request_id.clone(), invocation.reply);

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .header("lambda-runtime-aws-request-id", &invocation.request_id)
        .header("lambda-runtime-deadline-ms", invocation.deadline_ms.to_string())
        .header("lambda-runtime-invoked-function-arn", &api.function_arn)
        .header("lambda-runtime-trace-id", trace_id(&invocation.request_id))
        .body(full(invocation.payload))
        .expect("Failed to create a response")
}

/// An X-Ray style header. Nothing reads it, but the runtime client copies it into `_X_AMZN_TRACE_ID`.
fn trace_id(request_id: &str) -> String {
    let epoch = format!("{:08x}", chrono::Utc::now().timestamp());
    let id = request_id.replace('-', "");
    format!("Root=1-{epoch}-{};Parent={};Sampled=0", &id[..24], &id[24..])
}
