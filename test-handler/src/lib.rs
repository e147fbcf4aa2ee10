//! Echo handlers used to check that zip-packaged Rust functions deploy and run on an emulated cloud.
//!
//! Each handler has its own binary under `src/bin` that becomes the `bootstrap` of a Lambda archive.
use lambda_runtime::{service_fn, Context, Error, LambdaEvent};
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

mod other_module_input_handler;
mod same_module_input_handler;

pub use other_module_input::OtherModuleInput;
pub use other_module_input_handler::OtherModuleInputRequestHandler;
pub use same_module_input_handler::{SameModuleInput, SameModuleInputRequestHandler};

/// A handler that accepts one typed input and returns a string.
/// `None` is returned to the caller as JSON `null`.
pub trait RequestHandler: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + 'static;

    fn handle_request(&self, input: Self::Input, ctx: &Context) -> Option<String>;
}

/// Runs the handler inside the Lambda runtime until the host stops the process.
/// A payload that does not deserialize into `H::Input`, e.g. `null`, is reported
/// to the runtime API as an invocation error by `lambda_runtime`.
pub async fn run<H: RequestHandler>(handler: H) -> Result<(), Error> {
    let handler = Arc::new(handler);

    lambda_runtime::run(service_fn(move |event: LambdaEvent<H::Input>| {
        let handler = handler.clone();
        async move {
            let (input, ctx) = event.into_parts();
            debug!("Request ID: {}", ctx.request_id);
            Ok::<Option<String>, Error>(handler.handle_request(input, &ctx))
        }
    }))
    .await
}

/// Minimal logging for the handler binaries.
/// The host adds its own timestamps so the time is omitted.
/// Uses RUST_LOG if present, INFO for the handler crate otherwise.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(
                    Directive::from_str("localstack_test_handler=info").expect("Invalid logging filter. It's a bug."),
                )
                .from_env_lossy(),
        )
        .without_time()
        .with_ansi(false)
        .with_target(false)
        .compact()
        .init();
}
