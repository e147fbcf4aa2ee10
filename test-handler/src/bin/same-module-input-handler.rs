//! Lambda `bootstrap` for `SameModuleInputRequestHandler`.
use lambda_runtime::Error;
use localstack_test_handler::{init_tracing, run, SameModuleInputRequestHandler};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    run(SameModuleInputRequestHandler).await
}
