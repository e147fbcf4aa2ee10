//! Lambda `bootstrap` for `OtherModuleInputRequestHandler`.
use lambda_runtime::Error;
use localstack_test_handler::{init_tracing, run, OtherModuleInputRequestHandler};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    run(OtherModuleInputRequestHandler).await
}
