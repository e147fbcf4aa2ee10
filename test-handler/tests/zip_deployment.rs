//! Packages the handler binaries as `provided.al2023` zips, uploads them to S3,
//! registers them with Lambda and invokes them.
//!
//! Runs against LocalStack if LOCALSTACK_ENDPOINT or AWS_ENDPOINT_URL is set,
//! or against an in-process emulator started for each test otherwise.

use cloud_emulator::{EmulatorConfig, EmulatorHandle};
use lambda_deployer::{
    unique_name, AwsClients, DependencyClosure, DeployerConfig, Deployment, Error, FunctionSpec, InvocationResult,
    LambdaArchive,
};
use localstack_test_handler::{OtherModuleInput, SameModuleInput};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

const SAME_MODULE_INPUT_HANDLER: &str = env!("CARGO_BIN_EXE_same-module-input-handler");
const OTHER_MODULE_INPUT_HANDLER: &str = env!("CARGO_BIN_EXE_other-module-input-handler");
const WORKSPACE_MANIFEST: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../Cargo.toml");
/// The package whose runtime dependency closure goes into `lib/` of the second archive
const HANDLER_PACKAGE: &str = env!("CARGO_PKG_NAME");
const ARCHIVE_KEY: &str = "testing.zip";

/// Where the scenarios deploy to. Shuts the emulator down, if there is one, when the test is done.
struct Cloud {
    clients: AwsClients,
    config: DeployerConfig,
    emulator: Option<EmulatorHandle>,
}

impl Cloud {
    async fn connect() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("info")
            .with_test_writer()
            .try_init();

        let config = DeployerConfig::from_env();

        let (config, emulator) = match config.endpoint_url {
            Some(_) => (config, None),
            None => {
                let emulator = cloud_emulator::start(EmulatorConfig::ephemeral())
                    .await
                    .expect("Failed to start the emulator");
                let config = DeployerConfig {
                    execution_role: config.execution_role,
                    ..DeployerConfig::for_endpoint(emulator.endpoint_url())
                };
                (config, Some(emulator))
            }
        };

        info!("Deploying to {:?}", config.endpoint_url);

        Self {
            clients: AwsClients::new(config.clone()).await,
            config,
            emulator,
        }
    }

    /// Deploys the archive under fresh bucket and function names.
    async fn deploy(&self, archive: &LambdaArchive, function_prefix: &str, handler: &str) -> Result<Deployment, Error> {
        let spec = FunctionSpec::new(unique_name(function_prefix), handler, &self.config.execution_role);
        Deployment::create(&self.clients, archive, &spec, &unique_name("test-bucket"), ARCHIVE_KEY).await
    }

    async fn shutdown(self) {
        if let Some(emulator) = self.emulator {
            emulator.shutdown().await;
        }
    }
}

fn same_module_input_archive() -> LambdaArchive {
    let mut archive = LambdaArchive::new("same-module-input");
    archive
        .add_bootstrap(Path::new(SAME_MODULE_INPUT_HANDLER))
        .expect("Failed to add the handler binary");
    archive
}

/// The handler binary plus the compiled artifacts of every package its input type depends on.
fn other_module_input_archive() -> LambdaArchive {
    let closure = DependencyClosure::resolve(Path::new(WORKSPACE_MANIFEST), HANDLER_PACKAGE)
        .expect("Failed to resolve the handler dependencies");
    let libraries = closure.artifacts(&deps_dir()).expect("Failed to find the dependency artifacts");
    assert!(!libraries.is_empty(), "No artifacts for {closure:?} in {}", deps_dir().display());

    let mut archive = LambdaArchive::new("other-module-input-with-dependencies");
    archive
        .add_bootstrap(Path::new(OTHER_MODULE_INPUT_HANDLER))
        .expect("Failed to add the handler binary")
        .add_libraries(&libraries)
        .expect("Failed to add the dependencies");
    archive
}

/// `target/<profile>/deps`, next to the handler binaries.
fn deps_dir() -> PathBuf {
    Path::new(OTHER_MODULE_INPUT_HANDLER)
        .parent()
        .expect("The handler binary has no parent dir")
        .join("deps")
}

/// Deploys, invokes once, tears down and returns the result.
/// The teardown runs before the invocation result is checked, so a failed invocation leaves nothing behind.
async fn deploy_and_invoke<T: Serialize + ?Sized>(
    cloud: &Cloud,
    archive: &LambdaArchive,
    function_prefix: &str,
    handler: &str,
    request: &T,
) -> InvocationResult {
    let deployment = cloud
        .deploy(archive, function_prefix, handler)
        .await
        .expect("Failed to deploy");
    let arn_has_name = deployment.function_arn.contains(&deployment.function_name);

    let result = deployment.invoke(&cloud.clients, request).await;

    deployment.teardown(&cloud.clients).await.expect("Failed to clean up");

    assert!(arn_has_name);
    result.expect("Failed to invoke")
}

#[tokio::test(flavor = "multi_thread")]
async fn same_module_input_handler_echoes_the_input() {
    let cloud = Cloud::connect().await;
    let archive = same_module_input_archive();
    info!("{archive}");

    let result = deploy_and_invoke(
        &cloud,
        &archive,
        "SameModuleInputRequestHandler",
        "same_module_input_handler",
        &SameModuleInput::new("Testing"),
    )
    .await;

    assert_eq!(result.status_code, 200, "{result:?}");
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.json_payload().unwrap(), serde_json::json!("Testing"));

    cloud.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn other_module_input_handler_runs_with_its_dependencies() {
    let cloud = Cloud::connect().await;
    let archive = other_module_input_archive();
    info!("{archive}");

    assert!(archive.contains("bootstrap"));
    for library in ["lib/libother_module_input-", "lib/liblambda_runtime-", "lib/libtokio-", "lib/libserde-"] {
        assert!(archive.paths().any(|v| v.starts_with(library)), "No {library} in {archive}");
    }
    // dev-dependencies of the handler package stay out
    for library in ["lib/libcloud_emulator-", "lib/liblambda_deployer-", "lib/libaws_sdk_s3-"] {
        assert!(!archive.paths().any(|v| v.starts_with(library)), "{library} in {archive}");
    }

    let result = deploy_and_invoke(
        &cloud,
        &archive,
        "OtherModuleInputRequestHandler",
        "other_module_input_handler",
        &OtherModuleInput::new("Testing"),
    )
    .await;

    assert_eq!(result.status_code, 200, "{result:?}");
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.json_payload().unwrap(), serde_json::json!("Testing"));

    cloud.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_deployments_give_the_same_result() {
    let cloud = Cloud::connect().await;
    let archive = same_module_input_archive();

    let mut results = Vec::new();
    for _ in 0..2 {
        let result = deploy_and_invoke(
            &cloud,
            &archive,
            "SameModuleInputRequestHandler",
            "same_module_input_handler",
            &SameModuleInput::new("Testing"),
        )
        .await;
        results.push((result.status_code, result.function_error, result.payload));
    }

    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].0, 200);

    cloud.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_strings_and_missing_values_round_trip() {
    let cloud = Cloud::connect().await;
    let archive = same_module_input_archive();

    let deployment = cloud
        .deploy(&archive, "SameModuleInputRequestHandler", "same_module_input_handler")
        .await
        .expect("Failed to deploy");

    let empty_string = deployment.invoke(&cloud.clients, &SameModuleInput::new("")).await;
    // an absent field comes back as null
    let missing_field = deployment.invoke_raw(&cloud.clients, "{}").await;

    deployment.teardown(&cloud.clients).await.expect("Failed to clean up");
    cloud.shutdown().await;

    let result = empty_string.expect("Failed to invoke");
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.json_payload().unwrap(), serde_json::json!(""));

    let result = missing_field.expect("Failed to invoke");
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.json_payload().unwrap(), serde_json::Value::Null);
}

#[tokio::test(flavor = "multi_thread")]
async fn null_record_is_a_function_error() {
    let cloud = Cloud::connect().await;
    let archive = same_module_input_archive();

    let deployment = cloud
        .deploy(&archive, "SameModuleInputRequestHandler", "same_module_input_handler")
        .await
        .expect("Failed to deploy");

    let null_record = deployment.invoke_raw(&cloud.clients, "null").await;
    // the function keeps serving after a failed invocation
    let next = deployment.invoke(&cloud.clients, &SameModuleInput::new("Testing")).await;

    deployment.teardown(&cloud.clients).await.expect("Failed to clean up");
    cloud.shutdown().await;

    let result = null_record.expect("Failed to invoke");
    assert_eq!(result.status_code, 200, "{result:?}");
    assert!(result.function_error.is_some(), "{result:?}");

    let result = next.expect("Failed to invoke");
    assert!(result.is_success(), "{result:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_registration_removes_the_bucket() {
    let cloud = Cloud::connect().await;
    let archive = same_module_input_archive();

    let bucket = unique_name("test-bucket");
    // spaces are not allowed in function names
    let spec = FunctionSpec::new("not a function name", "same_module_input_handler", &cloud.config.execution_role);

    let deployed = Deployment::create(&cloud.clients, &archive, &spec, &bucket, ARCHIVE_KEY).await;
    let bucket_left = cloud.clients.s3.head_bucket().bucket(&bucket).send().await.is_ok();

    cloud.shutdown().await;

    assert!(deployed.is_err(), "{deployed:?}");
    assert!(!bucket_left, "{bucket} was not removed");
}
