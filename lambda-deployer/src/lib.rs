//! Packaging, deployment and invocation of zip-based Lambda functions.
//!
//! The workflow of a deployment test is strictly linear:
//! build the archive → upload it to S3 → register the function → invoke it → check the status.
//! Every step returns [Error] and the first failure ends the scenario.

pub mod archive;
pub mod config;
pub mod dependencies;
pub mod deployment;
pub mod lambda;
pub mod s3;

pub use archive::LambdaArchive;
pub use config::{AwsClients, DeployerConfig};
pub use dependencies::DependencyClosure;
pub use deployment::{unique_name, Deployment};
pub use lambda::{FunctionSpec, InvocationResult};

/// Any failure of the workflow. There is no recovery path, so the source error is passed through as-is.
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
