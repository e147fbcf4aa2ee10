use crate::archive::LambdaArchive;
use crate::config::AwsClients;
use crate::lambda::{self, FunctionSpec, InvocationResult};
use crate::{s3, Error};
use serde::Serialize;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// A function deployed from a zip in S3.
/// Created fresh per scenario and removed with [Deployment::teardown].
#[derive(Debug)]
pub struct Deployment {
    pub bucket: String,
    pub key: String,
    pub function_name: String,
    pub function_arn: String,
    /// Removed from disk when the deployment is dropped.
    archive_file: NamedTempFile,
}

impl Deployment {
    /// Runs the deployment part of the workflow:
    /// archive → temp file → bucket → upload → CreateFunction.
    ///
    /// If the upload or the registration fails, the object and the bucket created so far are deleted
    /// before the error is returned.
    pub async fn create(
        clients: &AwsClients,
        archive: &LambdaArchive,
        spec: &FunctionSpec,
        bucket: &str,
        key: &str,
    ) -> Result<Self, Error> {
        info!("Deploying {} as {}\n{archive}", archive.name(), spec.function_name);

        let archive_file = archive.write_temp_file("lambda-", ".zip")?;

        s3::create_bucket(&clients.s3, bucket).await?;

        let registered = async {
            s3::upload_archive(&clients.s3, bucket, key, archive_file.path()).await?;
            lambda::create_function(&clients.lambda, spec, bucket, key).await
        }
        .await;

        let output = match registered {
            Ok(v) => v,
            Err(e) => {
                remove_uploaded_archive(clients, bucket, key).await;
                return Err(e);
            }
        };
        // create_function has already checked the ARN
        let function_arn = output.function_arn().unwrap_or_default().to_owned();

        Ok(Self {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            function_name: spec.function_name.clone(),
            function_arn,
            archive_file,
        })
    }

    /// Invokes the deployed function synchronously with a JSON-serialized request.
    pub async fn invoke<T: Serialize + ?Sized>(
        &self,
        clients: &AwsClients,
        request: &T,
    ) -> Result<InvocationResult, Error> {
        lambda::invoke_function(&clients.lambda, &self.function_name, request).await
    }

    /// Sends a payload as-is, e.g. `null`.
    pub async fn invoke_raw(&self, clients: &AwsClients, payload: &str) -> Result<InvocationResult, Error> {
        lambda::invoke_raw(&clients.lambda, &self.function_name, payload).await
    }

    pub fn archive_file(&self) -> &Path {
        self.archive_file.path()
    }

    /// Deletes the function, the object, the bucket and the local zip, in that order.
    pub async fn teardown(self, clients: &AwsClients) -> Result<(), Error> {
        lambda::delete_function(&clients.lambda, &self.function_name).await?;
        s3::delete_object(&clients.s3, &self.bucket, &self.key).await?;
        s3::delete_bucket(&clients.s3, &self.bucket).await?;

        if let Err(e) = self.archive_file.close() {
            warn!("Failed to remove the local archive: {e}");
        }

        info!("Removed {}", self.function_name);
        Ok(())
    }
}

/// Best effort. The registration error is what the caller gets, so cleanup failures are only logged.
async fn remove_uploaded_archive(clients: &AwsClients, bucket: &str, key: &str) {
    if let Err(e) = s3::delete_object(&clients.s3, bucket, key).await {
        warn!("Failed to delete s3://{bucket}/{key}: {e}");
    }
    match s3::delete_bucket(&clients.s3, bucket).await {
        Ok(()) => info!("Removed bucket {bucket} after a failed deployment"),
        Err(e) => warn!("Failed to delete bucket {bucket}: {e}"),
    }
}

/// Appends a short random suffix, e.g. `test-bucket-3f2a9c1e`.
/// Bucket and function names allow lowercase letters, digits and dashes, so the suffix uses only those.
pub fn unique_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names_differ_and_keep_the_prefix() {
        let a = unique_name("test-bucket");
        let b = unique_name("test-bucket");
        assert_ne!(a, b);
        assert!(a.starts_with("test-bucket-"));
        assert_eq!(a.len(), "test-bucket-".len() + 8);
        assert!(a.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }
}
