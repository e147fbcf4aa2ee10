//! Bucket and object calls of the deployment workflow.

use crate::Error;
use aws_sdk_s3::operation::put_object::PutObjectOutput;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client as S3Client;
use std::path::Path;
use tracing::{debug, info};

/// Creates the bucket and returns its location, e.g. `/test-bucket`.
/// us-east-1 is the only region that rejects an explicit location constraint.
pub async fn create_bucket(client: &S3Client, bucket: &str) -> Result<String, Error> {
    let region = client.config().region().map(|r| r.to_string());

    let mut request = client.create_bucket().bucket(bucket);
    if let Some(region) = region.filter(|r| r != "us-east-1") {
        request = request.create_bucket_configuration(
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region.as_str()))
                .build(),
        );
    }

    let output = request.send().await?;
    let location = output
        .location()
        .map_or_else(|| format!("/{bucket}"), str::to_owned);
    info!("Bucket created: {location}");

    Ok(location)
}

/// Uploads the archive file. A response without an ETag means the object was not stored.
pub async fn upload_archive(client: &S3Client, bucket: &str, key: &str, file: &Path) -> Result<PutObjectOutput, Error> {
    let body = ByteStream::from_path(file).await?;

    let output = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .content_type("application/zip")
        .body(body)
        .send()
        .await?;

    match output.e_tag() {
        Some(e_tag) => info!("Uploaded s3://{bucket}/{key}, ETag {e_tag}"),
        None => return Err(format!("No ETag for s3://{bucket}/{key}").into()),
    }

    Ok(output)
}

pub async fn delete_object(client: &S3Client, bucket: &str, key: &str) -> Result<(), Error> {
    client.delete_object().bucket(bucket).key(key).send().await?;
    debug!("Deleted s3://{bucket}/{key}");
    Ok(())
}

pub async fn delete_bucket(client: &S3Client, bucket: &str) -> Result<(), Error> {
    client.delete_bucket().bucket(bucket).send().await?;
    debug!("Deleted bucket {bucket}");
    Ok(())
}
