//! Path-style S3: `/{bucket}` and `/{bucket}/{key}`.

use super::{decode_segment, empty, full, query_param, read_body, ResponseBody};
use crate::error::{xml_escape, ServiceError};
use crate::state::{EmulatorState, StoredObject};
use chrono::{DateTime, Utc};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use md5::{Digest, Md5};
use regex::Regex;
use std::fmt::Write;
use std::sync::{Arc, OnceLock};

static BUCKET_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";
const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

pub(crate) async fn handler(
    req: Request<Incoming>,
    state: Arc<EmulatorState>,
) -> Result<Response<ResponseBody>, ServiceError> {
    let path = req.uri().path().trim_start_matches('/').to_owned();

    let (bucket, key) = match path.split_once('/') {
        Some((bucket, key)) if !key.is_empty() => (decode_segment(bucket)?, Some(decode_segment(key)?)),
        Some((bucket, _)) => (decode_segment(bucket)?, None),
        None => (decode_segment(&path)?, None),
    };

    if bucket.is_empty() {
        if req.method() == Method::GET {
            return Ok(list_buckets(&state));
        }
        return Err(method_not_allowed(req.method()));
    }

    let method = req.method().clone();

    match key {
        None if method == Method::PUT => create_bucket(&state, &bucket),
        None if method == Method::HEAD => head_bucket(&state, &bucket),
        None if method == Method::DELETE => {
            state.delete_bucket(&bucket)?;
            Ok(no_content())
        }
        None if method == Method::GET => {
            let prefix = query_param(&req, "prefix").unwrap_or_default();
            list_objects(&state, &bucket, &prefix)
        }
        Some(key) if method == Method::PUT => put_object(req, &state, &bucket, &key).await,
        Some(key) if method == Method::GET => get_object(&state, &bucket, &key, true),
        Some(key) if method == Method::HEAD => get_object(&state, &bucket, &key, false),
        Some(key) if method == Method::DELETE => {
            state.delete_object(&bucket, &key)?;
            Ok(no_content())
        }
        _ => Err(method_not_allowed(&method)),
    }
}

fn create_bucket(state: &EmulatorState, bucket: &str) -> Result<Response<ResponseBody>, ServiceError> {
    let regex = BUCKET_NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9.\-]{1,61}[a-z0-9]$").expect("Invalid bucket name regex. It's a bug.")
    });

    if !regex.is_match(bucket) {
        return Err(ServiceError::s3(
            StatusCode::BAD_REQUEST,
            "InvalidBucketName",
            format!("The specified bucket is not valid: {bucket}"),
        ));
    }

    if !state.create_bucket(bucket) {
        return Err(ServiceError::s3(
            StatusCode::CONFLICT,
            "BucketAlreadyOwnedByYou",
            format!("Your previous request to create the named bucket succeeded and you already own it: {bucket}"),
        ));
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("location", format!("/{bucket}"))
        .body(empty())
        .expect("Failed to create a response"))
}

fn head_bucket(state: &EmulatorState, bucket: &str) -> Result<Response<ResponseBody>, ServiceError> {
    if !state.bucket_exists(bucket) {
        return Err(ServiceError::no_such_bucket(bucket));
    }
    Ok(Response::builder()
        .status(StatusCode::OK)
        .body(empty())
        .expect("Failed to create a response"))
}

async fn put_object(
    req: Request<Incoming>,
    state: &EmulatorState,
    bucket: &str,
    key: &str,
) -> Result<Response<ResponseBody>, ServiceError> {
    // fail before reading a potentially large body
    if !state.bucket_exists(bucket) {
        return Err(ServiceError::no_such_bucket(bucket));
    }

    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_owned();

    let body = read_body(req).await?;
    let etag = hex::encode(Md5::digest(&body));

    state.put_object(
        bucket,
        key,
        StoredObject {
            body,
            etag: etag.clone(),
            content_type,
            last_modified: Utc::now(),
        },
    )?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("etag", format!("\"{etag}\""))
        .body(empty())
        .expect("Failed to create a response"))
}

fn get_object(
    state: &EmulatorState,
    bucket: &str,
    key: &str,
    with_body: bool,
) -> Result<Response<ResponseBody>, ServiceError> {
    let object = state.get_object(bucket, key)?;

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header("etag", format!("\"{}\"", object.etag))
        .header("content-type", object.content_type)
        .header("content-length", object.body.len())
        .header("last-modified", http_date(&object.last_modified));

    let body = if with_body { full(object.body) } else { empty() };

    Ok(builder.body(body).expect("Failed to create a response"))
}

fn list_buckets(state: &EmulatorState) -> Response<ResponseBody> {
    let mut xml = format!(
        "{XML_HEADER}<ListAllMyBucketsResult xmlns=\"{S3_NAMESPACE}\"><Owner><ID>000000000000</ID><DisplayName>emulator</DisplayName></Owner><Buckets>"
    );
    for (name, created) in state.list_buckets() {
        let _ = write!(
            xml,
            "<Bucket><Name>{}</Name><CreationDate>{}</CreationDate></Bucket>",
            xml_escape(&name),
            iso_date(&created)
        );
    }
    xml.push_str("</Buckets></ListAllMyBucketsResult>");

    xml_response(xml)
}

/// ListObjectsV2 without pagination.
fn list_objects(state: &EmulatorState, bucket: &str, prefix: &str) -> Result<Response<ResponseBody>, ServiceError> {
    let objects = state.list_objects(bucket, prefix)?;

    let mut xml = format!(
        "{XML_HEADER}<ListBucketResult xmlns=\"{S3_NAMESPACE}\"><Name>{}</Name><Prefix>{}</Prefix><KeyCount>{}</KeyCount><MaxKeys>1000</MaxKeys><IsTruncated>false</IsTruncated>",
        xml_escape(bucket),
        xml_escape(prefix),
        objects.len()
    );
    for (key, object) in objects {
        let _ = write!(
            xml,
            "<Contents><Key>{}</Key><LastModified>{}</LastModified><ETag>&quot;{}&quot;</ETag><Size>{}</Size><StorageClass>STANDARD</StorageClass></Contents>",
            xml_escape(&key),
            iso_date(&object.last_modified),
            object.etag,
            object.body.len()
        );
    }
    xml.push_str("</ListBucketResult>");

    Ok(xml_response(xml))
}

fn xml_response(xml: String) -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/xml")
        .body(full(xml))
        .expect("Failed to create a response")
}

fn no_content() -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(empty())
        .expect("Failed to create a response")
}

fn method_not_allowed(method: &Method) -> ServiceError {
    ServiceError::s3(
        StatusCode::METHOD_NOT_ALLOWED,
        "MethodNotAllowed",
        format!("The specified method is not allowed against this resource: {method}"),
    )
}

/// E.g. `Wed, 12 Oct 2009 17:50:00 GMT`
fn http_date(value: &DateTime<Utc>) -> String {
    value.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// E.g. `2009-10-12T17:50:30.000Z`
fn iso_date(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_dates_the_s3_way() {
        let date = Utc.with_ymd_and_hms(2009, 10, 12, 17, 50, 0).unwrap();
        assert_eq!(http_date(&date), "Mon, 12 Oct 2009 17:50:00 GMT");
        assert_eq!(iso_date(&date), "2009-10-12T17:50:00.000Z");
    }

    #[test]
    fn validates_bucket_names() {
        let state = EmulatorState::new(crate::EmulatorConfig::ephemeral(), String::new(), std::env::temp_dir());
        assert!(create_bucket(&state, "test-bucket").is_ok());
        assert_eq!(create_bucket(&state, "test-bucket").unwrap_err().status(), StatusCode::CONFLICT);
        for name in ["Test-Bucket", "ab", "-bucket", "bucket_name"] {
            assert_eq!(create_bucket(&state, name).unwrap_err().status(), StatusCode::BAD_REQUEST, "{name}");
        }
    }

    #[test]
    fn etag_is_the_md5_of_the_body() {
        assert_eq!(hex::encode(Md5::digest(b"")), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
