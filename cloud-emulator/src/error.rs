use crate::handlers::{full, ResponseBody};
use hyper::{Response, StatusCode};
use serde_json::json;

/// An AWS-shaped error response.
/// S3 answers with an XML document, Lambda with JSON and the `x-amzn-ErrorType` header.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ServiceError {
    #[error("{code}: {message}")]
    S3 {
        status: StatusCode,
        code: &'static str,
        message: String,
    },
    #[error("{error_type}: {message}")]
    Lambda {
        status: StatusCode,
        error_type: &'static str,
        message: String,
    },
    #[error("Failed to read the request body: {0}")]
    Body(#[from] hyper::Error),
}

impl ServiceError {
    pub fn s3(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self::S3 {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn lambda(status: StatusCode, error_type: &'static str, message: impl Into<String>) -> Self {
        Self::Lambda {
            status,
            error_type,
            message: message.into(),
        }
    }

    pub fn no_such_bucket(bucket: &str) -> Self {
        Self::s3(
            StatusCode::NOT_FOUND,
            "NoSuchBucket",
            format!("The specified bucket does not exist: {bucket}"),
        )
    }

    pub fn function_not_found(arn: &str) -> Self {
        Self::lambda(
            StatusCode::NOT_FOUND,
            "ResourceNotFoundException",
            format!("Function not found: {arn}"),
        )
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::lambda(StatusCode::BAD_REQUEST, "InvalidParameterValueException", message)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::S3 { status, .. } | Self::Lambda { status, .. } => *status,
            Self::Body(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn into_response(self) -> Response<ResponseBody> {
        let status = self.status();
        let builder = Response::builder().status(status);

        let response = match self {
            Self::S3 { code, message, .. } => builder.header("content-type", "application/xml").body(full(format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><Error><Code>{code}</Code><Message>{}</Message><RequestId>{}</RequestId></Error>"#,
                xml_escape(&message),
                uuid::Uuid::new_v4()
            ))),
            Self::Lambda {
                error_type, message, ..
            } => builder
                .header("content-type", "application/json")
                .header("x-amzn-ErrorType", error_type)
                .body(full(json!({ "Type": "User", "message": message }).to_string())),
            Self::Body(e) => builder.body(full(e.to_string())),
        };

        response.expect("Failed to create an error response")
    }
}

pub(crate) fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
