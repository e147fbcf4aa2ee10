use aws_config::BehaviorVersion;
use aws_sdk_lambda::config::Credentials;
use aws_sdk_s3::config::{RequestChecksumCalculation, ResponseChecksumValidation};
use aws_types::region::Region;
use aws_types::SdkConfig;
use std::env::var;
use tracing::info;

/// LocalStack default credentials. Any non-empty value is accepted by the emulators.
const DEFAULT_ACCESS_KEY: &str = "test";
const DEFAULT_REGION: &str = "us-east-1";
/// Neither LocalStack nor the in-process emulator check the role, but Lambda requires one.
pub const DEFAULT_EXECUTION_ROLE: &str = "arn:aws:iam::000000000000:role/lambda-role";

/// Where and how the harness talks to the cloud services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployerConfig {
    /// E.g. http://localhost:4566. No endpoint override is applied if this property is None.
    pub endpoint_url: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// ARN of the role passed to CreateFunction
    pub execution_role: String,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: DEFAULT_REGION.to_owned(),
            access_key_id: DEFAULT_ACCESS_KEY.to_owned(),
            secret_access_key: DEFAULT_ACCESS_KEY.to_owned(),
            execution_role: DEFAULT_EXECUTION_ROLE.to_owned(),
        }
    }
}

impl DeployerConfig {
    /// Creates a new Config instance from environment variables and defaults.
    /// LOCALSTACK_ENDPOINT has a higher priority than AWS_ENDPOINT_URL.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let endpoint_url = var("LOCALSTACK_ENDPOINT")
            .or_else(|_| var("AWS_ENDPOINT_URL"))
            .ok()
            .filter(|v| !v.trim().is_empty());

        Self {
            endpoint_url,
            region: var("AWS_REGION").unwrap_or(defaults.region),
            access_key_id: var("AWS_ACCESS_KEY_ID").unwrap_or(defaults.access_key_id),
            secret_access_key: var("AWS_SECRET_ACCESS_KEY").unwrap_or(defaults.secret_access_key),
            execution_role: var("LAMBDA_EXECUTION_ROLE").unwrap_or(defaults.execution_role),
        }
    }

    /// Default credentials and region pointed at the given endpoint, e.g. an emulator started by a test.
    pub fn for_endpoint(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: Some(endpoint_url.into()),
            ..Self::default()
        }
    }

    /// Builds the shared SDK config with static credentials and the endpoint override.
    pub async fn sdk_config(&self) -> SdkConfig {
        let credentials = Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            None,
            None,
            "lambda-deployer",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(credentials);

        if let Some(endpoint_url) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        loader.load().await
    }
}

/// Client handles acquired at test setup. Dropping them releases the connections.
#[derive(Debug, Clone)]
pub struct AwsClients {
    pub s3: aws_sdk_s3::Client,
    pub lambda: aws_sdk_lambda::Client,
    pub config: DeployerConfig,
}

impl AwsClients {
    pub async fn new(config: DeployerConfig) -> Self {
        let sdk_config = config.sdk_config().await;

        // emulators serve buckets from the path, not from a subdomain
        // and checksums are only sent where the API requires them to keep the bodies plain
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();

        info!(
            "AWS clients for {} in {}",
            config.endpoint_url.as_deref().unwrap_or("default AWS endpoints"),
            config.region
        );

        Self {
            s3: aws_sdk_s3::Client::from_conf(s3_config),
            lambda: aws_sdk_lambda::Client::new(&sdk_config),
            config,
        }
    }
}
