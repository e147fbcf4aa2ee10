use crate::config::EmulatorConfig;
use crate::error::ServiceError;
use crate::model::FunctionConfiguration;
use crate::runtime::RuntimeInstance;
use chrono::{DateTime, Utc};
use hyper::body::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Everything the emulator knows about.
/// The locks are never held across an await.
pub(crate) struct EmulatorState {
    pub config: EmulatorConfig,
    /// E.g. `http://127.0.0.1:4566`
    pub endpoint_url: String,
    /// Where function code is extracted. Exists for as long as the emulator runs.
    pub work_dir: PathBuf,
    buckets: RwLock<BTreeMap<String, Bucket>>,
    functions: RwLock<HashMap<String, Arc<Function>>>,
}

pub(crate) struct Bucket {
    pub created: DateTime<Utc>,
    pub objects: BTreeMap<String, StoredObject>,
}

#[derive(Clone, Debug)]
pub(crate) struct StoredObject {
    pub body: Bytes,
    /// Hex MD5 of the body, without quotes
    pub etag: String,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
}

pub(crate) struct Function {
    pub configuration: FunctionConfiguration,
    pub code: Bytes,
    /// Where the code came from, e.g. `test-bucket/testing.zip`
    pub code_location: Option<String>,
    /// Started on the first invocation. The mutex serializes invocations of the function.
    pub instance: tokio::sync::Mutex<Option<RuntimeInstance>>,
}

impl EmulatorState {
    pub fn new(config: EmulatorConfig, endpoint_url: String, work_dir: PathBuf) -> Self {
        Self {
            config,
            endpoint_url,
            work_dir,
            buckets: RwLock::new(BTreeMap::new()),
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns false if the bucket already exists.
    pub fn create_bucket(&self, name: &str) -> bool {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        if buckets.contains_key(name) {
            return false;
        }
        buckets.insert(
            name.to_owned(),
            Bucket {
                created: Utc::now(),
                objects: BTreeMap::new(),
            },
        );
        info!("Bucket created: {name}");
        true
    }

    pub fn bucket_exists(&self, name: &str) -> bool {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Only empty buckets can be deleted.
    pub fn delete_bucket(&self, name: &str) -> Result<(), ServiceError> {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        match buckets.get(name) {
            None => return Err(ServiceError::no_such_bucket(name)),
            Some(bucket) if !bucket.objects.is_empty() => {
                return Err(ServiceError::s3(
                    hyper::StatusCode::CONFLICT,
                    "BucketNotEmpty",
                    format!("The bucket you tried to delete is not empty: {name}"),
                ))
            }
            Some(_) => {}
        }
        buckets.remove(name);
        info!("Bucket deleted: {name}");
        Ok(())
    }

    /// Names and creation dates, sorted by name.
    pub fn list_buckets(&self) -> Vec<(String, DateTime<Utc>)> {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, bucket)| (name.clone(), bucket.created))
            .collect()
    }

    /// Replaces any existing object under the same key.
    pub fn put_object(&self, bucket: &str, key: &str, object: StoredObject) -> Result<(), ServiceError> {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let bucket_entry = buckets
            .get_mut(bucket)
            .ok_or_else(|| ServiceError::no_such_bucket(bucket))?;
        info!("Stored {bucket}/{key}, {} bytes, ETag {}", object.body.len(), object.etag);
        bucket_entry.objects.insert(key.to_owned(), object);
        Ok(())
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, ServiceError> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let bucket_entry = buckets.get(bucket).ok_or_else(|| ServiceError::no_such_bucket(bucket))?;
        bucket_entry.objects.get(key).cloned().ok_or_else(|| {
            ServiceError::s3(
                hyper::StatusCode::NOT_FOUND,
                "NoSuchKey",
                format!("The specified key does not exist: {key}"),
            )
        })
    }

    /// Deleting a missing key is not an error, same as in S3.
    pub fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ServiceError> {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let bucket_entry = buckets
            .get_mut(bucket)
            .ok_or_else(|| ServiceError::no_such_bucket(bucket))?;
        bucket_entry.objects.remove(key);
        Ok(())
    }

    /// Keys with the prefix, in key order, with their objects.
    pub fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<(String, StoredObject)>, ServiceError> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let bucket_entry = buckets.get(bucket).ok_or_else(|| ServiceError::no_such_bucket(bucket))?;
        Ok(bucket_entry
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| (key.clone(), object.clone()))
            .collect())
    }

    /// Fails with ResourceConflictException if a function with the same name exists.
    pub fn add_function(&self, function: Function) -> Result<Arc<Function>, ServiceError> {
        let mut functions = self.functions.write().unwrap_or_else(PoisonError::into_inner);
        let name = function.configuration.function_name.clone();
        if functions.contains_key(&name) {
            return Err(ServiceError::lambda(
                hyper::StatusCode::CONFLICT,
                "ResourceConflictException",
                format!("Function already exist: {name}"),
            ));
        }
        let function = Arc::new(function);
        functions.insert(name, function.clone());
        Ok(function)
    }

    /// Accepts a plain name or a function ARN.
    pub fn function(&self, name_or_arn: &str) -> Result<Arc<Function>, ServiceError> {
        let name = function_name(name_or_arn);
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::function_not_found(&self.function_arn(name)))
    }

    /// Sorted by name.
    pub fn list_functions(&self) -> Vec<FunctionConfiguration> {
        let mut functions = self
            .functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|f| f.configuration.clone())
            .collect::<Vec<_>>();
        functions.sort_by(|a, b| a.function_name.cmp(&b.function_name));
        functions
    }

    /// The running instance, if any, is stopped when the last reference to the function is dropped.
    pub fn remove_function(&self, name_or_arn: &str) -> Result<Arc<Function>, ServiceError> {
        let name = function_name(name_or_arn);
        let removed = self
            .functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        removed.ok_or_else(|| ServiceError::function_not_found(&self.function_arn(name)))
    }

    /// Returns the number of removed functions.
    pub fn remove_all_functions(&self) -> usize {
        let removed = std::mem::take(&mut *self.functions.write().unwrap_or_else(PoisonError::into_inner));
        removed.len()
    }

    pub fn function_arn(&self, function_name: &str) -> String {
        format!(
            "arn:aws:lambda:{}:000000000000:function:{function_name}",
            self.config.region
        )
    }
}

/// `arn:aws:lambda:us-east-1:000000000000:function:my-fn` → `my-fn`.
/// A qualifier after the name, e.g. `:$LATEST`, is dropped.
fn function_name(name_or_arn: &str) -> &str {
    match name_or_arn.split_once(":function:") {
        Some((_, name)) => name.split(':').next().unwrap_or(name),
        None => name_or_arn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> EmulatorState {
        EmulatorState::new(
            EmulatorConfig::ephemeral(),
            "http://127.0.0.1:4566".to_owned(),
            std::env::temp_dir(),
        )
    }

    fn object(body: &'static str) -> StoredObject {
        StoredObject {
            body: Bytes::from_static(body.as_bytes()),
            etag: "etag".to_owned(),
            content_type: "text/plain".to_owned(),
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn extracts_names_from_arns() {
        assert_eq!(function_name("my-fn"), "my-fn");
        assert_eq!(function_name("arn:aws:lambda:us-east-1:000000000000:function:my-fn"), "my-fn");
        assert_eq!(
            function_name("arn:aws:lambda:us-east-1:000000000000:function:my-fn:$LATEST"),
            "my-fn"
        );
    }

    #[test]
    fn bucket_lifecycle() {
        let state = state();
        assert!(state.create_bucket("test-bucket"));
        assert!(!state.create_bucket("test-bucket"));

        state.put_object("test-bucket", "testing.zip", object("zip")).unwrap();
        assert_eq!(state.get_object("test-bucket", "testing.zip").unwrap().body, "zip");

        let err = state.delete_bucket("test-bucket").unwrap_err();
        assert_eq!(err.status(), hyper::StatusCode::CONFLICT);

        state.delete_object("test-bucket", "testing.zip").unwrap();
        state.delete_object("test-bucket", "testing.zip").unwrap();
        state.delete_bucket("test-bucket").unwrap();
        assert!(!state.bucket_exists("test-bucket"));
    }

    #[test]
    fn missing_buckets_and_keys() {
        let state = state();
        let err = state.put_object("nope", "k", object("x")).unwrap_err();
        assert_eq!(err.status(), hyper::StatusCode::NOT_FOUND);

        state.create_bucket("b");
        let err = state.get_object("b", "k").unwrap_err();
        assert!(err.to_string().starts_with("NoSuchKey"));
    }

    #[test]
    fn lists_objects_by_prefix() {
        let state = state();
        state.create_bucket("b");
        for key in ["lib/a.so", "lib/b.so", "bootstrap"] {
            state.put_object("b", key, object("x")).unwrap();
        }
        let keys = state
            .list_objects("b", "lib/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["lib/a.so", "lib/b.so"]);
    }
}
