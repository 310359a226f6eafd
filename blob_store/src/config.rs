//! Sink configuration.
//!
//! Values from the config file take precedence. Credentials that are left
//! empty are looked up in the environment when a sink is created, so a
//! missing credential fails the session that needed it rather than the
//! whole process.

use std::env;

use serde::{Deserialize, Serialize};

use crate::{SinkError, SinkResult};

pub const AWS_BUCKET: &str = "AWS_BUCKET";
pub const AWS_REGION: &str = "AWS_REGION";
pub const AWS_ACCESS_KEY: &str = "AWS_ACCESS_KEY";
pub const AWS_ACCESS_SECRET: &str = "AWS_ACCESS_SECRET";
pub const AWS_ENDPOINT_URL: &str = "AWS_ENDPOINT_URL";
pub const AZURE_STORAGE_ACCOUNT: &str = "AZURE_STORAGE_ACCOUNT";
pub const AZURE_STORAGE_ACCESS_KEY: &str = "AZURE_STORAGE_ACCESS_KEY";

/// Smallest part S3 accepts for every part but the last one.
pub const S3_MIN_PART_SIZE: usize = 5 * 1024 * 1024;
pub const DEFAULT_PART_SIZE: usize = S3_MIN_PART_SIZE;
pub const DEFAULT_CONCURRENCY: usize = 4;

const DEFAULT_KEY_PREFIX: &str = "chat";

/// Environment lookup used to fill in missing credentials.
pub type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    S3,
    Azure,
    Local,
}

impl Backend {
    pub fn min_part_size(&self) -> usize {
        match self {
            Backend::S3 => S3_MIN_PART_SIZE,
            Backend::Azure | Backend::Local => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
    /// Number of parts uploaded in parallel per session.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub local: LocalConfig,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            part_size_bytes: default_part_size(),
            concurrency: default_concurrency(),
            s3: S3Config::default(),
            azure: AzureConfig::default(),
            local: LocalConfig::default(),
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> SinkResult<()> {
        let min = self.backend.min_part_size();
        if self.part_size_bytes < min {
            return Err(SinkError::InvalidConfig(format!(
                "part_size_bytes must be at least {} for the {:?} backend, got {}",
                min, self.backend, self.part_size_bytes
            )));
        }
        if self.concurrency == 0 {
            return Err(SinkError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_backend() -> Backend {
    Backend::Local
}

fn default_part_size() -> usize {
    DEFAULT_PART_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Custom endpoint, e.g. MinIO or localstack.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub prefix: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            endpoint: None,
            prefix: default_key_prefix(),
        }
    }
}

/// S3 settings with every required value present.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedS3 {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
    pub prefix: String,
}

impl S3Config {
    pub(crate) fn resolve(&self, env: &EnvLookup) -> SinkResult<ResolvedS3> {
        let mut missing = Vec::new();
        let bucket = setting(&self.bucket, AWS_BUCKET, env, &mut missing);
        let region = setting(&self.region, AWS_REGION, env, &mut missing);
        let access_key_id = setting(&self.access_key_id, AWS_ACCESS_KEY, env, &mut missing);
        let secret_access_key =
            setting(&self.secret_access_key, AWS_ACCESS_SECRET, env, &mut missing);
        let endpoint = self
            .endpoint
            .clone()
            .or_else(|| env(AWS_ENDPOINT_URL))
            .filter(|v| !v.is_empty());

        match (bucket, region, access_key_id, secret_access_key) {
            (Some(bucket), Some(region), Some(access_key_id), Some(secret_access_key)) => {
                Ok(ResolvedS3 {
                    bucket,
                    region,
                    access_key_id,
                    secret_access_key,
                    endpoint,
                    prefix: self.prefix.clone(),
                })
            }
            _ => Err(missing_settings("s3", &missing)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureConfig {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedAzure {
    pub account: String,
    pub access_key: String,
}

impl AzureConfig {
    pub(crate) fn resolve(&self, env: &EnvLookup) -> SinkResult<ResolvedAzure> {
        let mut missing = Vec::new();
        let account = setting(&self.account, AZURE_STORAGE_ACCOUNT, env, &mut missing);
        let access_key = setting(&self.access_key, AZURE_STORAGE_ACCESS_KEY, env, &mut missing);
        match (account, access_key) {
            (Some(account), Some(access_key)) => Ok(ResolvedAzure {
                account,
                access_key,
            }),
            _ => Err(missing_settings("azure", &missing)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_root")]
    pub root: String,
    #[serde(default = "default_key_prefix")]
    pub prefix: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root: default_local_root(),
            prefix: default_key_prefix(),
        }
    }
}

/// Default root directory of the local backend.
pub fn default_local_root() -> String {
    env::current_dir()
        .unwrap_or_else(|_| std::path::PathBuf::from("."))
        .join("content_relay_storage/blobs")
        .to_str()
        .unwrap_or("./content_relay_storage/blobs")
        .to_string()
}

fn setting(
    configured: &Option<String>,
    var: &'static str,
    env: &EnvLookup,
    missing: &mut Vec<&'static str>,
) -> Option<String> {
    let value = configured
        .clone()
        .or_else(|| env(var))
        .filter(|v| !v.is_empty());
    if value.is_none() {
        missing.push(var);
    }
    value
}

fn missing_settings(backend: &str, missing: &[&str]) -> SinkError {
    SinkError::Configuration(format!(
        "cannot create {} sink, set the following in the config file or environment: {}",
        backend,
        missing.join(", ")
    ))
}
