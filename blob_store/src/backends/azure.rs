//! Azure Blob Storage backend.
//!
//! Data goes through `object_store`'s Azure client. Containers are named
//! after the calendar day, so the sink creates its container with the Azure
//! SDK before streaming; an existing container is fine.

use std::sync::Arc;

use async_trait::async_trait;
use azure_core::error::ErrorKind;
use azure_storage::StorageCredentials;
use azure_storage_blobs::prelude::{ClientBuilder, ContainerClient};
use object_store::{azure::MicrosoftAzureBuilder, ObjectStore};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{config::ResolvedAzure, Preflight, SinkError, SinkResult};

const CONTAINER_ALREADY_EXISTS: &str = "ContainerAlreadyExists";

#[derive(Debug)]
pub enum ContainerCreateError {
    AlreadyExists,
    Other(anyhow::Error),
}

/// Container management needed by the Azure sink.
#[async_trait]
pub trait ContainerApi: Send + Sync {
    fn container_name(&self) -> &str;

    async fn create_container(&self) -> Result<(), ContainerCreateError>;
}

struct SdkContainerApi {
    name: String,
    client: ContainerClient,
}

#[async_trait]
impl ContainerApi for SdkContainerApi {
    fn container_name(&self) -> &str {
        &self.name
    }

    async fn create_container(&self) -> Result<(), ContainerCreateError> {
        let err = match self.client.create().await {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };
        let already_exists = matches!(
            err.kind(),
            ErrorKind::HttpResponse { error_code: Some(code), .. } if code == CONTAINER_ALREADY_EXISTS
        );
        if already_exists {
            Err(ContainerCreateError::AlreadyExists)
        } else {
            Err(ContainerCreateError::Other(anyhow::Error::from(err)))
        }
    }
}

/// Creates the sink's container once, before the first upload.
pub struct AzureContainer {
    api: Arc<dyn ContainerApi>,
    created: OnceCell<()>,
}

impl AzureContainer {
    pub fn new(api: Arc<dyn ContainerApi>) -> Self {
        Self {
            api,
            created: OnceCell::new(),
        }
    }

    async fn ensure(&self) -> SinkResult<()> {
        let name = self.api.container_name();
        match self.api.create_container().await {
            Ok(()) => {
                info!(container = name, "created container");
                Ok(())
            }
            Err(ContainerCreateError::AlreadyExists) => {
                debug!(container = name, "container already exists");
                Ok(())
            }
            Err(ContainerCreateError::Other(err)) => Err(SinkError::Configuration(format!(
                "error when creating container {}: {}",
                name, err
            ))),
        }
    }
}

#[async_trait]
impl Preflight for AzureContainer {
    async fn prepare(&self) -> SinkResult<()> {
        self.created
            .get_or_try_init(|| self.ensure())
            .await
            .map(|_| ())
    }
}

pub(crate) fn build_object_store(
    settings: &ResolvedAzure,
    container: &str,
) -> SinkResult<Arc<dyn ObjectStore>> {
    let store = MicrosoftAzureBuilder::new()
        .with_account(&settings.account)
        .with_access_key(&settings.access_key)
        .with_container_name(container)
        .build()
        .map_err(|e| SinkError::Configuration(format!("invalid azure settings: {}", e)))?;
    Ok(Arc::new(store))
}

pub(crate) fn container(settings: &ResolvedAzure, container: &str) -> AzureContainer {
    let credentials =
        StorageCredentials::access_key(settings.account.clone(), settings.access_key.clone());
    let client = ClientBuilder::new(settings.account.clone(), credentials)
        .container_client(container.to_string());
    AzureContainer::new(Arc::new(SdkContainerApi {
        name: container.to_string(),
        client,
    }))
}

pub(crate) fn base_url(settings: &ResolvedAzure, container: &str) -> String {
    format!(
        "https://{}.blob.core.windows.net/{}",
        settings.account, container
    )
}
