//! Interfaces to Google Cloud Storage.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;

use super::{Client, ClientError};
use crate::common::*;
use crate::credentials::Credentials;
use crate::providers::{ObjectKey, ObjectStorage};
use crate::wait::WaitOptions;

mod buckets;
mod ls;
mod objects;

pub(crate) use buckets::{create_bucket, delete_bucket};
pub(crate) use ls::ls;
pub(crate) use objects::{delete_object, download_object, upload_object};

/// Information about an individual object.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StorageObject {
    /// The bucket of this object.
    pub(crate) bucket: String,
    /// The name of this object. This typically looks like a path without the
    /// leading slash.
    pub(crate) name: String,
}

impl StorageObject {
    /// Convert this to a `gs://` URL.
    pub(crate) fn to_url_string(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.name)
    }
}

/// Retry options for writes that Cloud Storage sometimes rejects with a
/// spurious 403.
fn gcs_write_access_denied_wait_options() -> WaitOptions {
    WaitOptions::default()
        .retry_interval(Duration::from_secs(2))
        .allowed_errors(5)
}

/// Should we retry a write that failed with `err`?
fn should_retry_write(err: &ClientError) -> bool {
    match err {
        ClientError::NotFound { .. } => false,
        ClientError::Other(err) => {
            super::original_gcloud_error(err).map(|e| e.code) == Some(403)
        }
    }
}

/// Google Cloud Storage, accessed using the JSON API.
#[derive(Clone)]
pub struct CloudStorage {
    client: Client,
    /// The project that owns any buckets we create.
    project: String,
}

impl CloudStorage {
    /// Connect to Cloud Storage as `credentials`, creating new buckets in
    /// `project`.
    pub fn new(credentials: &Credentials, project: &str) -> Result<Self> {
        let client = Client::new(credentials)?;
        Ok(CloudStorage {
            client,
            project: project.to_owned(),
        })
    }
}

#[async_trait]
impl ObjectStorage for CloudStorage {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectKey>> {
        let objects = ls(&self.client, bucket, prefix).await?;
        Ok(objects
            .into_iter()
            .map(|obj| ObjectKey::new(obj.name))
            .collect())
    }

    async fn upload_object(&self, bucket: &str, name: &str, data: Bytes) -> Result<()> {
        upload_object(&self.client, bucket, name, data).await?;
        Ok(())
    }

    async fn download_object(&self, bucket: &str, name: &str) -> Result<Bytes> {
        download_object(&self.client, bucket, name).await
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<()> {
        delete_object(&self.client, bucket, name).await
    }

    async fn create_bucket(&self, bucket: &str, location: Option<&str>) -> Result<()> {
        create_bucket(&self.client, &self.project, bucket, location).await
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        delete_bucket(&self.client, bucket).await
    }
}
