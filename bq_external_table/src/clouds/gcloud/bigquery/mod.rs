//! Interfaces to BigQuery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{error, fmt};

use super::Client;
use crate::common::*;
use crate::credentials::Credentials;
use crate::loader::LoadSpecification;
use crate::providers::{LoadJobHandle, Warehouse};
use crate::table_name::{DatasetName, TableName};

mod datasets;
pub(crate) mod jobs;
mod load;
mod tables;

pub(crate) use datasets::*;
pub(crate) use load::*;
pub(crate) use tables::*;

/// A BigQuery error.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BigQueryError {
    /// The reason for this error.
    reason: String,

    /// If present, where this error occurred.
    location: Option<String>,

    /// Internal Google information about this error.
    debug_info: Option<String>,

    /// A human-readable description of this error.
    message: String,
}

impl fmt::Display for BigQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl error::Error for BigQueryError {}

/// BigQuery, accessed using the v2 REST API.
#[derive(Clone)]
pub struct BigQuery {
    client: Client,
}

impl BigQuery {
    /// Connect to BigQuery as `credentials`.
    pub fn new(credentials: &Credentials) -> Result<Self> {
        let client = Client::new(credentials)?;
        Ok(BigQuery { client })
    }
}

/// Rebuild the BigQuery job reference behind a provider-neutral handle.
fn job_reference(handle: &LoadJobHandle) -> jobs::JobReference {
    jobs::JobReference {
        project_id: handle.project.clone(),
        job_id: handle.job_id.clone(),
        location: handle.location.clone(),
    }
}

#[async_trait]
impl Warehouse for BigQuery {
    async fn create_dataset(&self, dataset: &DatasetName, location: &str) -> Result<()> {
        create_dataset(&self.client, dataset, location).await
    }

    async fn delete_dataset(
        &self,
        dataset: &DatasetName,
        delete_contents: bool,
    ) -> Result<()> {
        delete_dataset(&self.client, dataset, delete_contents, true).await
    }

    async fn submit_load_job(
        &self,
        source_uri: &str,
        dest_table: &TableName,
        spec: &LoadSpecification,
    ) -> Result<LoadJobHandle> {
        let reference = start_load(&self.client, source_uri, dest_table, spec).await?;
        Ok(LoadJobHandle {
            job_id: reference.job_id,
            location: reference.location,
            project: reference.project_id,
        })
    }

    async fn await_load_job(&self, handle: &LoadJobHandle) -> Result<u64> {
        finish_load(&self.client, &job_reference(handle)).await
    }

    async fn cancel_load_job(&self, handle: &LoadJobHandle) -> Result<()> {
        cancel_load(&self.client, &job_reference(handle)).await
    }

    async fn table_row_count(&self, table: &TableName) -> Result<u64> {
        table_row_count(&self.client, table).await
    }
}

#[test]
fn bigquery_errors_display_reason_and_location() {
    let err = serde_json::from_str::<BigQueryError>(
        r#"{"reason": "invalid", "location": "gs://b/a.csv", "message": "Bad row"}"#,
    )
    .unwrap();
    assert_eq!(err.to_string(), "invalid at gs://b/a.csv: Bad row");
}
