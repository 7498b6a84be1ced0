//! Creating and deleting BigQuery datasets.

use serde::{Deserialize, Serialize};

use super::super::{percent_encode, Client, ClientError, Idempotency, NoQuery};
use crate::common::*;
use crate::table_name::DatasetName;

/// The name of a dataset.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    project_id: String,
    dataset_id: String,
}

/// A dataset resource.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct Dataset {
    dataset_reference: DatasetReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteDatasetQuery {
    delete_contents: bool,
}

/// Create `dataset` in `location`.
#[instrument(level = "trace", skip(client))]
pub(crate) async fn create_dataset(
    client: &Client,
    dataset: &DatasetName,
    location: &str,
) -> Result<()> {
    debug!("creating dataset {} in {}", dataset, location);
    let url = format!(
        "https://bigquery.googleapis.com/bigquery/v2/projects/{}/datasets",
        percent_encode(dataset.project()),
    );
    let body = Dataset {
        dataset_reference: DatasetReference {
            project_id: dataset.project().to_owned(),
            dataset_id: dataset.dataset().to_owned(),
        },
        location: Some(location.to_owned()),
    };
    // Retrying after a lost response would fail with 409, so don't.
    let created = client
        .post::<Dataset, _, _, _>(&url, Idempotency::UnsafeToRetry, NoQuery, body)
        .await
        .with_context(|| format!("could not create dataset {}", dataset))?;
    info!(
        "created dataset {} in {}",
        dataset,
        created.location.as_deref().unwrap_or(location),
    );
    Ok(())
}

/// Delete `dataset`, and with `delete_contents`, every table in it.
#[instrument(level = "trace", skip(client))]
pub(crate) async fn delete_dataset(
    client: &Client,
    dataset: &DatasetName,
    delete_contents: bool,
    not_found_ok: bool,
) -> Result<()> {
    debug!("deleting dataset {}", dataset);
    let url = format!(
        "https://bigquery.googleapis.com/bigquery/v2/projects/{}/datasets/{}",
        percent_encode(dataset.project()),
        percent_encode(dataset.dataset()),
    );
    match client
        .delete(&url, DeleteDatasetQuery { delete_contents })
        .await
    {
        Ok(()) => Ok(()),
        Err(ClientError::NotFound { .. }) if not_found_ok => {
            debug!("dataset {} does not exist", dataset);
            Ok(())
        }
        Err(ClientError::Other(err)) => Err(err),
        Err(err) => Err(err.into()),
    }
}

#[test]
fn dataset_body_includes_location() {
    let body = Dataset {
        dataset_reference: DatasetReference {
            project_id: "p".to_owned(),
            dataset_id: "d".to_owned(),
        },
        location: Some("EU".to_owned()),
    };
    assert_eq!(
        serde_json::to_value(&body).unwrap(),
        serde_json::json!({
            "datasetReference": {"projectId": "p", "datasetId": "d"},
            "location": "EU",
        }),
    );
    assert_eq!(
        serde_urlencoded::to_string(DeleteDatasetQuery {
            delete_contents: true
        })
        .unwrap(),
        "deleteContents=true",
    );
}
