//! Creating and deleting buckets.

use serde::{Deserialize, Serialize};

use super::{
    super::{percent_encode, Client, Idempotency, NoQuery},
    gcs_write_access_denied_wait_options, should_retry_write,
};
use crate::common::*;
use crate::wait::{wait, WaitStatus};

#[derive(Debug, Serialize)]
struct CreateBucketQuery<'a> {
    project: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateBucketBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

/// The parts of a bucket resource we care about.
#[derive(Debug, Deserialize)]
struct Bucket {
    name: String,
    location: Option<String>,
}

/// Create a bucket owned by `project`.
///
/// If `location` is `None`, Cloud Storage picks its default (the `US`
/// multi-region).
#[instrument(level = "trace", skip(client))]
pub(crate) async fn create_bucket(
    client: &Client,
    project: &str,
    bucket: &str,
    location: Option<&str>,
) -> Result<()> {
    debug!("creating bucket gs://{}/", bucket);
    let body = CreateBucketBody {
        name: bucket,
        location,
    };
    // A retried create would fail with 409 Conflict, so don't.
    let created = client
        .post::<Bucket, _, _, _>(
            "https://storage.googleapis.com/storage/v1/b",
            Idempotency::UnsafeToRetry,
            CreateBucketQuery { project },
            body,
        )
        .await
        .with_context(|| format!("could not create bucket {}", bucket))?;
    info!(
        "created bucket {} in {}",
        created.name,
        created.location.as_deref().unwrap_or("default location"),
    );
    Ok(())
}

/// Delete an empty bucket.
#[instrument(level = "trace", skip(client))]
pub(crate) async fn delete_bucket(client: &Client, bucket: &str) -> Result<()> {
    debug!("deleting bucket gs://{}/", bucket);
    let url = format!(
        "https://storage.googleapis.com/storage/v1/b/{}",
        percent_encode(bucket),
    );
    let opt = gcs_write_access_denied_wait_options();
    wait(&opt, || async {
        match client.delete(&url, NoQuery).await {
            Ok(()) => WaitStatus::Finished(()),
            Err(err) if should_retry_write(&err) => WaitStatus::FailedTemporarily(err),
            Err(err) => WaitStatus::FailedPermanently(err),
        }
    })
    .await
    .with_context(|| format!("could not delete bucket {}", bucket))?;
    Ok(())
}

#[test]
fn create_bucket_body_omits_missing_location() {
    let body = CreateBucketBody {
        name: "b",
        location: None,
    };
    assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"name":"b"}"#);
    let body = CreateBucketBody {
        name: "b",
        location: Some("EU"),
    };
    assert_eq!(
        serde_json::to_string(&body).unwrap(),
        r#"{"name":"b","location":"EU"}"#,
    );
}
