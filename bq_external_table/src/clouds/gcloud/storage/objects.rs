//! Uploading, downloading and deleting single objects.

use bytes::Bytes;
use serde::Serialize;

use super::{
    super::{percent_encode, Alt, Client, NoQuery},
    gcs_write_access_denied_wait_options, should_retry_write, StorageObject,
};
use crate::common::*;
use crate::wait::{wait, WaitStatus};

/// Query parameters for a simple media upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadQuery<'a> {
    upload_type: &'static str,
    name: &'a str,
}

/// Query parameters for downloading an object's contents.
#[derive(Debug, Serialize)]
struct DownloadQuery {
    alt: Alt,
}

fn object_url(bucket: &str, name: &str) -> String {
    format!(
        "https://storage.googleapis.com/storage/v1/b/{}/o/{}",
        percent_encode(bucket),
        percent_encode(name),
    )
}

/// Upload `data` to `gs://{bucket}/{name}`, replacing any existing object.
#[instrument(level = "trace", skip(client, data), fields(len = data.len()))]
pub(crate) async fn upload_object(
    client: &Client,
    bucket: &str,
    name: &str,
    data: Bytes,
) -> Result<StorageObject> {
    debug!("uploading {} bytes to gs://{}/{}", data.len(), bucket, name);
    let url = format!(
        "https://storage.googleapis.com/upload/storage/v1/b/{}/o",
        percent_encode(bucket),
    );
    let query = UploadQuery {
        upload_type: "media",
        name,
    };
    let object = client
        .post_bytes::<StorageObject, _, _>(&url, query, data)
        .await
        .with_context(|| format!("could not upload gs://{}/{}", bucket, name))?;
    Ok(object)
}

/// Download the contents of `gs://{bucket}/{name}` into memory.
#[instrument(level = "trace", skip(client))]
pub(crate) async fn download_object(
    client: &Client,
    bucket: &str,
    name: &str,
) -> Result<Bytes> {
    debug!("downloading gs://{}/{}", bucket, name);
    let url = object_url(bucket, name);
    let query = DownloadQuery { alt: Alt::Media };
    let response = client
        .get_response(&url, query)
        .await
        .with_context(|| format!("could not download gs://{}/{}", bucket, name))?;
    let data = response
        .bytes()
        .await
        .with_context(|| format!("error reading gs://{}/{}", bucket, name))?;
    Ok(data)
}

/// Delete `gs://{bucket}/{name}`.
#[instrument(level = "trace", skip(client))]
pub(crate) async fn delete_object(client: &Client, bucket: &str, name: &str) -> Result<()> {
    debug!("deleting gs://{}/{}", bucket, name);
    let url = object_url(bucket, name);
    let opt = gcs_write_access_denied_wait_options();
    wait(&opt, || async {
        match client.delete(&url, NoQuery).await {
            Ok(()) => WaitStatus::Finished(()),
            Err(err) if should_retry_write(&err) => WaitStatus::FailedTemporarily(err),
            Err(err) => WaitStatus::FailedPermanently(err),
        }
    })
    .await
    .with_context(|| format!("could not delete gs://{}/{}", bucket, name))?;
    Ok(())
}

#[test]
fn object_urls_escape_names() {
    assert_eq!(
        object_url("my-bucket", "dir/a.csv"),
        "https://storage.googleapis.com/storage/v1/b/my%2Dbucket/o/dir%2Fa%2Ecsv",
    );
}

#[test]
fn upload_query_is_media_upload() {
    let query = UploadQuery {
        upload_type: "media",
        name: "dir/a.csv",
    };
    assert_eq!(
        serde_urlencoded::to_string(&query).unwrap(),
        "uploadType=media&name=dir%2Fa.csv",
    );
}
