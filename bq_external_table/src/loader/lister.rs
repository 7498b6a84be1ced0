//! Listing the objects that make up a batch.

use crate::common::*;
use crate::errors::LoadError;
use crate::providers::{ObjectKey, ObjectStorage};

/// List every object in `bucket` whose name starts with `prefix`.
///
/// Keys come back in provider order. Any failure, including a missing
/// bucket, is reported as [`LoadError::StorageUnavailable`] without retrying.
#[instrument(level = "debug", skip(storage))]
pub async fn list_object_keys(
    storage: &dyn ObjectStorage,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<ObjectKey>, LoadError> {
    let keys = storage.list_objects(bucket, prefix).await.map_err(|source| {
        LoadError::StorageUnavailable {
            bucket: bucket.to_owned(),
            prefix: prefix.to_owned(),
            source,
        }
    })?;
    debug!("found {} objects in gs://{}/{}", keys.len(), bucket, prefix);
    Ok(keys)
}
