//! Interfaces to the storage and warehouse services we load between.
//!
//! The loader only talks to these traits. The Google Cloud implementations
//! live in [`crate::clouds::gcloud`], and tests use an in-memory fake.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use crate::common::*;
use crate::loader::LoadSpecification;
use crate::table_name::{DatasetName, TableName};

/// The name of one object in a bucket.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Wrap an object name.
    pub fn new<S: Into<String>>(name: S) -> Self {
        ObjectKey(name.into())
    }

    /// The object name, exactly as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything after the final `.`, or the whole name if there is no `.`.
    pub fn extension(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ObjectKey {
    fn from(name: &str) -> Self {
        ObjectKey::new(name)
    }
}

/// A bucket-based object store.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// List the names of all objects in `bucket` starting with `prefix`, in
    /// whatever order the store returns them.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectKey>>;

    /// Upload `data` as `name` in `bucket`, replacing any existing object.
    async fn upload_object(&self, bucket: &str, name: &str, data: Bytes) -> Result<()>;

    /// Download the contents of an object.
    async fn download_object(&self, bucket: &str, name: &str) -> Result<Bytes>;

    /// Delete a single object.
    async fn delete_object(&self, bucket: &str, name: &str) -> Result<()>;

    /// Create a new bucket.
    async fn create_bucket(&self, bucket: &str, location: Option<&str>) -> Result<()>;

    /// Delete a bucket. This fails unless the bucket is empty.
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;
}

/// A running load job, as returned by [`Warehouse::submit_load_job`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadJobHandle {
    /// The provider's ID for this job.
    pub job_id: String,
    /// Where the job runs, if the provider cares.
    pub location: Option<String>,
    /// The project that owns the job.
    pub project: String,
}

/// A data warehouse which can load objects into tables.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create a dataset in `location`.
    async fn create_dataset(&self, dataset: &DatasetName, location: &str) -> Result<()>;

    /// Delete a dataset. If `delete_contents` is false, the dataset must be
    /// empty. Deleting a dataset that doesn't exist succeeds.
    async fn delete_dataset(
        &self,
        dataset: &DatasetName,
        delete_contents: bool,
    ) -> Result<()>;

    /// Start loading `source_uri` into `dest_table` and return without
    /// waiting.
    async fn submit_load_job(
        &self,
        source_uri: &str,
        dest_table: &TableName,
        spec: &LoadSpecification,
    ) -> Result<LoadJobHandle>;

    /// Wait for a load job to finish, returning the number of rows it wrote.
    async fn await_load_job(&self, handle: &LoadJobHandle) -> Result<u64>;

    /// Cancel a load job that we have stopped waiting for. Fails if the job
    /// already wrote its rows.
    async fn cancel_load_job(&self, handle: &LoadJobHandle) -> Result<()>;

    /// The number of rows currently in `table`.
    async fn table_row_count(&self, table: &TableName) -> Result<u64>;
}

#[test]
fn object_key_extensions() {
    assert_eq!(ObjectKey::from("a.csv").extension(), "csv");
    assert_eq!(ObjectKey::from("dir.v2/part.0.avro").extension(), "avro");
    assert_eq!(ObjectKey::from("README").extension(), "README");
    assert_eq!(ObjectKey::from("trailing.").extension(), "");
}
