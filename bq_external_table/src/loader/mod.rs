//! Loading every object under a bucket prefix into one table.
//!
//! A batch is all the objects whose names start with a prefix. We list them
//! fresh on each call, pick one file format for the whole batch, build a
//! single [`LoadSpecification`], and then run one load job per object. A
//! failed job is recorded in its [`LoadResult`] and does not stop the rest of
//! the batch.

use futures::stream;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use crate::common::*;
use crate::errors::LoadError;
use crate::providers::{LoadJobHandle, ObjectKey, ObjectStorage, Warehouse};
use crate::table_name::{DatasetName, TableName};

#[cfg(test)]
pub(crate) mod fake_cloud;
mod format;
mod lister;
mod spec;

pub use format::{infer_format, FileFormat, InferOptions, RepresentativePolicy};
pub use lister::list_object_keys;
pub use spec::{LoadSpecification, WriteDisposition};

/// What to load, and where to put it.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    /// The dataset containing the destination table.
    pub dataset: DatasetName,
    /// The bucket to read from.
    pub bucket: String,
    /// The destination table, inside `dataset`.
    pub table_id: String,
    /// Only objects whose names start with this are loaded. May be empty.
    pub prefix: String,
}

/// Knobs for a load batch.
#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// How to decide the batch's file format.
    pub infer: InferOptions,

    /// After the first failed load, skip every object not yet started.
    pub stop_on_first_failure: bool,

    /// How many load jobs may run at once. `1` loads strictly in order.
    pub parallelism: usize,

    /// Give up waiting on any single load job after this long.
    pub job_timeout: Option<Duration>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            infer: InferOptions::default(),
            stop_on_first_failure: false,
            parallelism: 1,
            job_timeout: None,
        }
    }
}

/// The outcome of loading one object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadResult {
    /// The object we tried to load.
    pub object_key: ObjectKey,
    /// The load job, if we got as far as submitting one.
    pub job_id: Option<String>,
    /// Rows written by this job.
    pub rows_loaded: u64,
    /// Rows in the destination table once the job finished, if we could
    /// read it back.
    pub table_rows: Option<u64>,
    /// Why the load failed, if it did.
    pub error: Option<String>,
}

impl LoadResult {
    fn new(object_key: ObjectKey) -> Self {
        Self {
            object_key,
            job_id: None,
            rows_loaded: 0,
            table_rows: None,
            error: None,
        }
    }

    /// Did this object load successfully?
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Load every object in `request.bucket` matching `request.prefix` into
/// `request.table_id`.
///
/// Returns one [`LoadResult`] per matching object, in listing order. Errors
/// are only returned for problems that affect the whole batch: listing
/// failures and empty (or, in strict mode, inconsistent) batches. These are
/// raised before any load job is submitted.
///
/// Loads always append, so running this twice duplicates rows.
#[instrument(
    level = "info",
    skip_all,
    fields(bucket = %request.bucket, prefix = %request.prefix, table = %request.table_id)
)]
pub async fn load_bucket_into_table(
    storage: &dyn ObjectStorage,
    warehouse: &dyn Warehouse,
    request: &LoadRequest,
    options: &LoadOptions,
) -> Result<Vec<LoadResult>, LoadError> {
    let keys = list_object_keys(storage, &request.bucket, &request.prefix).await?;
    let format = infer_format(&keys, &options.infer)
        .map_err(|err| err.in_bucket(&request.bucket, &request.prefix))?;
    let spec = LoadSpecification::build(format, &request.bucket);
    let dest_table = request.dataset.table(&request.table_id);
    info!(
        "loading {} {} objects from {} into {}",
        keys.len(),
        format,
        spec.source_uri_prefix,
        dest_table,
    );

    let stopped = AtomicBool::new(false);
    let results = stream::iter(keys)
        .map(|key| load_object(warehouse, &spec, &dest_table, key, options, &stopped))
        .buffered(options.parallelism.max(1))
        .collect::<Vec<_>>()
        .await;
    Ok(results)
}

/// Load a single object and record what happened.
async fn load_object(
    warehouse: &dyn Warehouse,
    spec: &LoadSpecification,
    dest_table: &TableName,
    key: ObjectKey,
    options: &LoadOptions,
    stopped: &AtomicBool,
) -> LoadResult {
    let mut result = LoadResult::new(key);
    if stopped.load(Ordering::SeqCst) {
        result.error = Some("skipped because an earlier load failed".to_owned());
        return result;
    }

    let source_uri = spec.source_uri(&result.object_key);
    let mut handle = None;
    let step = load_and_wait(warehouse, &source_uri, dest_table, spec, &mut handle);
    let outcome = match options.job_timeout {
        Some(limit) => {
            let finished = tokio::time::timeout(limit, step).await;
            match finished {
                Ok(outcome) => outcome,
                Err(_) => Err(abandon_job(warehouse, handle.as_ref(), limit).await),
            }
        }
        None => step.await,
    };
    result.job_id = handle.map(|handle| handle.job_id);

    match outcome {
        Ok(rows) => {
            info!("loaded {} rows", rows);
            result.rows_loaded = rows;
            match warehouse.table_row_count(dest_table).await {
                Ok(table_rows) => {
                    info!("{} now has {} rows", dest_table, table_rows);
                    result.table_rows = Some(table_rows);
                }
                Err(err) => {
                    warn!("could not read row count of {}: {:#}", dest_table, err)
                }
            }
        }
        Err(err) => {
            error!("failed to load {}: {:#}", source_uri, err);
            result.error = Some(format!("{:#}", err));
            if options.stop_on_first_failure {
                stopped.store(true, Ordering::SeqCst);
            }
        }
    }
    result
}

/// Stop waiting for a job that ran past its deadline.
///
/// The job is still running on the provider, and would append its rows
/// after we report it as failed, so we cancel it.
async fn abandon_job(
    warehouse: &dyn Warehouse,
    handle: Option<&LoadJobHandle>,
    limit: Duration,
) -> Error {
    let handle = match handle {
        Some(handle) => handle,
        None => return format_err!("load job was not started within {:?}", limit),
    };
    match warehouse.cancel_load_job(handle).await {
        Ok(()) => {
            warn!("cancelled job {} after {:?}", handle.job_id, limit);
            format_err!(
                "load job did not finish within {:?}; cancelled job {}",
                limit,
                handle.job_id,
            )
        }
        Err(err) => format_err!(
            "load job did not finish within {:?}; could not cancel job {}: {:#}",
            limit,
            handle.job_id,
            err,
        ),
    }
}

/// Submit a load job and wait for it, saving the handle as soon as we have it.
async fn load_and_wait(
    warehouse: &dyn Warehouse,
    source_uri: &str,
    dest_table: &TableName,
    spec: &LoadSpecification,
    started: &mut Option<LoadJobHandle>,
) -> Result<u64> {
    let handle = warehouse
        .submit_load_job(source_uri, dest_table, spec)
        .await
        .with_context(|| format!("could not start loading {}", source_uri))?;
    info!("starting job {}", handle.job_id);
    *started = Some(handle.clone());
    let rows = warehouse
        .await_load_job(&handle)
        .await
        .with_context(|| format!("job {} failed", handle.job_id))?;
    info!("job finished");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::fake_cloud::FakeCloud;
    use super::*;

    fn dataset() -> DatasetName {
        DatasetName::new("project", "dataset")
    }

    fn request(bucket: &str, prefix: &str) -> LoadRequest {
        LoadRequest {
            dataset: dataset(),
            bucket: bucket.to_owned(),
            table_id: "table".to_owned(),
            prefix: prefix.to_owned(),
        }
    }

    fn cloud_with(objects: &[(&str, usize)]) -> FakeCloud {
        let cloud = FakeCloud::new();
        cloud.add_bucket("bucket");
        cloud.add_dataset(&dataset());
        for &(name, rows) in objects {
            cloud.put("bucket", name, rows);
        }
        cloud
    }

    fn keys_of(results: &[LoadResult]) -> Vec<&str> {
        results.iter().map(|r| r.object_key.as_str()).collect()
    }

    #[tokio::test]
    async fn single_csv_file() {
        let cloud = cloud_with(&[("a.csv", 3)]);
        let results = load_bucket_into_table(
            &cloud,
            &cloud,
            &request("bucket", ""),
            &LoadOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].succeeded());
        assert_eq!(results[0].rows_loaded, 3);
        assert_eq!(results[0].table_rows, Some(3));
        assert!(results[0].job_id.is_some());
        assert_eq!(cloud.submitted(), vec!["gs://bucket/a.csv"]);
    }

    #[tokio::test]
    async fn two_avro_files() {
        let cloud = cloud_with(&[("a.avro", 2), ("b.avro", 5)]);
        let results = load_bucket_into_table(
            &cloud,
            &cloud,
            &request("bucket", ""),
            &LoadOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(keys_of(&results), vec!["a.avro", "b.avro"]);
        assert!(results.iter().all(LoadResult::succeeded));
        assert_eq!(results[1].rows_loaded, 5);
        assert_eq!(results[1].table_rows, Some(7));
    }

    #[tokio::test]
    async fn no_matching_objects_fails_before_loading() {
        let cloud = cloud_with(&[("a.csv", 3)]);
        let err = load_bucket_into_table(
            &cloud,
            &cloud,
            &request("bucket", "x-"),
            &LoadOptions::default(),
        )
        .await
        .unwrap_err();
        match err {
            LoadError::EmptyBatch { bucket, prefix } => {
                assert_eq!(bucket, "bucket");
                assert_eq!(prefix, "x-");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(cloud.submitted().is_empty());
    }

    #[tokio::test]
    async fn missing_bucket_is_storage_unavailable() {
        let cloud = cloud_with(&[]);
        let err = load_bucket_into_table(
            &cloud,
            &cloud,
            &request("no-such-bucket", ""),
            &LoadOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LoadError::StorageUnavailable { .. }));
        assert!(cloud.submitted().is_empty());
    }

    #[tokio::test]
    async fn only_prefixed_objects_are_loaded() {
        let cloud = cloud_with(&[("users/a.csv", 1), ("orders/b.avro", 1)]);
        let results = load_bucket_into_table(
            &cloud,
            &cloud,
            &request("bucket", "users/"),
            &LoadOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(keys_of(&results), vec!["users/a.csv"]);
        assert_eq!(cloud.submitted(), vec!["gs://bucket/users/a.csv"]);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let cloud = cloud_with(&[("a.avro", 1), ("b.avro", 1), ("c.avro", 1)]);
        cloud.fail_load_of("gs://bucket/b.avro");
        let results = load_bucket_into_table(
            &cloud,
            &cloud,
            &request("bucket", ""),
            &LoadOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(keys_of(&results), vec!["a.avro", "b.avro", "c.avro"]);
        let succeeded = results.iter().map(LoadResult::succeeded).collect::<Vec<_>>();
        assert_eq!(succeeded, vec![true, false, true]);
        assert!(results[1].job_id.is_some());
        assert!(results[1].error.as_ref().unwrap().contains("internalError"));
        assert_eq!(cloud.submitted().len(), 3);
    }

    #[tokio::test]
    async fn loading_twice_duplicates_rows() {
        let cloud = cloud_with(&[("a.csv", 4)]);
        let req = request("bucket", "");
        let opt = LoadOptions::default();
        load_bucket_into_table(&cloud, &cloud, &req, &opt).await.unwrap();
        let table = dataset().table("table");
        assert_eq!(cloud.rows_in(&table), 4);
        let results = load_bucket_into_table(&cloud, &cloud, &req, &opt)
            .await
            .unwrap();
        assert_eq!(cloud.rows_in(&table), 8);
        assert_eq!(results[0].table_rows, Some(8));
    }

    #[tokio::test]
    async fn mixed_batch_uses_first_format_and_fails_the_rest() {
        let cloud = cloud_with(&[("a.csv", 2), ("b.avro", 2)]);
        let results = load_bucket_into_table(
            &cloud,
            &cloud,
            &request("bucket", ""),
            &LoadOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].succeeded());
        assert!(!results[1].succeeded());
        assert!(results[1].error.as_ref().unwrap().contains("as CSV"));
    }

    #[tokio::test]
    async fn strict_mode_rejects_mixed_batch_up_front() {
        let cloud = cloud_with(&[("a.csv", 2), ("b.avro", 2)]);
        let opt = LoadOptions {
            infer: InferOptions {
                strict: true,
                ..InferOptions::default()
            },
            ..LoadOptions::default()
        };
        let err = load_bucket_into_table(&cloud, &cloud, &request("bucket", ""), &opt)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::MixedFormats { .. }));
        assert!(cloud.submitted().is_empty());
    }

    #[tokio::test]
    async fn stop_on_first_failure_skips_the_rest() {
        let cloud = cloud_with(&[("a.avro", 1), ("b.avro", 1), ("c.avro", 1)]);
        cloud.fail_load_of("gs://bucket/a.avro");
        let opt = LoadOptions {
            stop_on_first_failure: true,
            ..LoadOptions::default()
        };
        let results = load_bucket_into_table(&cloud, &cloud, &request("bucket", ""), &opt)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| !r.succeeded()));
        assert!(results[1].job_id.is_none());
        assert!(results[2].error.as_ref().unwrap().contains("skipped"));
        assert_eq!(cloud.submitted(), vec!["gs://bucket/a.avro"]);
    }

    #[tokio::test]
    async fn parallel_loads_keep_order_and_bound() {
        let names = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|n| format!("{}.avro", n))
            .collect::<Vec<_>>();
        let objects = names.iter().map(|n| (n.as_str(), 1)).collect::<Vec<_>>();
        let cloud = cloud_with(&objects);
        cloud.set_job_delay(Duration::from_millis(20));
        cloud.fail_load_of("gs://bucket/c.avro");
        let opt = LoadOptions {
            parallelism: 3,
            ..LoadOptions::default()
        };
        let results = load_bucket_into_table(&cloud, &cloud, &request("bucket", ""), &opt)
            .await
            .unwrap();
        assert_eq!(
            keys_of(&results),
            names.iter().map(String::as_str).collect::<Vec<_>>(),
        );
        assert_eq!(results.iter().filter(|r| r.succeeded()).count(), 5);
        assert!(cloud.max_in_flight() > 1);
        assert!(cloud.max_in_flight() <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_jobs_time_out() {
        let cloud = cloud_with(&[("a.avro", 1)]);
        cloud.set_job_delay(Duration::from_secs(3600));
        let opt = LoadOptions {
            job_timeout: Some(Duration::from_secs(60)),
            ..LoadOptions::default()
        };
        let results = load_bucket_into_table(&cloud, &cloud, &request("bucket", ""), &opt)
            .await
            .unwrap();
        assert!(!results[0].succeeded());
        let job_id = results[0].job_id.clone().unwrap();
        let error = results[0].error.as_ref().unwrap();
        assert!(error.contains("did not finish"));
        assert!(error.contains(&format!("cancelled job {}", job_id)));
        assert_eq!(cloud.cancelled(), vec![job_id]);
        assert_eq!(cloud.rows_in(&dataset().table("table")), 0);
    }

    #[tokio::test]
    async fn unreadable_row_count_does_not_fail_the_load() {
        let cloud = cloud_with(&[("a.csv", 3)]);
        cloud.make_row_counts_unavailable();
        let results = load_bucket_into_table(
            &cloud,
            &cloud,
            &request("bucket", ""),
            &LoadOptions::default(),
        )
        .await
        .unwrap();
        assert!(results[0].succeeded());
        assert_eq!(results[0].rows_loaded, 3);
        assert_eq!(results[0].table_rows, None);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_stop_on_first_failure_skips_unstarted_objects() {
        let cloud = cloud_with(&[
            ("a.avro", 1),
            ("b.avro", 1),
            ("c.avro", 1),
            ("d.avro", 1),
            ("e.avro", 1),
        ]);
        cloud.set_job_delay(Duration::from_secs(1));
        cloud.fail_load_of("gs://bucket/a.avro");
        let opt = LoadOptions {
            parallelism: 2,
            stop_on_first_failure: true,
            ..LoadOptions::default()
        };
        let results = load_bucket_into_table(&cloud, &cloud, &request("bucket", ""), &opt)
            .await
            .unwrap();
        assert_eq!(
            keys_of(&results),
            vec!["a.avro", "b.avro", "c.avro", "d.avro", "e.avro"],
        );
        let succeeded = results.iter().map(LoadResult::succeeded).collect::<Vec<_>>();
        // `b` was already running when `a` failed.
        assert_eq!(succeeded, vec![false, true, false, false, false]);
        for skipped in &results[2..] {
            assert!(skipped.job_id.is_none());
            assert!(skipped.error.as_ref().unwrap().contains("skipped"));
        }
        assert_eq!(
            cloud.submitted(),
            vec!["gs://bucket/a.avro", "gs://bucket/b.avro"],
        );
    }
}
