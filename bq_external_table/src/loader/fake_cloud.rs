//! An in-memory stand-in for Cloud Storage and BigQuery, for tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use super::{FileFormat, LoadSpecification};
use crate::common::*;
use crate::providers::{LoadJobHandle, ObjectKey, ObjectStorage, Warehouse};
use crate::table_name::{DatasetName, TableName};

#[derive(Default)]
struct State {
    /// Objects in each bucket, in insertion order.
    buckets: BTreeMap<String, Vec<(String, Bytes)>>,
    datasets: HashSet<DatasetName>,
    tables: HashMap<TableName, u64>,
    /// Finished jobs, waiting to be collected.
    jobs: HashMap<String, (TableName, Result<u64, String>)>,
    /// Source URIs in the order they were submitted.
    submitted: Vec<String>,
    /// Source URIs whose load jobs should fail.
    failing: HashSet<String>,
    /// Jobs cancelled before they finished.
    cancelled: Vec<String>,
    /// Make every `table_row_count` call fail.
    row_counts_unavailable: bool,
    /// How long each job takes to finish.
    job_delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
    next_job: usize,
}

/// A fake cloud implementing both [`ObjectStorage`] and [`Warehouse`].
#[derive(Default)]
pub(crate) struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake cloud lock poisoned")
    }

    /// Add an object whose contents are `rows` lines of data.
    pub(crate) fn put(&self, bucket: &str, name: &str, rows: usize) {
        let data = (0..rows).map(|i| format!("{}\n", i)).collect::<String>();
        self.state()
            .buckets
            .entry(bucket.to_owned())
            .or_default()
            .push((name.to_owned(), Bytes::from(data)));
    }

    pub(crate) fn add_bucket(&self, bucket: &str) {
        self.state().buckets.entry(bucket.to_owned()).or_default();
    }

    pub(crate) fn add_dataset(&self, dataset: &DatasetName) {
        self.state().datasets.insert(dataset.to_owned());
    }

    /// Make the load job for `source_uri` fail.
    pub(crate) fn fail_load_of(&self, source_uri: &str) {
        self.state().failing.insert(source_uri.to_owned());
    }

    pub(crate) fn set_job_delay(&self, delay: Duration) {
        self.state().job_delay = Some(delay);
    }

    pub(crate) fn make_row_counts_unavailable(&self) {
        self.state().row_counts_unavailable = true;
    }

    pub(crate) fn cancelled(&self) -> Vec<String> {
        self.state().cancelled.clone()
    }

    pub(crate) fn submitted(&self) -> Vec<String> {
        self.state().submitted.clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    pub(crate) fn rows_in(&self, table: &TableName) -> u64 {
        self.state().tables.get(table).copied().unwrap_or(0)
    }

    /// Decide how a load job will end, the way BigQuery would.
    fn run_load(
        state: &State,
        source_uri: &str,
        dest_table: &TableName,
        spec: &LoadSpecification,
    ) -> Result<u64, String> {
        if state.failing.contains(source_uri) {
            return Err(format!("internalError: could not load {}", source_uri));
        }
        if !state.datasets.contains(&dest_table.dataset_name()) {
            return Err(format!("notFound: Dataset {}", dest_table.dataset_name()));
        }
        let rest = source_uri
            .strip_prefix("gs://")
            .ok_or_else(|| format!("invalid: not a gs:// URI: {}", source_uri))?;
        let (bucket, name) = rest
            .split_once('/')
            .ok_or_else(|| format!("invalid: no object in {}", source_uri))?;
        let data = state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.iter().find(|(n, _)| n == name))
            .map(|(_, data)| data)
            .ok_or_else(|| format!("notFound: {}", source_uri))?;
        let actual = FileFormat::for_extension(ObjectKey::from(name).extension());
        if actual != spec.format {
            return Err(format!(
                "invalid: cannot read {} as {}",
                source_uri, spec.format
            ));
        }
        Ok(data
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .count() as u64)
    }
}

#[async_trait]
impl ObjectStorage for FakeCloud {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectKey>> {
        let state = self.state();
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| format_err!("cannot GET bucket {}: Not Found", bucket))?;
        Ok(objects
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| ObjectKey::new(name.as_str()))
            .collect())
    }

    async fn upload_object(&self, bucket: &str, name: &str, data: Bytes) -> Result<()> {
        let mut state = self.state();
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| format_err!("no bucket {}", bucket))?;
        objects.retain(|(n, _)| n != name);
        objects.push((name.to_owned(), data));
        Ok(())
    }

    async fn download_object(&self, bucket: &str, name: &str) -> Result<Bytes> {
        self.state()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.iter().find(|(n, _)| n == name))
            .map(|(_, data)| data.clone())
            .ok_or_else(|| format_err!("no object gs://{}/{}", bucket, name))
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| format_err!("no bucket {}", bucket))?;
        objects.retain(|(n, _)| n != name);
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str, _location: Option<&str>) -> Result<()> {
        self.add_bucket(bucket);
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.state();
        match state.buckets.get(bucket) {
            Some(objects) if objects.is_empty() => {
                state.buckets.remove(bucket);
                Ok(())
            }
            Some(_) => Err(format_err!("bucket {} is not empty", bucket)),
            None => Err(format_err!("no bucket {}", bucket)),
        }
    }
}

#[async_trait]
impl Warehouse for FakeCloud {
    async fn create_dataset(&self, dataset: &DatasetName, _location: &str) -> Result<()> {
        self.add_dataset(dataset);
        Ok(())
    }

    async fn delete_dataset(
        &self,
        dataset: &DatasetName,
        delete_contents: bool,
    ) -> Result<()> {
        let mut state = self.state();
        let has_tables = state.tables.keys().any(|t| &t.dataset_name() == dataset);
        if has_tables && !delete_contents {
            return Err(format_err!("dataset {} is still in use", dataset));
        }
        state.tables.retain(|t, _| &t.dataset_name() != dataset);
        state.datasets.remove(dataset);
        Ok(())
    }

    async fn submit_load_job(
        &self,
        source_uri: &str,
        dest_table: &TableName,
        spec: &LoadSpecification,
    ) -> Result<LoadJobHandle> {
        let mut state = self.state();
        state.submitted.push(source_uri.to_owned());
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        state.next_job += 1;
        let job_id = format!("job_{}", state.next_job);
        let outcome = Self::run_load(&state, source_uri, dest_table, spec);
        state
            .jobs
            .insert(job_id.clone(), (dest_table.to_owned(), outcome));
        Ok(LoadJobHandle {
            job_id,
            location: Some("US".to_owned()),
            project: dest_table.project().to_owned(),
        })
    }

    async fn await_load_job(&self, handle: &LoadJobHandle) -> Result<u64> {
        let delay = self.state().job_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state.in_flight -= 1;
        let (table, outcome) = state
            .jobs
            .remove(&handle.job_id)
            .ok_or_else(|| format_err!("unknown job {}", handle.job_id))?;
        let rows = outcome.map_err(|msg| format_err!("{}", msg))?;
        *state.tables.entry(table).or_insert(0) += rows;
        Ok(rows)
    }

    async fn cancel_load_job(&self, handle: &LoadJobHandle) -> Result<()> {
        let mut state = self.state();
        match state.jobs.remove(&handle.job_id) {
            Some(_) => {
                state.in_flight -= 1;
                state.cancelled.push(handle.job_id.clone());
                Ok(())
            }
            None => Err(format_err!("job {} already finished", handle.job_id)),
        }
    }

    async fn table_row_count(&self, table: &TableName) -> Result<u64> {
        let state = self.state();
        if state.row_counts_unavailable {
            return Err(format_err!("backendError: cannot GET table {}", table));
        }
        state
            .tables
            .get(table)
            .copied()
            .ok_or_else(|| format_err!("cannot GET table {}: Not Found", table))
    }
}
