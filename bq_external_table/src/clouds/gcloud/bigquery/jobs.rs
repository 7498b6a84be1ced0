//! BigQuery batch jobs.
//!
//! These use a number of closely-related types.

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use super::{
    super::{original_gcloud_error, percent_encode, Client, ClientError, Idempotency, NoQuery},
    BigQueryError,
};
use crate::common::*;
use crate::loader::{self, FileFormat};
use crate::table_name::TableName;

/// A BigQuery job.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Job {
    /// Output only. The ID of this job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<String>,

    /// The configuration for this job.
    pub(crate) configuration: JobConfiguration,

    /// A reference to this job. We always choose our own job ID.
    pub(crate) job_reference: Option<JobReference>,

    /// Output only. The status of this job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) status: Option<JobStatus>,

    /// Output only. What this job did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) statistics: Option<JobStatistics>,
}

impl Job {
    /// Create a new load job with a fresh, client-chosen job ID.
    pub(crate) fn new_load(project_id: &str, load_config: JobConfigurationLoad) -> Self {
        Job {
            id: None,
            configuration: JobConfiguration {
                load: Some(load_config),
            },
            job_reference: Some(JobReference {
                project_id: project_id.to_owned(),
                job_id: new_job_id(),
                location: None,
            }),
            status: None,
            statistics: None,
        }
    }

    /// Get the reference to this job.
    pub(crate) fn reference(&self) -> Result<&JobReference> {
        self.job_reference
            .as_ref()
            .ok_or_else(|| format_err!("newly created job has no jobReference"))
    }

    /// Has this job finished, successfully or not?
    pub(crate) fn is_done(&self) -> bool {
        self.status.as_ref().map(|s| s.state) == Some(JobState::Done)
    }

    /// Did this job finish without an error?
    pub(crate) fn succeeded(&self) -> bool {
        self.is_done()
            && self
                .status
                .as_ref()
                .map_or(false, |status| status.error_result.is_none())
    }

    /// The number of rows written by a finished load job.
    pub(crate) fn output_rows(&self) -> Result<u64> {
        let rows = self
            .statistics
            .as_ref()
            .and_then(|stats| stats.load.as_ref())
            .and_then(|load| load.output_rows.as_deref())
            .ok_or_else(|| format_err!("finished load job has no outputRows"))?;
        rows.parse::<u64>()
            .with_context(|| format!("could not parse outputRows {:?}", rows))
    }
}

/// Generate a client-side job ID, so that a retried insert names the same job.
fn new_job_id() -> String {
    format!("bq_external_table_{}", Uuid::new_v4().simple())
}

/// A compound job ID containing project and region information.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobReference {
    /// The project containing this job.
    pub(crate) project_id: String,

    /// The bare ID, suitable for use in URL.
    pub(crate) job_id: String,

    /// The location of this job. Filled in by BigQuery if we don't set it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) location: Option<String>,
}

/// Configuration for a job.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobConfiguration {
    /// Configuration information load jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) load: Option<JobConfigurationLoad>,
}

/// Configuration for data load jobs.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobConfigurationLoad {
    pub(crate) source_uris: Vec<String>,
    pub(crate) source_format: SourceFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) autodetect: Option<bool>,
    pub(crate) destination_table: TableReference,
    pub(crate) create_disposition: Option<CreateDisposition>,
    pub(crate) write_disposition: Option<WriteDisposition>,
}

/// The status of a job.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobStatus {
    /// The state of this job.
    state: JobState,

    /// If present, indicates that the job failed.
    error_result: Option<BigQueryError>,

    /// Errors encountered while running the job. These do not necessarily
    /// indicate that the job has finished or was unsuccessful.
    #[serde(default)]
    errors: Vec<BigQueryError>,
}

impl JobStatus {
    /// Check to see if we've encountered an error.
    fn check_for_error(&self) -> Result<(), BigQueryError> {
        for err in &self.errors {
            debug!("job reported error: {}", err);
        }
        if let Some(err) = &self.error_result {
            Err(err.clone())
        } else {
            Ok(())
        }
    }
}

/// The state of a job.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum JobState {
    /// This job is waiting to run.
    Pending,
    /// This job is currently running.
    Running,
    /// This job has finished.
    Done,
}

/// Job statistics. We only look at the ones for load jobs.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobStatistics {
    #[serde(skip_serializing_if = "Option::is_none")]
    load: Option<JobStatisticsLoad>,
}

/// Statistics for a load job. BigQuery sends its counts as strings.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobStatisticsLoad {
    #[serde(skip_serializing_if = "Option::is_none")]
    output_rows: Option<String>,
}

/// The name of a table.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableReference {
    pub(crate) project_id: String,
    pub(crate) dataset_id: String,
    pub(crate) table_id: String,
}

impl From<&TableName> for TableReference {
    fn from(name: &TableName) -> Self {
        Self {
            project_id: name.project().to_owned(),
            dataset_id: name.dataset().to_owned(),
            table_id: name.table().to_owned(),
        }
    }
}

/// The format of the files being loaded.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum SourceFormat {
    Csv,
    Avro,
}

impl TryFrom<FileFormat> for SourceFormat {
    type Error = Error;

    fn try_from(format: FileFormat) -> Result<Self> {
        match format {
            FileFormat::Csv => Ok(SourceFormat::Csv),
            FileFormat::Avro => Ok(SourceFormat::Avro),
            FileFormat::Unsupported => {
                Err(format_err!("BigQuery cannot load files in format {}", format))
            }
        }
    }
}

/// Should this job create new tables? We always create missing tables.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum CreateDisposition {
    CreateIfNeeded,
}

/// What should this job do with existing rows?
#[derive(Clone, Copy, Debug, Deserialize, Eq, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum WriteDisposition {
    WriteAppend,
}

impl From<loader::WriteDisposition> for WriteDisposition {
    fn from(disposition: loader::WriteDisposition) -> Self {
        match disposition {
            loader::WriteDisposition::Append => WriteDisposition::WriteAppend,
        }
    }
}

/// Submit a BigQuery job without waiting for it.
#[instrument(level = "trace", skip(client, job))]
pub(crate) async fn insert_job(client: &Client, project_id: &str, job: Job) -> Result<Job> {
    trace!("starting BigQuery job on {} {:?}", project_id, job);
    let reference = job.reference()?.to_owned();
    let insert_url = format!(
        "https://bigquery.googleapis.com/bigquery/v2/projects/{}/jobs",
        percent_encode(project_id),
    );
    match client
        .post::<Job, _, _, _>(&insert_url, Idempotency::SafeToRetry, NoQuery, job)
        .await
    {
        Ok(job) => Ok(job),
        // An earlier attempt of this same insert got through.
        Err(ClientError::Other(err))
            if original_gcloud_error(&err).map(|e| e.code) == Some(409) =>
        {
            debug!("job {} already exists, fetching it", reference.job_id);
            get_job(client, &reference).await
        }
        Err(err) => Err(err.into()),
    }
}

/// Look up the current state of a job.
async fn get_job(client: &Client, reference: &JobReference) -> Result<Job> {
    let job_url = format!(
        "https://bigquery.googleapis.com/bigquery/v2/projects/{}/jobs/{}",
        percent_encode(&reference.project_id),
        percent_encode(&reference.job_id),
    );
    let query = JobLocationQuery::from(reference);
    Ok(client.get::<Job, _, _>(&job_url, query).await?)
}

/// Jobs outside the `US` and `EU` multi-regions can only be found if we say
/// where they are.
#[derive(Debug, Serialize)]
struct JobLocationQuery<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

impl<'a> From<&'a JobReference> for JobLocationQuery<'a> {
    fn from(reference: &'a JobReference) -> Self {
        Self {
            location: reference.location.as_deref(),
        }
    }
}

/// `jobs.cancel` takes no parameters in its body.
#[derive(Debug, Serialize)]
struct CancelJobBody {}

/// The response to `jobs.cancel`.
#[derive(Debug, Deserialize)]
struct CancelJobResponse {
    /// The job as of the cancel request. It may still be running.
    job: Job,
}

/// Ask BigQuery to cancel a job, and return the job as it was when the
/// request arrived.
///
/// Cancellation is asynchronous. A job that is still running may yet finish.
#[instrument(level = "trace", skip(client))]
pub(crate) async fn cancel_job(client: &Client, reference: &JobReference) -> Result<Job> {
    let cancel_url = format!(
        "https://bigquery.googleapis.com/bigquery/v2/projects/{}/jobs/{}/cancel",
        percent_encode(&reference.project_id),
        percent_encode(&reference.job_id),
    );
    // Cancelling twice is harmless.
    let resp = client
        .post::<CancelJobResponse, _, _, _>(
            &cancel_url,
            Idempotency::SafeToRetry,
            JobLocationQuery::from(reference),
            CancelJobBody {},
        )
        .await?;
    Ok(resp.job)
}

/// Poll a job until it is `DONE`, and return it, or an error if it failed.
///
/// We check after 2 seconds, then double the delay up to 16 seconds.
#[instrument(level = "trace", skip(client))]
pub(crate) async fn wait_for_job(client: &Client, reference: &JobReference) -> Result<Job> {
    let mut sleep_duration = Duration::from_secs(2);
    let job = loop {
        sleep(sleep_duration).await;
        if sleep_duration < Duration::from_secs(16) {
            sleep_duration *= 2;
        }

        let job = get_job(client, reference).await?;
        if job.is_done() {
            break job;
        }
        trace!("job {} is still running", reference.job_id);
    };

    if let Some(status) = &job.status {
        status.check_for_error()?;
    }
    Ok(job)
}

#[test]
fn load_job_serializes_for_insert() {
    let table = "p:d.t".parse::<TableName>().unwrap();
    let config = JobConfigurationLoad {
        source_uris: vec!["gs://b/a.csv".to_owned()],
        source_format: SourceFormat::Csv,
        autodetect: Some(true),
        destination_table: TableReference::from(&table),
        create_disposition: Some(CreateDisposition::CreateIfNeeded),
        write_disposition: Some(loader::WriteDisposition::Append.into()),
    };
    let job = Job::new_load("p", config);
    let json = serde_json::to_value(&job).unwrap();
    assert_eq!(
        json["configuration"]["load"],
        serde_json::json!({
            "sourceUris": ["gs://b/a.csv"],
            "sourceFormat": "CSV",
            "autodetect": true,
            "destinationTable": {"projectId": "p", "datasetId": "d", "tableId": "t"},
            "createDisposition": "CREATE_IF_NEEDED",
            "writeDisposition": "WRITE_APPEND",
        }),
    );
    let job_id = json["jobReference"]["jobId"].as_str().unwrap();
    assert!(job_id.starts_with("bq_external_table_"));
    assert!(json["jobReference"].get("location").is_none());
}

#[test]
fn job_ids_are_unique() {
    assert_ne!(new_job_id(), new_job_id());
}

#[test]
fn unsupported_format_cannot_be_sent() {
    assert_eq!(SourceFormat::try_from(FileFormat::Avro).unwrap(), SourceFormat::Avro);
    assert!(SourceFormat::try_from(FileFormat::Unsupported).is_err());
}

#[test]
fn finished_job_reports_rows_or_error() {
    let done = serde_json::from_str::<Job>(
        r#"{
          "id": "p:US.job_1",
          "configuration": {"load": {
            "sourceUris": ["gs://b/a.avro"],
            "sourceFormat": "AVRO",
            "destinationTable": {"projectId": "p", "datasetId": "d", "tableId": "t"},
            "createDisposition": "CREATE_IF_NEEDED",
            "writeDisposition": "WRITE_APPEND"
          }},
          "jobReference": {"projectId": "p", "jobId": "job_1", "location": "US"},
          "status": {"state": "DONE"},
          "statistics": {"load": {"outputRows": "42", "inputFiles": "1"}}
        }"#,
    )
    .unwrap();
    assert!(done.is_done());
    assert_eq!(done.output_rows().unwrap(), 42);
    assert_eq!(done.reference().unwrap().location.as_deref(), Some("US"));

    let failed = serde_json::from_str::<Job>(
        r#"{
          "configuration": {},
          "jobReference": {"projectId": "p", "jobId": "job_2"},
          "status": {
            "state": "DONE",
            "errorResult": {"reason": "invalid", "message": "Bad CSV"},
            "errors": [{"reason": "invalid", "message": "Bad CSV"}]
          }
        }"#,
    )
    .unwrap();
    assert!(done.succeeded());
    assert!(!failed.succeeded());
    let status = failed.status.as_ref().unwrap();
    assert_eq!(
        status.check_for_error().unwrap_err().to_string(),
        "invalid: Bad CSV",
    );
}

#[test]
fn cancel_requests_carry_the_job_location() {
    let reference = JobReference {
        project_id: "p".to_owned(),
        job_id: "job_1".to_owned(),
        location: Some("asia-northeast1".to_owned()),
    };
    assert_eq!(
        serde_urlencoded::to_string(JobLocationQuery::from(&reference)).unwrap(),
        "location=asia-northeast1",
    );
    assert_eq!(serde_json::to_string(&CancelJobBody {}).unwrap(), "{}");

    let resp = serde_json::from_str::<CancelJobResponse>(
        r#"{
          "kind": "bigquery#jobCancelResponse",
          "job": {
            "configuration": {},
            "jobReference": {"projectId": "p", "jobId": "job_1", "location": "asia-northeast1"},
            "status": {"state": "RUNNING"}
          }
        }"#,
    )
    .unwrap();
    assert!(!resp.job.is_done());
    assert!(!resp.job.succeeded());
}
