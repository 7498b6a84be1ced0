//! Load data from Google Cloud Storage into BigQuery.

use super::{
    super::Client,
    jobs::{
        cancel_job, insert_job, wait_for_job, CreateDisposition, Job, JobConfigurationLoad,
        JobReference, SourceFormat, TableReference,
    },
};
use crate::common::*;
use crate::loader::LoadSpecification;
use crate::table_name::TableName;

/// Build the load configuration for one object.
fn load_config(
    source_uri: &str,
    dest_table: &TableName,
    spec: &LoadSpecification,
) -> Result<JobConfigurationLoad> {
    Ok(JobConfigurationLoad {
        source_uris: vec![source_uri.to_owned()],
        source_format: SourceFormat::try_from(spec.format)?,
        autodetect: Some(spec.autodetect_schema),
        destination_table: TableReference::from(dest_table),
        create_disposition: Some(CreateDisposition::CreateIfNeeded),
        write_disposition: Some(spec.write_disposition.into()),
    })
}

/// Start loading `source_uri` into `dest_table`, and return the new job's
/// reference without waiting for it.
#[instrument(level = "trace", skip(client, spec), fields(dest_table = %dest_table))]
pub(crate) async fn start_load(
    client: &Client,
    source_uri: &str,
    dest_table: &TableName,
    spec: &LoadSpecification,
) -> Result<JobReference> {
    trace!("loading {} into {}", source_uri, dest_table);
    let config = load_config(source_uri, dest_table, spec)?;
    let job = insert_job(
        client,
        dest_table.project(),
        Job::new_load(dest_table.project(), config),
    )
    .await?;
    Ok(job.reference()?.to_owned())
}

/// Wait for a load job to finish, and return how many rows it wrote.
#[instrument(level = "trace", skip(client), fields(job_id = %reference.job_id))]
pub(crate) async fn finish_load(client: &Client, reference: &JobReference) -> Result<u64> {
    let job = wait_for_job(client, reference).await?;
    job.output_rows()
}

/// Cancel a load job we have stopped waiting for.
///
/// Fails if the job had already finished successfully, because then its rows
/// are in the table and the caller must not report them as missing.
#[instrument(level = "trace", skip(client), fields(job_id = %reference.job_id))]
pub(crate) async fn cancel_load(client: &Client, reference: &JobReference) -> Result<()> {
    let job = cancel_job(client, reference).await?;
    if job.succeeded() {
        let rows = job
            .output_rows()
            .map(|rows| rows.to_string())
            .unwrap_or_else(|_| "an unknown number of".to_owned());
        return Err(format_err!(
            "job {} had already finished and wrote {} rows",
            reference.job_id,
            rows,
        ));
    }
    debug!("requested cancellation of job {}", reference.job_id);
    Ok(())
}

#[test]
fn avro_loads_do_not_autodetect() {
    use crate::loader::FileFormat;

    let table = "p:d.t".parse::<TableName>().unwrap();
    let spec = LoadSpecification::build(FileFormat::Avro, "b");
    let config = load_config("gs://b/a.avro", &table, &spec).unwrap();
    assert_eq!(config.source_format, SourceFormat::Avro);
    assert_eq!(config.autodetect, Some(false));
    assert_eq!(config.source_uris, vec!["gs://b/a.avro"]);

    let spec = LoadSpecification::build(FileFormat::Unsupported, "b");
    assert!(load_config("gs://b/a.txt", &table, &spec).is_err());
}
