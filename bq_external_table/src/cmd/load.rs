//! The default command: load every configured table.

use std::fmt;

use super::Env;
use crate::common::*;
use crate::loader::{load_bucket_into_table, LoadResult};

/// Load each configured bucket prefix into its table.
///
/// A table that fails to load does not stop later tables. We only report
/// failure once everything has been attempted.
pub async fn run(env: &Env) -> Result<()> {
    let requests = env.config.load_requests(&env.dataset);
    if requests.is_empty() {
        warn!("no buckets configured, nothing to load");
        return Ok(());
    }
    let options = env.config.load_options();

    let mut summary = Summary::default();
    for request in &requests {
        let table = request.dataset.table(&request.table_id);
        info!("loading gs://{}/{} into {}", request.bucket, request.prefix, table);
        match load_bucket_into_table(&env.storage, &env.bigquery, request, &options)
            .await
        {
            Ok(results) => {
                for result in &results {
                    report(result);
                }
                summary.add_table(&results);
            }
            Err(err) => {
                error!("could not load {}: {:#}", table, anyhow::Error::from(err));
                summary.add_failed_table();
            }
        }
    }

    info!("{}", summary);
    summary.into_result()
}

/// Totals across every table in a run.
#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    /// Tables whose batch ran, even if some of its objects failed.
    tables_loaded: usize,
    /// Tables whose batch never started.
    tables_failed: usize,
    objects_loaded: usize,
    objects_failed: usize,
}

impl Summary {
    fn add_table(&mut self, results: &[LoadResult]) {
        let failed = results.iter().filter(|r| !r.succeeded()).count();
        self.tables_loaded += 1;
        self.objects_failed += failed;
        self.objects_loaded += results.len() - failed;
    }

    fn add_failed_table(&mut self) {
        self.tables_failed += 1;
    }

    /// Succeed only if every table and every object loaded.
    fn into_result(self) -> Result<()> {
        if self.tables_failed > 0 || self.objects_failed > 0 {
            Err(format_err!(
                "{} objects and {} tables failed to load",
                self.objects_failed,
                self.tables_failed,
            ))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loaded {} objects into {} of {} tables; {} objects failed, {} tables could not be loaded",
            self.objects_loaded,
            self.tables_loaded,
            self.tables_loaded + self.tables_failed,
            self.objects_failed,
            self.tables_failed,
        )
    }
}

/// Log what happened to one object.
fn report(result: &LoadResult) {
    match &result.error {
        None => info!(
            object = %result.object_key,
            job_id = result.job_id.as_deref().unwrap_or(""),
            "loaded {} rows",
            result.rows_loaded,
        ),
        Some(err) => error!(
            object = %result.object_key,
            job_id = result.job_id.as_deref().unwrap_or(""),
            "load failed: {}",
            err,
        ),
    }
}
