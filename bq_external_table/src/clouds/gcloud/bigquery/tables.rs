//! Looking up BigQuery tables.

use serde::Deserialize;

use super::super::{percent_encode, Client, NoQuery};
use crate::common::*;
use crate::table_name::TableName;

/// The parts of a table resource we care about.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    /// The number of rows, as a string. Missing for some kinds of tables.
    num_rows: Option<String>,
}

/// Count the rows in `name`.
#[instrument(level = "trace", skip(client))]
pub(crate) async fn table_row_count(client: &Client, name: &TableName) -> Result<u64> {
    let url = format!(
        "https://bigquery.googleapis.com/bigquery/v2/projects/{}/datasets/{}/tables/{}",
        percent_encode(name.project()),
        percent_encode(name.dataset()),
        percent_encode(name.table()),
    );
    let table = client.get::<Table, _, _>(&url, NoQuery).await?;
    let num_rows = table
        .num_rows
        .ok_or_else(|| format_err!("BigQuery did not report numRows for {}", name))?;
    num_rows
        .parse::<u64>()
        .with_context(|| format!("could not parse numRows {:?} for {}", num_rows, name))
}
