//! BigQuery dataset and table names.

use lazy_static::lazy_static;
use regex::Regex;
use std::{fmt, str::FromStr};

use crate::common::*;

/// A BigQuery dataset name of the form `"project:dataset"`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DatasetName {
    /// The name of the Google Cloud project.
    project: String,
    /// The BigQuery dataset.
    dataset: String,
}

impl DatasetName {
    /// Create a dataset name from its parts.
    pub fn new<P, D>(project: P, dataset: D) -> Self
    where
        P: Into<String>,
        D: Into<String>,
    {
        Self {
            project: project.into(),
            dataset: dataset.into(),
        }
    }

    /// Return the name of the dataset's project.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Return the bare dataset name, without the project.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// The name of `table_id` inside this dataset.
    pub fn table(&self, table_id: &str) -> TableName {
        TableName {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: table_id.to_owned(),
        }
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.dataset)
    }
}

impl FromStr for DatasetName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        lazy_static! {
            static ref RE: Regex = Regex::new("^([^:.`]+):([^:.`]+)$")
                .expect("could not parse built-in regex");
        }
        let cap = RE.captures(s).ok_or_else(|| {
            format_err!("could not parse BigQuery dataset name: {:?}", s)
        })?;
        Ok(DatasetName::new(&cap[1], &cap[2]))
    }
}

/// A BigQuery table name of the form `"project:dataset.table"`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TableName {
    /// The name of the Google Cloud project.
    project: String,
    /// The BigQuery dataset.
    dataset: String,
    /// The table.
    table: String,
}

impl TableName {
    /// Return the name of the table's project.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Return the name of the table's dataset.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Return the bare table name itself, without project or dataset.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The dataset containing this table.
    pub fn dataset_name(&self) -> DatasetName {
        DatasetName::new(&self.project, &self.dataset)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.project, self.dataset, self.table)
    }
}

impl FromStr for TableName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        lazy_static! {
            static ref RE: Regex = Regex::new("^([^:.`]+):([^:.`]+)\\.([^:.`]+)$")
                .expect("could not parse built-in regex");
        }
        let cap = RE.captures(s).ok_or_else(|| {
            format_err!("could not parse BigQuery table name: {:?}", s)
        })?;
        let (project, dataset, table) = (&cap[1], &cap[2], &cap[3]);
        Ok(TableName {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        })
    }
}

#[test]
fn parse_and_display_table_name() {
    let name = "project:dataset.table".parse::<TableName>().unwrap();
    assert_eq!(name.project(), "project");
    assert_eq!(name.dataset(), "dataset");
    assert_eq!(name.table(), "table");
    assert_eq!(name.to_string(), "project:dataset.table");
    assert_eq!(name.dataset_name().to_string(), "project:dataset");
}

#[test]
fn reject_malformed_names() {
    assert!("dataset.table".parse::<TableName>().is_err());
    assert!("project:dataset".parse::<TableName>().is_err());
    assert!("project:data.set.table".parse::<TableName>().is_err());
    assert!("project".parse::<DatasetName>().is_err());
    assert!("project:dataset.table".parse::<DatasetName>().is_err());
}

#[test]
fn dataset_builds_table_names() {
    let dataset = "project:dataset".parse::<DatasetName>().unwrap();
    assert_eq!(dataset.table("users").to_string(), "project:dataset.users");
}
