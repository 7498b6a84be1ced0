//! Configuration file support.
//!
//! A run is described by a single JSON file naming the credentials to use,
//! the destination dataset, and which bucket prefixes go into which tables.

use serde::Deserialize;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::fs;

use crate::common::*;
use crate::credentials::Credentials;
use crate::loader::{InferOptions, LoadOptions, LoadRequest};
use crate::table_name::DatasetName;

/// The location used for new datasets unless the config says otherwise.
pub const DEFAULT_DATASET_LOCATION: &str = "US";

fn default_dataset_location() -> String {
    DEFAULT_DATASET_LOCATION.to_owned()
}

/// One table to fill from a bucket.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct TableLoad {
    /// The destination table, inside the configured dataset.
    pub table_name: String,
    /// Only objects whose names start with this are loaded.
    #[serde(default)]
    pub blob_prefix: String,
}

/// Knobs for how each table is loaded.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct LoadOptionsConfig {
    /// Reject batches with unknown or mixed file extensions before loading.
    pub strict: bool,
    /// Skip the rest of a table's objects once one of them fails.
    pub stop_on_first_failure: bool,
    /// How many load jobs may run at once for a single table.
    pub parallelism: usize,
    /// Give up on a load job after this many seconds.
    pub job_timeout_secs: Option<u64>,
}

impl Default for LoadOptionsConfig {
    fn default() -> Self {
        Self {
            strict: false,
            stop_on_first_failure: false,
            parallelism: 1,
            job_timeout_secs: None,
        }
    }
}

/// The contents of a `--json-config` file.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct RunConfig {
    /// Where to write our log file, if anywhere. Logs always go to the
    /// console as well.
    #[serde(default)]
    pub log_location: Option<PathBuf>,

    /// A service account key file.
    pub credentials_file_path: PathBuf,

    /// The dataset holding every destination table.
    pub dataset_name: String,

    /// The project owning the dataset. Defaults to the service account's
    /// project.
    #[serde(default)]
    pub project_id: Option<String>,

    /// Where to create the dataset.
    #[serde(default = "default_dataset_location")]
    pub dataset_location: String,

    /// For each bucket, the tables to load from it.
    #[serde(default)]
    pub buckets: BTreeMap<String, Vec<TableLoad>>,

    #[serde(default)]
    pub load_options: LoadOptionsConfig,
}

impl RunConfig {
    /// Read and validate a config file.
    ///
    /// This runs before logging is set up, because the config says where the
    /// log file goes. Report problems through the returned error.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("could not read config file {}", path.display()))?;
        let config = serde_json::from_str::<RunConfig>(&raw)
            .with_context(|| format!("could not parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.load_options.parallelism == 0 {
            return Err(format_err!("load_options.parallelism must be at least 1"));
        }
        if self.dataset_name.is_empty() {
            return Err(format_err!("dataset_name must not be empty"));
        }
        for (bucket, tables) in &self.buckets {
            if let Some(table) = tables.iter().find(|t| t.table_name.is_empty()) {
                return Err(format_err!(
                    "empty table_name for bucket {} (prefix {:?})",
                    bucket,
                    table.blob_prefix,
                ));
            }
        }
        Ok(())
    }

    /// The full name of the configured dataset. The project comes from
    /// `project_id` if set, and from `credentials` otherwise.
    pub fn dataset(&self, credentials: &Credentials) -> Result<DatasetName> {
        let project = self
            .project_id
            .as_deref()
            .or_else(|| credentials.project_id())
            .ok_or_else(|| {
                format_err!("no project_id in config file or service account key")
            })?;
        format!("{}:{}", project, self.dataset_name)
            .parse::<DatasetName>()
            .context("could not build dataset name")
    }

    /// One load request per configured table, in bucket order.
    pub fn load_requests(&self, dataset: &DatasetName) -> Vec<LoadRequest> {
        self.buckets
            .iter()
            .flat_map(|(bucket, tables)| {
                tables.iter().map(move |table| LoadRequest {
                    dataset: dataset.to_owned(),
                    bucket: bucket.to_owned(),
                    table_id: table.table_name.clone(),
                    prefix: table.blob_prefix.clone(),
                })
            })
            .collect()
    }

    /// Convert our `load_options` into what the loader wants.
    pub fn load_options(&self) -> LoadOptions {
        let opt = &self.load_options;
        LoadOptions {
            infer: InferOptions {
                strict: opt.strict,
                ..InferOptions::default()
            },
            stop_on_first_failure: opt.stop_on_first_failure,
            parallelism: opt.parallelism,
            job_timeout: opt.job_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::io::Write;

    use super::*;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut temp = tempfile::Builder::new()
            .prefix("bq-external-table")
            .suffix(".json")
            .tempfile()
            .unwrap();
        temp.write_all(json.as_bytes()).unwrap();
        temp
    }

    fn credentials(project_id: Option<&str>) -> Credentials {
        let key = serde_json::json!({
            "type": "service_account",
            "project_id": project_id,
            "private_key": "unused",
            "client_email": "loader@example.iam.gserviceaccount.com",
        });
        Credentials::from_service_account_json(Path::new("key.json"), key.to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn minimal_config_uses_defaults() {
        let temp = write_config(
            r#"{
              "credentials_file_path": "creds.json",
              "dataset_name": "raw",
              "buckets": {"b": [{"table_name": "users"}]}
            }"#,
        );
        let config = RunConfig::from_path(temp.path()).await.unwrap();
        assert_eq!(config.log_location, None);
        assert_eq!(config.dataset_location, "US");
        assert_eq!(config.load_options, LoadOptionsConfig::default());
        assert_eq!(
            config.buckets["b"],
            vec![TableLoad {
                table_name: "users".to_owned(),
                blob_prefix: "".to_owned(),
            }],
        );
        let opt = config.load_options();
        assert_eq!(opt.parallelism, 1);
        assert!(!opt.infer.strict);
        assert_eq!(opt.job_timeout, None);
    }

    #[tokio::test]
    async fn full_config_is_parsed() {
        let temp = write_config(
            r#"{
              "log_location": "logs/loader.log",
              "credentials_file_path": "creds.json",
              "dataset_name": "raw",
              "project_id": "other-project",
              "dataset_location": "EU",
              "buckets": {
                "zeta": [{"table_name": "z", "blob_prefix": "z/"}],
                "alpha": [
                  {"table_name": "users", "blob_prefix": "users/"},
                  {"table_name": "orders", "blob_prefix": "orders/"}
                ]
              },
              "load_options": {"strict": true, "parallelism": 4, "job_timeout_secs": 600}
            }"#,
        );
        let config = RunConfig::from_path(temp.path()).await.unwrap();
        assert_eq!(config.log_location, Some(PathBuf::from("logs/loader.log")));
        assert_eq!(config.dataset_location, "EU");

        let dataset = config.dataset(&credentials(Some("key-project"))).unwrap();
        assert_eq!(dataset.to_string(), "other-project:raw");

        let requests = config.load_requests(&dataset);
        let summary = requests
            .iter()
            .map(|r| (r.bucket.as_str(), r.table_id.as_str(), r.prefix.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                ("alpha", "users", "users/"),
                ("alpha", "orders", "orders/"),
                ("zeta", "z", "z/"),
            ],
        );

        let opt = config.load_options();
        assert!(opt.infer.strict);
        assert!(!opt.stop_on_first_failure);
        assert_eq!(opt.parallelism, 4);
        assert_eq!(opt.job_timeout, Some(Duration::from_secs(600)));
    }

    #[tokio::test]
    async fn project_falls_back_to_credentials() {
        let temp = write_config(
            r#"{"credentials_file_path": "c.json", "dataset_name": "raw"}"#,
        );
        let config = RunConfig::from_path(temp.path()).await.unwrap();
        let dataset = config.dataset(&credentials(Some("key-project"))).unwrap();
        assert_eq!(dataset.to_string(), "key-project:raw");
        assert!(config.dataset(&credentials(None)).is_err());
        assert!(config.load_requests(&dataset).is_empty());
    }

    #[tokio::test]
    async fn bad_configs_are_rejected() {
        for json in [
            "not json",
            r#"{"dataset_name": "raw"}"#,
            r#"{"credentials_file_path": "c.json", "dataset_name": ""}"#,
            r#"{"credentials_file_path": "c.json", "dataset_name": "raw",
                "load_options": {"parallelism": 0}}"#,
            r#"{"credentials_file_path": "c.json", "dataset_name": "raw",
                "buckets": {"b": [{"table_name": ""}]}}"#,
        ] {
            let temp = write_config(json);
            assert!(
                RunConfig::from_path(temp.path()).await.is_err(),
                "should reject {}",
                json,
            );
        }
    }

    #[tokio::test]
    async fn missing_config_file_is_an_error() {
        let err = RunConfig::from_path(Path::new("/no/such/config.json"))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("could not read config file"));
    }
}
