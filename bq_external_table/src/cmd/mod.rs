//! Command parsing.

use clap::Parser;
use std::path::{Path, PathBuf};

use crate::clouds::gcloud::{BigQuery, CloudStorage};
use crate::common::*;
use crate::config::RunConfig;
use crate::credentials::Credentials;
use crate::logging::{init_logging, LogFormat};
use crate::table_name::DatasetName;

pub mod bucket;
pub mod dataset;
pub mod load;
pub mod object;

/// Command-line options, parsed using `clap`.
#[derive(Debug, Parser)]
#[clap(
    name = "bq-external-table",
    version,
    about = "Load files from Google Cloud Storage buckets into BigQuery tables."
)]
pub struct Opt {
    /// The JSON config file describing what to load.
    #[clap(short = 'j', long = "json-config", value_parser = json_config_file)]
    pub json_config: PathBuf,

    /// Console log format [values: flat, indented, json].
    #[clap(long = "log-format", default_value = "flat")]
    pub log_format: LogFormat,

    /// The command to run. Defaults to `load`.
    #[clap(subcommand)]
    pub cmd: Option<Command>,
}

/// The command to run.
#[derive(Debug, Parser)]
pub enum Command {
    /// Load every configured bucket prefix into its table.
    #[clap(name = "load")]
    Load,

    /// Create or delete buckets.
    #[clap(name = "bucket")]
    Bucket {
        #[clap(subcommand)]
        command: bucket::Command,
    },

    /// Upload, download, list or delete objects.
    #[clap(name = "object")]
    Object {
        #[clap(subcommand)]
        command: object::Command,
    },

    /// Create or delete the configured dataset.
    #[clap(name = "dataset")]
    Dataset {
        #[clap(subcommand)]
        command: dataset::Command,
    },
}

/// Accept only existing files whose names end in `.json`.
fn json_config_file(value: &str) -> Result<PathBuf, String> {
    let path = Path::new(value);
    let is_json = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.rsplit('.').next())
        == Some("json");
    if is_json && path.is_file() {
        Ok(path.to_owned())
    } else {
        Err(format!("{} - JSON config location is not valid", value))
    }
}

/// Everything a command needs: the parsed config and our cloud clients.
pub struct Env {
    pub config: RunConfig,
    pub dataset: DatasetName,
    pub storage: CloudStorage,
    pub bigquery: BigQuery,
}

impl Env {
    /// Load credentials and connect to Google Cloud.
    async fn new(config: RunConfig) -> Result<Self> {
        info!("authenticating to Google Cloud");
        let credentials =
            Credentials::from_service_account_file(&config.credentials_file_path).await?;
        let dataset = config.dataset(&credentials)?;
        let storage = CloudStorage::new(&credentials, dataset.project())?;
        let bigquery = BigQuery::new(&credentials)?;
        Ok(Env {
            config,
            dataset,
            storage,
            bigquery,
        })
    }
}

/// Run the command in `opt`.
pub async fn run(opt: Opt) -> Result<()> {
    let config = RunConfig::from_path(&opt.json_config).await?;
    let _guard = init_logging(opt.log_format, config.log_location.as_deref())?;
    info!(
        config = %opt.json_config.display(),
        dataset = %config.dataset_name,
        buckets = config.buckets.len(),
        "loaded JSON config",
    );
    debug!("{:?}", opt);

    let env = Env::new(config).await?;
    match opt.cmd.unwrap_or(Command::Load) {
        Command::Load => load::run(&env).await,
        Command::Bucket { command } => bucket::run(&env, command).await,
        Command::Object { command } => object::run(&env, command).await,
        Command::Dataset { command } => dataset::run(&env, command).await,
    }
}

#[test]
fn json_config_file_requires_existing_json() {
    let temp = tempfile::Builder::new()
        .prefix("bq-external-table")
        .suffix(".json")
        .tempfile()
        .unwrap();
    let path = temp.path().to_str().unwrap();
    assert_eq!(json_config_file(path).unwrap(), temp.path());
    assert!(json_config_file("/no/such/config.json").is_err());

    let toml = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    assert!(json_config_file(toml.path().to_str().unwrap()).is_err());
}

#[test]
fn opt_parses_subcommands() {
    let temp = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    let path = temp.path().to_str().unwrap();

    let opt = Opt::try_parse_from(["bq-external-table", "-j", path]).unwrap();
    assert!(opt.cmd.is_none());
    assert_eq!(opt.log_format, LogFormat::Flat);

    let opt = Opt::try_parse_from([
        "bq-external-table",
        "--json-config",
        path,
        "--log-format",
        "json",
        "object",
        "ls",
        "my-bucket",
        "--prefix",
        "users/",
    ])
    .unwrap();
    assert_eq!(opt.log_format, LogFormat::Json);
    assert!(matches!(
        opt.cmd,
        Some(Command::Object {
            command: object::Command::Ls { ref bucket, ref prefix },
        }) if bucket == "my-bucket" && prefix == "users/"
    ));

    assert!(Opt::try_parse_from(["bq-external-table", "-j", path, "--log-format", "xml"])
        .is_err());
}
