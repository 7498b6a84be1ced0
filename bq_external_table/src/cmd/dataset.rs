//! The `dataset` subcommand.

use clap::Parser;

use super::Env;
use crate::common::*;
use crate::providers::Warehouse;

/// A command that we can perform on the configured dataset.
#[derive(Debug, Parser)]
pub enum Command {
    /// Create the dataset.
    #[clap(name = "create")]
    Create {
        /// Where to create it. Defaults to `dataset_location` from the config.
        #[clap(long = "location")]
        location: Option<String>,
    },

    /// Delete the dataset and every table in it. Succeeds if the dataset
    /// doesn't exist.
    #[clap(name = "rm")]
    Remove {
        /// Fail instead of deleting tables.
        #[clap(long = "only-if-empty")]
        only_if_empty: bool,
    },
}

/// Create or delete the configured dataset.
pub async fn run(env: &Env, command: Command) -> Result<()> {
    match command {
        Command::Create { location } => {
            let location = location.unwrap_or_else(|| env.config.dataset_location.clone());
            env.bigquery.create_dataset(&env.dataset, &location).await?;
        }
        Command::Remove { only_if_empty } => {
            env.bigquery
                .delete_dataset(&env.dataset, !only_if_empty)
                .await?;
            info!("deleted dataset {}", env.dataset);
        }
    }
    Ok(())
}
