//! The `bucket` subcommand.

use clap::Parser;

use super::Env;
use crate::common::*;
use crate::providers::ObjectStorage;

/// A command that we can perform on a bucket.
#[derive(Debug, Parser)]
pub enum Command {
    /// Create a new bucket.
    #[clap(name = "create")]
    Create {
        /// The bucket name.
        name: String,

        /// Where to store the bucket's data (e.g. `US`, `EU`, `us-central1`).
        #[clap(long = "location")]
        location: Option<String>,
    },

    /// Delete a bucket, which must be empty.
    #[clap(name = "rm")]
    Remove {
        /// The bucket name.
        name: String,
    },
}

/// Create or delete a bucket.
pub async fn run(env: &Env, command: Command) -> Result<()> {
    match command {
        Command::Create { name, location } => {
            env.storage
                .create_bucket(&name, location.as_deref())
                .await?;
            info!("bucket {} created", name);
        }
        Command::Remove { name } => {
            env.storage.delete_bucket(&name).await?;
            info!("bucket {} deleted", name);
        }
    }
    Ok(())
}
