//! The `object` subcommand.

use bytes::Bytes;
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::Env;
use crate::common::*;
use crate::providers::ObjectStorage;

/// A command that we can perform on objects in a bucket.
#[derive(Debug, Parser)]
pub enum Command {
    /// Upload a local file.
    #[clap(name = "put")]
    Put {
        /// The destination bucket.
        bucket: String,

        /// The local file to upload.
        file: PathBuf,

        /// The object name. Defaults to the local file's name.
        #[clap(long = "name")]
        name: Option<String>,
    },

    /// Download an object to a local file.
    #[clap(name = "get")]
    Get {
        /// The source bucket.
        bucket: String,

        /// The object name.
        name: String,

        /// Where to write the object's contents.
        file: PathBuf,
    },

    /// Delete an object.
    #[clap(name = "rm")]
    Remove {
        /// The bucket holding the object.
        bucket: String,

        /// The object name.
        name: String,
    },

    /// List object names, one per line.
    #[clap(name = "ls")]
    Ls {
        /// The bucket to list.
        bucket: String,

        /// Only list objects whose names start with this.
        #[clap(long = "prefix", default_value = "")]
        prefix: String,
    },
}

/// The object name to use when uploading `file` without `--name`.
fn default_object_name(file: &Path) -> Result<String> {
    file.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| format_err!("cannot get an object name from {}", file.display()))
}

/// Work with objects.
pub async fn run(env: &Env, command: Command) -> Result<()> {
    match command {
        Command::Put { bucket, file, name } => {
            let name = match name {
                Some(name) => name,
                None => default_object_name(&file)?,
            };
            let data = fs::read(&file)
                .await
                .with_context(|| format!("could not read {}", file.display()))?;
            env.storage
                .upload_object(&bucket, &name, Bytes::from(data))
                .await?;
            info!("file {} uploaded to gs://{}/{}", file.display(), bucket, name);
        }
        Command::Get { bucket, name, file } => {
            let data = env.storage.download_object(&bucket, &name).await?;
            fs::write(&file, &data)
                .await
                .with_context(|| format!("could not write {}", file.display()))?;
            info!("gs://{}/{} downloaded to {}", bucket, name, file.display());
        }
        Command::Remove { bucket, name } => {
            env.storage.delete_object(&bucket, &name).await?;
            info!("object gs://{}/{} deleted", bucket, name);
        }
        Command::Ls { bucket, prefix } => {
            for key in env.storage.list_objects(&bucket, &prefix).await? {
                println!("{}", key);
            }
        }
    }
    Ok(())
}

#[test]
fn uploads_default_to_the_file_name() {
    assert_eq!(
        default_object_name(Path::new("data/users.csv")).unwrap(),
        "users.csv",
    );
    assert!(default_object_name(Path::new("/")).is_err());
}
