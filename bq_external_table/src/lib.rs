//! Load raw data files from Google Cloud Storage into BigQuery tables.
//!
//! The interesting part of this crate is [`loader`], which lists the objects
//! under a bucket prefix, decides on a single file format for the whole batch,
//! and runs one BigQuery load job per object. Everything else is plumbing
//! around the Google Cloud REST APIs, which we reach through the traits in
//! [`providers`].

#![warn(rust_2018_idioms, unused_extern_crates, clippy::all)]

pub mod clouds;
pub mod cmd;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod loader;
pub mod logging;
pub mod providers;
pub mod table_name;
pub(crate) mod tls;
pub(crate) mod wait;

pub use config::RunConfig;
pub use credentials::Credentials;
pub use errors::LoadError;
pub use loader::{
    load_bucket_into_table, FileFormat, InferOptions, LoadOptions, LoadRequest,
    LoadResult, LoadSpecification, RepresentativePolicy,
};
pub use providers::{LoadJobHandle, ObjectKey, ObjectStorage, Warehouse};
pub use table_name::{DatasetName, TableName};

/// Definitions included by all the files in this crate.
///
/// This is the dialect of Rust we use everywhere else: `anyhow` for errors,
/// `tracing` for logs and `futures` for async glue.
#[allow(unused_imports)]
pub(crate) mod common {
    pub(crate) use anyhow::{format_err, Context as _, Error, Result};
    pub(crate) use futures::{Future, FutureExt, StreamExt, TryStreamExt};
    pub(crate) use tracing::{debug, error, info, instrument, trace, warn};
    pub(crate) use url::Url;
}
