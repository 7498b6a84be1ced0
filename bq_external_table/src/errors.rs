//! Errors that abort a whole load batch.
//!
//! Failures of individual load jobs are not errors at this level. They are
//! recorded in the matching [`LoadResult`](crate::LoadResult) so that the
//! caller can decide whether the run as a whole failed.

use thiserror::Error;

use crate::loader::FileFormat;

/// An error which stops a batch before any load job is submitted.
#[derive(Debug, Error)]
pub enum LoadError {
    /// We could not list the bucket, either because it doesn't exist or
    /// because Cloud Storage returned an error.
    #[error("could not list objects in gs://{bucket}/ with prefix {prefix:?}")]
    StorageUnavailable {
        bucket: String,
        prefix: String,
        #[source]
        source: anyhow::Error,
    },

    /// No objects matched the prefix, so there is nothing to load.
    #[error("no objects in gs://{bucket}/ match prefix {prefix:?}")]
    EmptyBatch { bucket: String, prefix: String },

    /// Strict mode only: the representative object has an extension we
    /// don't know how to load.
    #[error("cannot load {object:?}: unsupported file extension {extension:?}")]
    FormatUnsupported { object: String, extension: String },

    /// Strict mode only: the batch contains more than one kind of file.
    #[error(
        "batch mixes file formats: {representative:?} is {expected}, but {object:?} has extension {extension:?}"
    )]
    MixedFormats {
        representative: String,
        expected: FileFormat,
        object: String,
        extension: String,
    },
}

impl LoadError {
    /// An empty batch error for an orchestration call that has no bucket
    /// context yet.
    pub(crate) fn empty_batch() -> Self {
        LoadError::EmptyBatch {
            bucket: String::new(),
            prefix: String::new(),
        }
    }

    /// Fill in bucket and prefix details on an error raised deeper down.
    pub(crate) fn in_bucket(self, bucket: &str, prefix: &str) -> Self {
        match self {
            LoadError::EmptyBatch { .. } => LoadError::EmptyBatch {
                bucket: bucket.to_owned(),
                prefix: prefix.to_owned(),
            },
            other => other,
        }
    }
}
