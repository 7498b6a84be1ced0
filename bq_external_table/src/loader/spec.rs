//! Load specifications shared by every job in a batch.

use super::FileFormat;
use crate::providers::ObjectKey;

/// What to do with rows already in the destination table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteDisposition {
    /// Add the new rows after the existing ones.
    Append,
}

/// How to load every object in one batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadSpecification {
    /// The format of the source files.
    pub format: FileFormat,
    /// Should the warehouse work out the table schema from the data?
    pub autodetect_schema: bool,
    /// The `gs://bucket/` prefix that object keys are appended to.
    pub source_uri_prefix: String,
    /// What happens to existing rows. We always append, so loading the same
    /// objects twice duplicates their rows.
    pub write_disposition: WriteDisposition,
}

impl LoadSpecification {
    /// Build the specification for loading `format` files from `bucket`.
    ///
    /// Only CSV asks for schema autodetection. Avro files carry their own
    /// schema.
    pub fn build(format: FileFormat, bucket: &str) -> Self {
        let autodetect_schema = match format {
            FileFormat::Csv => true,
            FileFormat::Avro | FileFormat::Unsupported => false,
        };
        LoadSpecification {
            format,
            autodetect_schema,
            source_uri_prefix: format!("gs://{}/", bucket),
            write_disposition: WriteDisposition::Append,
        }
    }

    /// The full source URI for `key`.
    pub fn source_uri(&self, key: &ObjectKey) -> String {
        format!("{}{}", self.source_uri_prefix, key)
    }
}

#[test]
fn csv_autodetects_and_avro_does_not() {
    assert!(LoadSpecification::build(FileFormat::Csv, "b").autodetect_schema);
    assert!(!LoadSpecification::build(FileFormat::Avro, "b").autodetect_schema);
}

#[test]
fn source_uris_use_the_bucket() {
    let spec = LoadSpecification::build(FileFormat::Avro, "my-bucket");
    assert_eq!(spec.source_uri_prefix, "gs://my-bucket/");
    assert_eq!(
        spec.source_uri(&ObjectKey::from("dir/a.avro")),
        "gs://my-bucket/dir/a.avro",
    );
    assert_eq!(spec.write_disposition, WriteDisposition::Append);
}
