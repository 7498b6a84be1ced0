//! Deciding which file format a batch of objects uses.

use std::fmt;

use crate::errors::LoadError;
use crate::providers::ObjectKey;

/// The format of the files in a batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileFormat {
    /// Comma-separated values.
    Csv,
    /// Avro container files.
    Avro,
    /// An extension we don't recognize.
    Unsupported,
}

impl FileFormat {
    /// Classify a file extension, ignoring case.
    pub fn for_extension(extension: &str) -> FileFormat {
        match extension.to_ascii_uppercase().as_str() {
            "CSV" => FileFormat::Csv,
            "AVRO" => FileFormat::Avro,
            _ => FileFormat::Unsupported,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Csv => write!(f, "CSV"),
            FileFormat::Avro => write!(f, "AVRO"),
            FileFormat::Unsupported => write!(f, "UNSUPPORTED"),
        }
    }
}

/// How we pick the object whose extension speaks for the whole batch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RepresentativePolicy {
    /// Use the first object, in listing order.
    #[default]
    First,
}

impl RepresentativePolicy {
    /// Choose the representative object, if there is one.
    fn choose<'a>(&self, keys: &'a [ObjectKey]) -> Option<&'a ObjectKey> {
        match self {
            RepresentativePolicy::First => keys.first(),
        }
    }
}

/// Options controlling format inference.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InferOptions {
    /// Which object decides the format.
    pub policy: RepresentativePolicy,

    /// Reject batches containing unknown extensions or more than one
    /// extension. By default we trust the representative object and let any
    /// mismatched loads fail on their own.
    pub strict: bool,
}

/// Infer the single format shared by `keys`.
///
/// By default, only the representative object is examined: `csv` means CSV
/// and everything else is treated as Avro.
pub fn infer_format(
    keys: &[ObjectKey],
    options: &InferOptions,
) -> Result<FileFormat, LoadError> {
    let representative = options
        .policy
        .choose(keys)
        .ok_or_else(LoadError::empty_batch)?;
    let extension = representative.extension();
    let format = FileFormat::for_extension(extension);

    if !options.strict {
        return Ok(match format {
            FileFormat::Csv => FileFormat::Csv,
            FileFormat::Avro | FileFormat::Unsupported => FileFormat::Avro,
        });
    }

    if format == FileFormat::Unsupported {
        return Err(LoadError::FormatUnsupported {
            object: representative.to_string(),
            extension: extension.to_owned(),
        });
    }
    for key in keys {
        if !key.extension().eq_ignore_ascii_case(extension) {
            return Err(LoadError::MixedFormats {
                representative: representative.to_string(),
                expected: format,
                object: key.to_string(),
                extension: key.extension().to_owned(),
            });
        }
    }
    Ok(format)
}

#[cfg(test)]
fn keys(names: &[&str]) -> Vec<ObjectKey> {
    names.iter().map(|&n| ObjectKey::from(n)).collect()
}

#[test]
fn csv_extension_means_csv_in_any_case() {
    let opt = InferOptions::default();
    for name in ["a.csv", "a.CSV", "dir/b.Csv"] {
        assert_eq!(infer_format(&keys(&[name]), &opt).unwrap(), FileFormat::Csv);
    }
}

#[test]
fn anything_else_defaults_to_avro() {
    let opt = InferOptions::default();
    for name in ["a.avro", "a.json", "a.csv.gz", "README"] {
        assert_eq!(infer_format(&keys(&[name]), &opt).unwrap(), FileFormat::Avro);
    }
}

#[test]
fn first_object_decides_mixed_batches() {
    let opt = InferOptions::default();
    let csv_first = keys(&["a.csv", "b.avro"]);
    assert_eq!(infer_format(&csv_first, &opt).unwrap(), FileFormat::Csv);
    let avro_first = keys(&["b.avro", "a.csv"]);
    assert_eq!(infer_format(&avro_first, &opt).unwrap(), FileFormat::Avro);
}

#[test]
fn empty_batch_is_an_error() {
    let err = infer_format(&[], &InferOptions::default()).unwrap_err();
    assert!(matches!(err, LoadError::EmptyBatch { .. }));
}

#[test]
fn strict_mode_rejects_mixed_and_unknown_extensions() {
    let opt = InferOptions {
        strict: true,
        ..InferOptions::default()
    };
    assert_eq!(
        infer_format(&keys(&["a.csv", "b.CSV"]), &opt).unwrap(),
        FileFormat::Csv,
    );
    assert!(matches!(
        infer_format(&keys(&["a.csv", "b.avro"]), &opt).unwrap_err(),
        LoadError::MixedFormats { .. },
    ));
    assert!(matches!(
        infer_format(&keys(&["a.parquet"]), &opt).unwrap_err(),
        LoadError::FormatUnsupported { .. },
    ));
}
