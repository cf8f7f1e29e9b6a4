use thiserror::Error;

use crate::exec::CommandError;

/// Errors produced by the disk test run and the volume usage report.
#[derive(Debug, Error)]
pub enum Error {
    /// An external command failed.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// A command's output could not be decoded as the expected JSON document.
    #[error("failed to decode {object}: {source}")]
    Decode {
        /// What was being decoded, e.g. `pvc default/data`
        object: String,
        /// The underlying decode failure
        #[source]
        source: serde_json::Error,
    },
    /// A decoded document lacks a field that is needed.
    #[error("{object} does not contain {field}")]
    MissingField {
        /// The object the field is missing from
        object: String,
        /// Dotted path of the missing field
        field: &'static str,
    },
    /// A persistent volume spec has no field that could name its type.
    #[error("pv {name} does not declare a volume type")]
    NoVolumeType {
        /// The persistent volume's name
        name: String,
    },
    /// A disk name the cloud provider would reject.
    #[error("invalid disk name {name:?}: must be 1-63 lowercase letters, digits or '-', starting with a letter and not ending with '-'")]
    InvalidDiskName {
        /// The rejected name
        name: String,
    },
}
