//! Error types for the cross-validation pipeline.

use crate::backend::DeviceKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for the cross-validation pipeline.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A file or directory could not be read or written.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("k-fold cross-validation needs at least 3 folds, got {0}")]
    InvalidFoldCount(usize),

    #[error("fold index {fold} is out of range for {num_folds} folds")]
    FoldOutOfRange { fold: usize, num_folds: usize },

    /// The data directory holds fewer subject folders than requested folds.
    #[error("found {found} subject folders in {root:?}, but {num_folds} folds were requested")]
    NotEnoughSubjects {
        root: PathBuf,
        found: usize,
        num_folds: usize,
    },

    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    /// The validation set of a fold cannot fill a single batch, so no epoch
    /// could ever be told apart from another.
    #[error("fold {fold}: {num_items} validation samples do not fill one batch of {batch_size}")]
    EmptyValidation {
        fold: usize,
        num_items: usize,
        batch_size: usize,
    },

    /// A sample file is not valid JSON or does not match the sample layout.
    #[error("failed to parse sample {path:?}: {source}")]
    Sample {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("sample {path:?} has {found} feature values, expected {expected}")]
    SampleShape {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("sample {path:?} has {task} label {label}, but only {num_classes} classes exist")]
    InvalidLabel {
        path: PathBuf,
        task: &'static str,
        label: u8,
        num_classes: usize,
    },

    /// Saving or loading a model record failed.
    #[error("model record error on {path:?}: {reason:?}")]
    Record {
        path: PathBuf,
        reason: burn::record::RecorderError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to load config {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("failed to write {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read tensor data: {0}")]
    TensorData(String),

    #[error("device {device} is not supported by the {backend} backend")]
    UnsupportedDevice {
        device: DeviceKind,
        backend: &'static str,
    },

    #[error("invalid device {0:?}, expected one of: cpu, cuda, cuda:<index>, mps")]
    InvalidDevice(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn tensor_data(reason: impl std::fmt::Debug) -> Self {
        Self::TensorData(format!("{reason:?}"))
    }
}
