pub mod backend;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod cross_validation;
pub mod dataset;
pub mod error;
pub mod evaluate;
pub mod folds;
pub mod loader;
pub mod metrics;
pub mod model;
pub mod training;

pub use error::{Error, Result};

pub mod prelude {
    pub use crate::backend::{DeviceKind, MainBackend, MainDevice};
    pub use crate::checkpoint::CheckpointStore;
    pub use crate::config::{ExperimentConfig, TrainingConfig};
    pub use crate::cross_validation::{CrossValidationReport, FoldRecord};
    pub use crate::dataset::{MultitaskBatch, MultitaskBatcher, MultitaskDataset, MultitaskItem};
    pub use crate::evaluate::{EvaluationResult, TaskPredictions};
    pub use crate::folds::FoldSplit;
    pub use crate::model::{LossWeights, MultitaskCnn, MultitaskCnnConfig};
    pub use crate::{Error, Result};
}
