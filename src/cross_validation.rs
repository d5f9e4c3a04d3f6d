//! k-fold cross-validation driver.

use crate::checkpoint::CheckpointStore;
use crate::config::ExperimentConfig;
use crate::dataset::{MultitaskBatcher, MultitaskDataset, MultitaskLoader};
use crate::error::Result;
use crate::evaluate::{EvaluationResult, evaluate};
use crate::folds;
use crate::loader::{BatchLoader, stream_seed};
use crate::metrics;
use crate::training::train_fold;
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Test-set outcome of one fold, as written to the predictions file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldRecord {
    /// `fold_<k+1>`.
    pub fold: String,
    pub best_epoch: usize,
    pub checkpoint: PathBuf,
    #[serde(flatten)]
    pub result: EvaluationResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationReport {
    pub folds: Vec<FoldRecord>,
}

impl CrossValidationReport {
    pub fn mean_accuracy_digit(&self) -> f64 {
        let values: Vec<f64> = self.folds.iter().map(|f| f.result.accuracy_digit).collect();
        metrics::mean(&values)
    }

    pub fn mean_accuracy_gender(&self) -> f64 {
        let values: Vec<f64> = self.folds.iter().map(|f| f.result.accuracy_gender).collect();
        metrics::mean(&values)
    }
}

const TRAIN_STREAM: u32 = 0;
const VALID_STREAM: u32 = 1;
const TEST_STREAM: u32 = 2;

pub fn fold_name(fold: usize) -> String {
    format!("fold_{fold}")
}

/// Trains and tests one model per fold, then writes every fold's test
/// predictions to `predictions.json` in the best-model directory.
///
/// `config` is validated and saved next to the checkpoints before any fold runs.
pub fn run<B: Backend>(
    config: &ExperimentConfig,
    device: &B::Device,
) -> Result<CrossValidationReport> {
    config.validate()?;
    let store = CheckpointStore::create(&config.best_model_path)?;
    store.save_config(config)?;
    let layout = config.model.sample_layout();
    let batcher = MultitaskBatcher::new(layout);
    let seed = config.training.seed;

    let loader = |subjects: &[PathBuf], seed: u64| -> Result<MultitaskLoader> {
        let dataset = Arc::new(MultitaskDataset::from_subject_dirs(subjects, layout)?);
        BatchLoader::new(dataset, batcher.clone(), config.batch_size, seed)
    };

    let mut report = CrossValidationReport::default();
    for k in 0..config.num_folds {
        let fold = k + 1;
        log::info!("Fold-{fold} is processing");

        let split = folds::split_fold(&config.data_dir, k, config.num_folds)?;
        let train_loader = loader(&split.train, stream_seed(seed, TRAIN_STREAM))?;
        let valid_loader = loader(&split.validation, stream_seed(seed, VALID_STREAM))?;
        let test_loader = loader(&split.test, stream_seed(seed, TEST_STREAM))?;
        log::info!(
            "Fold-{fold}: {} training, {} validation and {} test samples",
            train_loader.num_items(),
            valid_loader.num_items(),
            test_loader.num_items()
        );

        let trained = train_fold::<B>(fold, config, &train_loader, &valid_loader, &store, device)?;
        let model = if config.reload_checkpoint {
            store.load_model(fold, config.model.init::<B>(device), device)?
        } else {
            trained.model
        };

        let weights = config.training.loss_weights();
        let result = evaluate(&model, &test_loader, 0, device, weights)?;
        log::info!(
            "Fold-{fold} best epoch {}, test accuracy digit {:.4}, gender {:.4} over {} samples",
            trained.best_epoch,
            result.accuracy_digit,
            result.accuracy_gender,
            result.num_samples
        );
        log::debug!(
            "Fold-{fold} digit confusion matrix: {:?}",
            result.digit.confusion_matrix(config.model.num_digits)
        );
        log::debug!(
            "Fold-{fold} gender confusion matrix: {:?}",
            result.gender.confusion_matrix(config.model.num_genders)
        );

        report.folds.push(FoldRecord {
            fold: fold_name(fold),
            best_epoch: trained.best_epoch,
            checkpoint: trained.checkpoint,
            result,
        });
    }

    let path = store.save_predictions(&report.folds)?;
    log::info!("Saved predictions of {} folds to {path:?}", report.folds.len());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::TaskPredictions;

    fn record(fold: usize, accuracy_digit: f64, accuracy_gender: f64) -> FoldRecord {
        FoldRecord {
            fold: fold_name(fold),
            best_epoch: 1,
            checkpoint: PathBuf::from(format!("best_model_{fold}.mpk")),
            result: EvaluationResult {
                accuracy_digit,
                accuracy_gender,
                mean_loss: 0.0,
                num_samples: 0,
                digit: TaskPredictions::default(),
                gender: TaskPredictions::default(),
            },
        }
    }

    #[test]
    fn averages_accuracies_over_folds() {
        let digit = [0.8, 0.9, 0.7, 1.0, 0.6, 0.9];
        let report = CrossValidationReport {
            folds: digit
                .iter()
                .enumerate()
                .map(|(k, &acc)| record(k + 1, acc, 0.5))
                .collect(),
        };
        assert!((report.mean_accuracy_digit() - 0.816_666_666).abs() < 1e-6);
        assert!((report.mean_accuracy_gender() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn records_flatten_the_evaluation_result() {
        let mut record = record(3, 0.5, 1.0);
        record.result.digit = TaskPredictions {
            predicted: vec![1, 2],
            target: vec![1, 1],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["fold"], "fold_3");
        assert_eq!(json["accuracy_digit"], 0.5);
        assert_eq!(json["digit"]["predicted"], serde_json::json!([1, 2]));

        let parsed: FoldRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }
}
