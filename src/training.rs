//! Per-fold training with best-checkpoint selection on the validation set.

use crate::checkpoint::CheckpointStore;
use crate::config::ExperimentConfig;
use crate::dataset::MultitaskLoader;
use crate::error::{Error, Result};
use crate::evaluate::{EvaluationResult, evaluate};
use crate::model::MultitaskCnn;
use burn::backend::Autodiff;
use burn::prelude::*;
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    train::metric::{
        AccuracyMetric, Adaptor, LossInput, LossMetric, Metric, MetricMetadata, Numeric,
    },
};
use std::path::PathBuf;

/// How well a model did on the validation set after an epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationScore {
    /// Mean of the digit and gender accuracies.
    pub accuracy: f64,
    /// Mean combined validation loss.
    pub loss: f64,
}

impl ValidationScore {
    pub fn from_result(result: &EvaluationResult) -> Self {
        Self {
            accuracy: (result.accuracy_digit + result.accuracy_gender) / 2.0,
            loss: result.mean_loss,
        }
    }

    /// Whether `self` should replace `best`.
    ///
    /// Higher accuracy wins, a tie is broken by a strictly lower loss and
    /// anything else keeps the earlier epoch. An empty validation set would
    /// score every epoch `(0.0, 0.0)`, so `train_fold` refuses one upfront.
    pub fn improves_on(&self, best: Option<&Self>) -> bool {
        let Some(best) = best else {
            return true;
        };
        if self.accuracy != best.accuracy {
            return self.accuracy > best.accuracy;
        }
        self.loss < best.loss
    }
}

/// Best model of a fold, on the inference backend.
#[derive(Debug)]
pub struct TrainedFold<B: Backend> {
    pub model: MultitaskCnn<B>,
    /// 1-based epoch that produced `model`.
    pub best_epoch: usize,
    pub score: ValidationScore,
    pub checkpoint: PathBuf,
}

/// Best epoch seen so far in a fold, kept in memory and mirrored on disk.
#[derive(Debug)]
pub struct BestModel<B: Backend> {
    fold: usize,
    best: Option<TrainedFold<B>>,
}

impl<B: Backend> BestModel<B> {
    pub fn new(fold: usize) -> Self {
        Self { fold, best: None }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best.as_ref().map(|best| best.best_epoch)
    }

    pub fn score(&self) -> Option<&ValidationScore> {
        self.best.as_ref().map(|best| &best.score)
    }

    /// Keeps `model` and overwrites the fold's checkpoint if `score` improves
    /// on the current best. Returns whether it did.
    pub fn offer(
        &mut self,
        epoch: usize,
        score: ValidationScore,
        model: MultitaskCnn<B>,
        store: &CheckpointStore,
    ) -> Result<bool> {
        if !score.improves_on(self.score()) {
            return Ok(false);
        }
        let fold = self.fold;
        let checkpoint = store.save_model(fold, &model)?;
        log::info!("Fold {fold}: new best model at epoch {epoch}, saved to {checkpoint:?}");
        self.best = Some(TrainedFold {
            model,
            best_epoch: epoch,
            score,
            checkpoint,
        });
        Ok(true)
    }

    pub fn into_trained(self) -> Option<TrainedFold<B>> {
        self.best
    }
}

/// Trains a fresh model for fold `fold` (1-based) and returns its best epoch.
///
/// After every epoch the model is scored on `valid_loader`; each improvement
/// is persisted into `store` before training resumes.
pub fn train_fold<B: Backend>(
    fold: usize,
    config: &ExperimentConfig,
    train_loader: &MultitaskLoader,
    valid_loader: &MultitaskLoader,
    store: &CheckpointStore,
    device: &B::Device,
) -> Result<TrainedFold<B>> {
    let training = &config.training;
    if valid_loader.num_batches() == 0 {
        return Err(Error::EmptyValidation {
            fold,
            num_items: valid_loader.num_items(),
            batch_size: valid_loader.batch_size(),
        });
    }
    let weights = training.loss_weights();

    B::seed(device, training.seed.wrapping_add(fold as u64));
    let mut model: MultitaskCnn<Autodiff<B>> = config.model.init(device);
    let mut optim = training.optimizer.init::<Autodiff<B>, MultitaskCnn<Autodiff<B>>>();

    let mut metric_meta = MetricMetadata {
        progress: burn::data::dataloader::Progress::new(0, train_loader.num_items()),
        epoch: 1,
        epoch_total: training.num_epochs,
        iteration: 0,
        lr: Some(training.lr),
    };
    let num_batches = train_loader.num_batches();
    let mut best = BestModel::new(fold);

    for epoch in 1..training.num_epochs + 1 {
        metric_meta.epoch = epoch;
        metric_meta.progress.items_processed = 0;

        let mut loss_metric = LossMetric::<Autodiff<B>>::new();
        let mut digit_metric = AccuracyMetric::<Autodiff<B>>::new();
        let mut gender_metric = AccuracyMetric::<Autodiff<B>>::new();
        let mut trained_batches = 0usize;

        for (mut b, batch) in train_loader.iter::<Autodiff<B>, _>(epoch, device).enumerate() {
            b += 1;
            let [batch_size] = batch.digits.dims();
            metric_meta.iteration += 1;
            metric_meta.progress.items_processed += batch_size;

            let output = model.forward_multitask(batch, weights);
            loss_metric.update(&LossInput::new(output.loss.clone()), &metric_meta);
            digit_metric.update(&output.digit.adapt(), &metric_meta);
            gender_metric.update(&output.gender.adapt(), &metric_meta);

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(training.lr, model, grads);
            trained_batches += 1;

            if training.log_interval > 0 && b % training.log_interval == 0 {
                log::debug!(
                    "Fold {fold} Epoch {}/{}, Batch {b:0>4}/{num_batches:0>4}, Loss {:.4}, Digit Acc {:0>6.2}, Gender Acc {:0>6.2}",
                    metric_meta.epoch,
                    metric_meta.epoch_total,
                    loss_metric.value().current(),
                    digit_metric.value().current(),
                    gender_metric.value().current(),
                );
            }
        }

        if trained_batches == 0 {
            log::warn!(
                "Fold {fold} Epoch {epoch}: no full batch of size {} among {} training samples",
                train_loader.batch_size(),
                train_loader.num_items()
            );
        } else {
            log::info!(
                "Fold {fold} Epoch {}/{}, Avg Loss {:.4}, Avg Digit Acc {:.2}, Avg Gender Acc {:.2}",
                metric_meta.epoch,
                metric_meta.epoch_total,
                loss_metric.running_value().current(),
                digit_metric.running_value().current(),
                gender_metric.running_value().current(),
            );
        }

        let valid_model = model.valid();
        let result = evaluate(&valid_model, valid_loader, epoch, device, weights)?;
        let score = ValidationScore::from_result(&result);
        log::info!(
            "Fold {fold} Epoch {}/{}, Valid Loss {:.4}, Valid Digit Acc {:.4}, Valid Gender Acc {:.4}",
            metric_meta.epoch,
            metric_meta.epoch_total,
            result.mean_loss,
            result.accuracy_digit,
            result.accuracy_gender,
        );

        best.offer(epoch, score, valid_model, store)?;
    }

    // the first epoch always sets a best model
    best.into_trained().ok_or_else(|| {
        Error::InvalidConfig("training.num_epochs must be at least 1".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{MultitaskBatcher, MultitaskDataset, MultitaskItem};
    use crate::loader::BatchLoader;
    use crate::model::MultitaskCnnConfig;
    use burn::backend::NdArray;
    use burn::module::Param;
    use std::sync::Arc;

    type TestBackend = NdArray<f32>;

    fn score(accuracy: f64, loss: f64) -> ValidationScore {
        ValidationScore { accuracy, loss }
    }

    #[test]
    fn first_score_always_improves() {
        assert!(score(0.0, f64::MAX).improves_on(None));
    }

    #[test]
    fn higher_accuracy_wins_regardless_of_loss() {
        let best = score(0.5, 0.1);
        assert!(score(0.6, 3.0).improves_on(Some(&best)));
        assert!(!score(0.4, 0.01).improves_on(Some(&best)));
    }

    #[test]
    fn ties_are_broken_by_strictly_lower_loss() {
        let best = score(0.75, 0.4);
        assert!(score(0.75, 0.3).improves_on(Some(&best)));
        assert!(!score(0.75, 0.4).improves_on(Some(&best)));
        assert!(!score(0.75, 0.5).improves_on(Some(&best)));
    }

    #[test]
    fn score_is_the_mean_task_accuracy() {
        let result = EvaluationResult {
            accuracy_digit: 0.5,
            accuracy_gender: 1.0,
            mean_loss: 0.25,
            num_samples: 0,
            digit: Default::default(),
            gender: Default::default(),
        };
        assert_eq!(ValidationScore::from_result(&result), score(0.75, 0.25));
    }

    fn loader(config: &MultitaskCnnConfig, n: usize, seed: u64) -> MultitaskLoader {
        let items = (0..n)
            .map(|i| MultitaskItem {
                features: vec![(i % 3) as f32; config.height * config.width],
                digit: (i % 3) as u8,
                gender: (i % 2) as u8,
            })
            .collect();
        let dataset = Arc::new(MultitaskDataset::from_items(items));
        BatchLoader::new(dataset, MultitaskBatcher::new(config.sample_layout()), 2, seed).unwrap()
    }

    fn tiny_config() -> MultitaskCnnConfig {
        MultitaskCnnConfig::new()
            .with_height(8)
            .with_width(8)
            .with_conv1_channels(2)
            .with_conv2_channels(2)
            .with_pool_size(2)
            .with_hidden_size(4)
    }

    /// A model whose digit head bias is filled with `tag`.
    fn tagged_model(config: &MultitaskCnnConfig, tag: f32) -> MultitaskCnn<TestBackend> {
        let device = Default::default();
        let mut model = config.init::<TestBackend>(&device);
        model.digit_head.bias = Some(Param::from_tensor(Tensor::full(
            [config.num_digits],
            tag,
            &device,
        )));
        model
    }

    fn tag_of(model: &MultitaskCnn<TestBackend>) -> Vec<f32> {
        let bias = model.digit_head.bias.as_ref().unwrap().val();
        bias.into_data().to_vec::<f32>().unwrap()
    }

    fn stored_tag(store: &CheckpointStore, config: &MultitaskCnnConfig, fold: usize) -> Vec<f32> {
        let device = Default::default();
        let model = store
            .load_model(fold, tagged_model(config, -1.0), &device)
            .unwrap();
        tag_of(&model)
    }

    #[test]
    fn best_model_follows_improvements_only() {
        let dir = temp_dir::TempDir::new().unwrap();
        let store = CheckpointStore::create(dir.path()).unwrap();
        let config = tiny_config();
        let tag = |epoch: usize| vec![epoch as f32; config.num_digits];
        let mut best = BestModel::<TestBackend>::new(3);

        assert!(best.offer(1, score(0.5, 1.0), tagged_model(&config, 1.0), &store).unwrap());
        assert_eq!(best.best_epoch(), Some(1));
        assert_eq!(stored_tag(&store, &config, 3), tag(1));

        // better accuracy
        assert!(best.offer(2, score(0.6, 2.0), tagged_model(&config, 2.0), &store).unwrap());
        assert_eq!(best.best_epoch(), Some(2));
        assert_eq!(stored_tag(&store, &config, 3), tag(2));

        // worse accuracy leaves memory and disk alone
        assert!(!best.offer(3, score(0.55, 0.1), tagged_model(&config, 3.0), &store).unwrap());
        assert_eq!(best.best_epoch(), Some(2));
        assert_eq!(stored_tag(&store, &config, 3), tag(2));

        // tie with a lower loss
        assert!(best.offer(4, score(0.6, 1.5), tagged_model(&config, 4.0), &store).unwrap());
        assert_eq!(best.best_epoch(), Some(4));
        assert_eq!(stored_tag(&store, &config, 3), tag(4));

        // tie with an equal loss
        assert!(!best.offer(5, score(0.6, 1.5), tagged_model(&config, 5.0), &store).unwrap());

        let trained = best.into_trained().unwrap();
        assert_eq!(trained.best_epoch, 4);
        assert_eq!(trained.score, score(0.6, 1.5));
        assert_eq!(tag_of(&trained.model), tag(4));
        assert_eq!(trained.checkpoint, store.model_path::<TestBackend>(3));
    }

    #[test]
    fn rejects_a_validation_set_without_full_batch() {
        let dir = temp_dir::TempDir::new().unwrap();
        let store = CheckpointStore::create(dir.path()).unwrap();
        let mut config = ExperimentConfig::with_dirs(dir.path(), dir.path());
        config.model = tiny_config();

        let train = loader(&config.model, 4, 1);
        let valid = loader(&config.model, 1, 2);
        let result =
            train_fold::<TestBackend>(1, &config, &train, &valid, &store, &Default::default());
        assert!(matches!(
            result,
            Err(Error::EmptyValidation {
                fold: 1,
                num_items: 1,
                batch_size: 2,
            })
        ));
        assert!(!store.model_path::<TestBackend>(1).exists());
    }

    #[test]
    fn keeps_and_persists_the_best_epoch() {
        let dir = temp_dir::TempDir::new().unwrap();
        let store = CheckpointStore::create(dir.path()).unwrap();
        let mut config = ExperimentConfig::with_dirs(dir.path(), dir.path());
        config.model = tiny_config();
        config.training.num_epochs = 2;

        let train = loader(&config.model, 6, 1);
        let valid = loader(&config.model, 4, 2);
        let device = Default::default();
        let trained =
            train_fold::<TestBackend>(2, &config, &train, &valid, &store, &device).unwrap();

        assert!((1..=2).contains(&trained.best_epoch));
        assert_eq!(trained.checkpoint, store.model_path::<TestBackend>(2));
        assert!(trained.checkpoint.exists());
        assert!((0.0..=1.0).contains(&trained.score.accuracy));

        // the returned model is the one that was persisted
        let reloaded = store
            .load_model(2, config.model.init::<TestBackend>(&device), &device)
            .unwrap();
        let input = Tensor::<TestBackend, 4>::ones([1, 1, 8, 8], &device);
        let values = |logits: Tensor<TestBackend, 2>| logits.into_data().to_vec::<f32>().unwrap();
        let expected = values(trained.model.forward(input.clone()).0);
        let actual = values(reloaded.forward(input).0);
        assert_eq!(expected.len(), actual.len());
        for (e, a) in expected.iter().zip(&actual) {
            assert!((e - a).abs() < 1e-6);
        }
    }
}
