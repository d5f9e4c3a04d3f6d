use crate::backend::DeviceKind;
use crate::error::Error;
use crate::model::{LossWeights, MultitaskCnnConfig};
use burn::optim::AdamWConfig;
use burn::prelude::*;
use std::path::{Path, PathBuf};

/// Name of the resolved experiment configuration inside the model directory.
pub const CONFIG_FILE_NAME: &str = "experiment_config.json";

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub optimizer: AdamWConfig,
    #[config(default = 20)]
    pub num_epochs: usize,
    #[config(default = 1e-3)]
    pub lr: f64,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1.0)]
    pub digit_loss_weight: f64,
    #[config(default = 1.0)]
    pub gender_loss_weight: f64,
    /// Number of training batches between two progress lines.
    #[config(default = 10)]
    pub log_interval: usize,
}

impl TrainingConfig {
    pub fn loss_weights(&self) -> LossWeights {
        LossWeights {
            digit: self.digit_loss_weight,
            gender: self.gender_loss_weight,
        }
    }
}

/// Everything a cross-validation run needs, passed explicitly to each stage.
#[derive(Config, Debug)]
pub struct ExperimentConfig {
    /// Parent directory of the subject folders.
    pub data_dir: PathBuf,
    /// Directory receiving the per-fold best models and the prediction results.
    pub best_model_path: PathBuf,
    pub model: MultitaskCnnConfig,
    pub training: TrainingConfig,
    #[config(default = "DeviceKind::Cpu")]
    pub device: DeviceKind,
    #[config(default = 6)]
    pub num_folds: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    /// Evaluate the test set with the checkpoint read back from disk
    /// instead of the in-memory best model.
    #[config(default = false)]
    pub reload_checkpoint: bool,
}

impl ExperimentConfig {
    /// Default model and training settings for the given directories.
    pub fn with_dirs(data_dir: impl Into<PathBuf>, best_model_path: impl Into<PathBuf>) -> Self {
        Self::new(
            data_dir.into(),
            best_model_path.into(),
            MultitaskCnnConfig::new(),
            TrainingConfig::new(AdamWConfig::new()),
        )
    }

    pub fn load_json(path: &Path) -> crate::error::Result<Self> {
        log::info!("Loading experiment config from {path:?}");
        Self::load(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: format!("{e:?}"),
        })
    }

    pub fn save_json(&self, path: &Path) -> crate::error::Result<()> {
        log::info!("Saving experiment config into {path:?}");
        self.save(path).map_err(|e| Error::io(path, e))
    }

    /// Rejects settings that would make a run meaningless before any work starts.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.num_folds < 3 {
            return Err(Error::InvalidFoldCount(self.num_folds));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidBatchSize);
        }
        if self.training.num_epochs == 0 {
            return Err(Error::InvalidConfig(
                "training.num_epochs must be at least 1".to_string(),
            ));
        }
        let model = &self.model;
        if model.height < 4 || model.width < 4 {
            return Err(Error::InvalidConfig(format!(
                "input of {}x{} is too small for two 2x2 poolings",
                model.height, model.width
            )));
        }
        for (name, value) in [
            ("model.conv1_channels", model.conv1_channels),
            ("model.conv2_channels", model.conv2_channels),
            ("model.pool_size", model.pool_size),
            ("model.hidden_size", model.hidden_size),
            ("model.num_digits", model.num_digits),
            ("model.num_genders", model.num_genders),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be at least 1")));
            }
        }
        // labels are stored as u8
        if model.num_digits > 256 || model.num_genders > 256 {
            return Err(Error::InvalidConfig(
                "class counts above 256 cannot be labelled".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&model.dropout) {
            return Err(Error::InvalidConfig(format!(
                "model.dropout must be in [0, 1), got {}",
                model.dropout
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_experiment_settings() {
        let config = ExperimentConfig::with_dirs("Data/Processed", "models");
        assert_eq!(config.num_folds, 6);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.device, DeviceKind::Cpu);
        assert!(!config.reload_checkpoint);
        assert_eq!(config.training.loss_weights(), LossWeights::default());
        config.validate().unwrap();
    }

    #[test]
    fn saves_and_loads_json() {
        let dir = temp_dir::TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = ExperimentConfig::with_dirs("data", "models")
            .with_device(DeviceKind::Cuda(1))
            .with_num_folds(4)
            .with_batch_size(8);
        config.save_json(&path).unwrap();
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains(r#""cuda:1""#));

        let loaded = ExperimentConfig::load_json(&path).unwrap();
        assert_eq!(loaded.device, DeviceKind::Cuda(1));
        assert_eq!(loaded.num_folds, 4);
        assert_eq!(loaded.batch_size, 8);
        assert_eq!(loaded.data_dir, PathBuf::from("data"));
        assert_eq!(loaded.model.num_digits, 10);

        assert!(matches!(
            ExperimentConfig::load_json(&dir.path().join("missing.json")),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn rejects_unusable_settings() {
        let base = || ExperimentConfig::with_dirs("data", "models");
        assert!(matches!(
            base().with_num_folds(2).validate(),
            Err(Error::InvalidFoldCount(2))
        ));
        assert!(matches!(
            base().with_batch_size(0).validate(),
            Err(Error::InvalidBatchSize)
        ));
        let mut config = base();
        config.training.num_epochs = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_unbuildable_models() {
        let with_model = |edit: fn(MultitaskCnnConfig) -> MultitaskCnnConfig| {
            let mut config = ExperimentConfig::with_dirs("data", "models");
            config.model = edit(config.model);
            config.validate()
        };
        let broken: [fn(MultitaskCnnConfig) -> MultitaskCnnConfig; 10] = [
            |m| m.with_dropout(-0.1),
            |m| m.with_dropout(1.0),
            |m| m.with_dropout(f64::NAN),
            |m| m.with_pool_size(0),
            |m| m.with_hidden_size(0),
            |m| m.with_conv1_channels(0),
            |m| m.with_conv2_channels(0),
            |m| m.with_num_digits(0),
            |m| m.with_num_genders(0),
            |m| m.with_height(3),
        ];
        for edit in broken {
            assert!(matches!(with_model(edit), Err(Error::InvalidConfig(_))));
        }
        with_model(|m| m.with_dropout(0.0)).unwrap();
        with_model(|m| m.with_num_genders(1)).unwrap();
    }
}
