use crate::backend::DeviceKind;
use crate::config::{CONFIG_FILE_NAME, ExperimentConfig};
use crate::error::Result;
use std::ffi::OsString;
use std::path::PathBuf;

pub const DEFAULT_DATA_DIR: &str = "Data/Processed";
pub const DEFAULT_MODEL_DIR: &str = "models";

pub const HELP: &str = "\
Multitask CNN cross-validation

Trains a digit + gender classifier with k-fold cross-validation over subject folders.
Each fold keeps its best model (by validation accuracy) and all test predictions are
written to predictions.json in the model directory.

USAGE:
    multitask-cv [OPTIONS]

BEHAVIOR OVERVIEW
- The experiment config is loaded from --config if given, otherwise from
  <model-dir>/experiment_config.json if present, otherwise defaults are used.
- Options below override the loaded config, and the resolved config is saved to
  <model-dir>/experiment_config.json before training starts.
- The data directory holds one folder per subject, each with one JSON file per sample.
- Logging is controlled by RUST_LOG (default: info).

FLAGS:
    -h, --help                  Show this help message and exit

OPTIONS:
    -c, --config <PATH>         Load the experiment config from this file
    -d, --data-dir <PATH>       Directory with the subject folders [default: Data/Processed]
    -m, --model-dir <PATH>      Directory receiving the best models and predictions [default: models]
    -k, --folds <N>             Number of folds (at least 3)
    -b, --batch-size <N>        Batch size
    -e, --epochs <N>            Number of training epochs per fold
        --device <DEVICE>       cpu, cuda, cuda:<index> or mps
";

#[derive(Debug, Default)]
pub struct AppArgs {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub num_folds: Option<usize>,
    pub batch_size: Option<usize>,
    pub num_epochs: Option<usize>,
    pub device: Option<DeviceKind>,
}

impl AppArgs {
    pub fn parse() -> std::result::Result<Self, pico_args::Error> {
        let mut pargs = pico_args::Arguments::from_env();

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            println!("{}", HELP);
            std::process::exit(0);
        }

        Self::from_arguments(pargs)
    }

    pub fn from_vec(args: Vec<OsString>) -> std::result::Result<Self, pico_args::Error> {
        Self::from_arguments(pico_args::Arguments::from_vec(args))
    }

    fn from_arguments(
        mut pargs: pico_args::Arguments,
    ) -> std::result::Result<Self, pico_args::Error> {
        let args = AppArgs {
            config: pargs.opt_value_from_os_str(["-c", "--config"], parse_path)?,
            data_dir: pargs.opt_value_from_os_str(["-d", "--data-dir"], parse_path)?,
            model_dir: pargs.opt_value_from_os_str(["-m", "--model-dir"], parse_path)?,
            num_folds: pargs.opt_value_from_str(["-k", "--folds"])?,
            batch_size: pargs.opt_value_from_str(["-b", "--batch-size"])?,
            num_epochs: pargs.opt_value_from_str(["-e", "--epochs"])?,
            device: pargs.opt_value_from_str("--device")?,
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            return Err(pico_args::Error::ArgumentParsingFailed {
                cause: format!("unused arguments: {remaining:?}"),
            });
        }

        Ok(args)
    }

    fn model_dir(&self) -> PathBuf {
        self.model_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR))
    }

    /// Loads the experiment config and applies the command-line overrides.
    pub fn resolve_config(&self) -> Result<ExperimentConfig> {
        let stored = self.model_dir().join(CONFIG_FILE_NAME);
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::load_json(path)?,
            None if stored.is_file() => ExperimentConfig::load_json(&stored)?,
            None => ExperimentConfig::with_dirs(DEFAULT_DATA_DIR, self.model_dir()),
        };

        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(model_dir) = &self.model_dir {
            config.best_model_path = model_dir.clone();
        }
        if let Some(num_folds) = self.num_folds {
            config.num_folds = num_folds;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(num_epochs) = self.num_epochs {
            config.training.num_epochs = num_epochs;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        Ok(config)
    }
}

fn parse_path(s: &std::ffi::OsStr) -> std::result::Result<PathBuf, &'static str> {
    Ok(s.into())
}
