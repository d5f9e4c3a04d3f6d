//! Persistence of per-fold best models and of the prediction results.
//!
//! Every file is first written under a `partial_` name and then renamed into
//! place, so a reader never observes a half-written checkpoint.

use crate::backend::RecorderTy;
use crate::config::{CONFIG_FILE_NAME, ExperimentConfig};
use crate::error::{Error, Result};
use crate::model::MultitaskCnn;
use burn::prelude::*;
use burn::record::FileRecorder;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const MODEL_NAME: &str = "best_model";
pub const PREDICTIONS_NAME: &str = "predictions.json";
const PARTIAL_PREFIX: &str = "partial_";

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Uses `dir`, creating it if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// Path of the best model of `fold` (1-based), extension included.
    pub fn model_path<B: Backend>(&self, fold: usize) -> PathBuf {
        self.model_stem(fold)
            .with_extension(<RecorderTy as FileRecorder<B>>::file_extension())
    }

    // the recorder appends its extension itself
    fn model_stem(&self, fold: usize) -> PathBuf {
        self.dir.join(format!("{MODEL_NAME}_{fold}"))
    }

    pub fn save_model<B: Backend>(&self, fold: usize, model: &MultitaskCnn<B>) -> Result<PathBuf> {
        let file_ext = <RecorderTy as FileRecorder<B>>::file_extension();
        let partial_stem = self.dir.join(format!("{PARTIAL_PREFIX}{MODEL_NAME}_{fold}"));
        let partial_path = partial_stem.with_extension(file_ext);
        let path = self.model_path::<B>(fold);

        model
            .clone()
            .save_file(partial_stem, &RecorderTy::new())
            .map_err(|reason| Error::Record {
                path: partial_path.clone(),
                reason,
            })?;
        std::fs::rename(&partial_path, &path).map_err(|e| Error::io(&path, e))?;
        log::debug!("Saved model to {path:?}");
        Ok(path)
    }

    /// Loads the best model of `fold` (1-based) into `model`.
    pub fn load_model<B: Backend>(
        &self,
        fold: usize,
        model: MultitaskCnn<B>,
        device: &B::Device,
    ) -> Result<MultitaskCnn<B>> {
        let path = self.model_path::<B>(fold);
        log::debug!("Loading model from {path:?}");
        model
            .load_file(self.model_stem(fold), &RecorderTy::new(), device)
            .map_err(|reason| Error::Record { path, reason })
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.dir.join(PREDICTIONS_NAME)
    }

    pub fn save_predictions(&self, predictions: &impl Serialize) -> Result<PathBuf> {
        let path = self.predictions_path();
        self.write_json(&path, predictions)?;
        Ok(path)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    pub fn save_config(&self, config: &ExperimentConfig) -> Result<PathBuf> {
        let path = self.config_path();
        let partial = self.partial_path(&path);
        config.save_json(&partial)?;
        std::fs::rename(&partial, &path).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    }

    fn write_json(&self, path: &Path, value: &impl Serialize) -> Result<()> {
        let partial = self.partial_path(path);
        let file = File::create(&partial).map_err(|e| Error::io(&partial, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value).map_err(|source| Error::Json {
            path: partial.clone(),
            source,
        })?;
        writer.flush().map_err(|e| Error::io(&partial, e))?;
        std::fs::rename(&partial, path).map_err(|e| Error::io(path, e))
    }

    fn partial_path(&self, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.dir.join(format!("{PARTIAL_PREFIX}{name}"))
    }
}
