use crate::dataset::MultitaskLoader;
use crate::error::{Error, Result};
use crate::metrics;
use crate::model::{LossWeights, MultitaskCnn};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Predicted and true labels of one task, in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPredictions {
    pub predicted: Vec<usize>,
    pub target: Vec<usize>,
}

impl TaskPredictions {
    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    pub fn accuracy(&self) -> f64 {
        metrics::accuracy(&self.predicted, &self.target)
    }

    pub fn confusion_matrix(&self, num_classes: usize) -> Vec<Vec<usize>> {
        metrics::confusion_matrix(&self.predicted, &self.target, num_classes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub accuracy_digit: f64,
    pub accuracy_gender: f64,
    /// Mean combined loss over the evaluated batches.
    pub mean_loss: f64,
    pub num_samples: usize,
    pub digit: TaskPredictions,
    pub gender: TaskPredictions,
}

impl EvaluationResult {
    pub fn new(digit: TaskPredictions, gender: TaskPredictions, mean_loss: f64) -> Self {
        debug_assert_eq!(digit.len(), gender.len());
        Self {
            accuracy_digit: digit.accuracy(),
            accuracy_gender: gender.accuracy(),
            mean_loss,
            num_samples: digit.len(),
            digit,
            gender,
        }
    }
}

/// Runs `model` over every batch of pass `epoch` of `loader`, without updating it.
///
/// `model` is expected on a backend without autodiff (see `AutodiffModule::valid`),
/// which also disables dropout.
pub fn evaluate<B: Backend>(
    model: &MultitaskCnn<B>,
    loader: &MultitaskLoader,
    epoch: usize,
    device: &B::Device,
    weights: LossWeights,
) -> Result<EvaluationResult> {
    let mut digit = TaskPredictions::default();
    let mut gender = TaskPredictions::default();
    let mut loss_sum = 0.0;
    let mut num_batches = 0usize;

    for batch in loader.iter::<B, _>(epoch, device) {
        let output = model.forward_multitask(batch, weights);
        loss_sum += output.loss.into_scalar().elem::<f64>();
        num_batches += 1;

        digit.predicted.extend(int_values(output.digit.output.argmax(1))?);
        digit.target.extend(int_values(output.digit.targets)?);
        gender.predicted.extend(int_values(output.gender.output.argmax(1))?);
        gender.target.extend(int_values(output.gender.targets)?);
    }

    if num_batches == 0 {
        log::warn!(
            "no full batch of size {} among {} samples, nothing was evaluated",
            loader.batch_size(),
            loader.num_items()
        );
        return Ok(EvaluationResult::new(digit, gender, 0.0));
    }

    Ok(EvaluationResult::new(digit, gender, loss_sum / num_batches as f64))
}

fn int_values<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Result<Vec<usize>> {
    let values = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(Error::tensor_data)?;
    Ok(values.into_iter().map(|value| value as usize).collect())
}
