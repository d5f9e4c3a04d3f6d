use crate::backend::Element;
use crate::error::{Error, Result};
use crate::loader::BatchLoader;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::{Dataset, InMemDataset};
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Shuffled, drop-last loader over multitask samples.
pub type MultitaskLoader = BatchLoader<MultitaskItem, MultitaskDataset, MultitaskBatcher>;

/// Extension of the per-sample files inside a subject folder.
pub const SAMPLE_EXTENSION: &str = "json";

/// One sample: a single-channel feature map with its two labels.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct MultitaskItem {
    /// Feature map as a flat row-major array.
    ///
    /// # Shape
    /// [height * width]
    pub features: Vec<Element>,

    /// Spoken digit, in between 0 and `num_digits - 1`.
    pub digit: u8,

    /// Speaker gender, in between 0 and `num_genders - 1`.
    pub gender: u8,
}

/// Expected shape and label ranges of the samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLayout {
    pub height: usize,
    pub width: usize,
    pub num_digits: usize,
    pub num_genders: usize,
}

impl SampleLayout {
    pub fn num_features(&self) -> usize {
        self.height * self.width
    }

    fn check(&self, item: &MultitaskItem, path: &Path) -> Result<()> {
        if item.features.len() != self.num_features() {
            return Err(Error::SampleShape {
                path: path.to_path_buf(),
                expected: self.num_features(),
                found: item.features.len(),
            });
        }
        for (task, label, num_classes) in [
            ("digit", item.digit, self.num_digits),
            ("gender", item.gender, self.num_genders),
        ] {
            if usize::from(label) >= num_classes {
                return Err(Error::InvalidLabel {
                    path: path.to_path_buf(),
                    task,
                    label,
                    num_classes,
                });
            }
        }
        Ok(())
    }
}

/// All samples of a set of subject folders, held in memory.
pub struct MultitaskDataset {
    dataset: InMemDataset<MultitaskItem>,
}

impl Dataset<MultitaskItem> for MultitaskDataset {
    fn get(&self, index: usize) -> Option<MultitaskItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MultitaskDataset {
    /// Loads every sample file of the given subject folders.
    ///
    /// Subjects keep the given order, samples within a subject are sorted by path.
    pub fn from_subject_dirs(subject_dirs: &[PathBuf], layout: SampleLayout) -> Result<Self> {
        let mut items = Vec::new();
        for dir in subject_dirs {
            for path in sample_files(dir)? {
                let item = read_sample(&path)?;
                layout.check(&item, &path)?;
                items.push(item);
            }
        }
        Ok(Self::from_items(items))
    }

    pub fn from_items(items: Vec<MultitaskItem>) -> Self {
        Self {
            dataset: InMemDataset::new(items),
        }
    }
}

fn sample_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == SAMPLE_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Reads a single sample file.
pub fn read_sample(path: &Path) -> Result<MultitaskItem> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| Error::Sample {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes a single sample file.
pub fn write_sample(path: &Path, item: &MultitaskItem) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    serde_json::to_writer(std::io::BufWriter::new(file), item).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Clone, Debug)]
pub struct MultitaskBatcher {
    pub height: usize,
    pub width: usize,
}

impl MultitaskBatcher {
    pub fn new(layout: SampleLayout) -> Self {
        Self {
            height: layout.height,
            width: layout.width,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MultitaskBatch<B: Backend> {
    /// # Shape
    /// [batch_size, 1, height, width]
    pub inputs: Tensor<B, 4>,
    /// # Shape
    /// [batch_size]
    pub digits: Tensor<B, 1, Int>,
    /// # Shape
    /// [batch_size]
    pub genders: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MultitaskItem, MultitaskBatch<B>> for MultitaskBatcher {
    fn batch(&self, items: Vec<MultitaskItem>, device: &B::Device) -> MultitaskBatch<B> {
        let batch_size = items.len();
        let mut features = Vec::with_capacity(batch_size * self.height * self.width);
        let mut digits = Vec::with_capacity(batch_size);
        let mut genders = Vec::with_capacity(batch_size);
        for item in items {
            debug_assert_eq!(item.features.len(), self.height * self.width);
            features.extend(item.features);
            digits.push(item.digit as i64);
            genders.push(item.gender as i64);
        }

        let inputs = TensorData::new(features, [batch_size, 1, self.height, self.width])
            .convert::<B::FloatElem>();
        let digits = TensorData::new(digits, [batch_size]).convert::<B::IntElem>();
        let genders = TensorData::new(genders, [batch_size]).convert::<B::IntElem>();

        MultitaskBatch {
            inputs: Tensor::from_data(inputs, device),
            digits: Tensor::from_data(digits, device),
            genders: Tensor::from_data(genders, device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn layout() -> SampleLayout {
        SampleLayout {
            height: 2,
            width: 3,
            num_digits: 10,
            num_genders: 2,
        }
    }

    fn item(digit: u8, gender: u8) -> MultitaskItem {
        MultitaskItem {
            features: (0..6).map(|v| v as f32 + digit as f32).collect(),
            digit,
            gender,
        }
    }

    #[test]
    fn loads_subjects_in_order_and_skips_other_files() {
        let root = temp_dir::TempDir::new().unwrap();
        let s1 = root.path().join("s1");
        let s2 = root.path().join("s2");
        std::fs::create_dir(&s1).unwrap();
        std::fs::create_dir(&s2).unwrap();
        write_sample(&s1.join("b.json"), &item(2, 0)).unwrap();
        write_sample(&s1.join("a.json"), &item(1, 0)).unwrap();
        write_sample(&s2.join("a.json"), &item(7, 1)).unwrap();
        std::fs::write(s2.join("notes.txt"), b"ignored").unwrap();

        // s2 first: subject order is preserved
        let dataset = MultitaskDataset::from_subject_dirs(&[s2, s1], layout()).unwrap();
        assert_eq!(dataset.len(), 3);
        let digits: Vec<u8> = dataset.iter().map(|item| item.digit).collect();
        assert_eq!(digits, vec![7, 1, 2]);
        assert_eq!(dataset.get(0), Some(item(7, 1)));
        assert_eq!(dataset.get(3), None);
    }

    #[test]
    fn rejects_malformed_samples() {
        let root = temp_dir::TempDir::new().unwrap();
        let dir = root.path().join("s");
        std::fs::create_dir(&dir).unwrap();

        let mut short = item(1, 1);
        short.features.pop();
        write_sample(&dir.join("short.json"), &short).unwrap();
        let result = MultitaskDataset::from_subject_dirs(&[dir.clone()], layout());
        assert!(matches!(
            result,
            Err(Error::SampleShape { expected: 6, found: 5, .. })
        ));
        std::fs::remove_file(dir.join("short.json")).unwrap();

        write_sample(&dir.join("label.json"), &item(1, 2)).unwrap();
        let result = MultitaskDataset::from_subject_dirs(&[dir.clone()], layout());
        assert!(matches!(
            result,
            Err(Error::InvalidLabel { task: "gender", label: 2, .. })
        ));
        std::fs::remove_file(dir.join("label.json")).unwrap();

        std::fs::write(dir.join("broken.json"), b"{ not json").unwrap();
        let result = MultitaskDataset::from_subject_dirs(&[dir], layout());
        assert!(matches!(result, Err(Error::Sample { .. })));
    }

    #[test]
    fn batches_items_into_tensors() {
        let device = Default::default();
        let batcher = MultitaskBatcher::new(layout());
        let batch: MultitaskBatch<TestBackend> =
            batcher.batch(vec![item(3, 0), item(4, 1)], &device);

        assert_eq!(batch.inputs.dims(), [2, 1, 2, 3]);
        assert_eq!(batch.digits.dims(), [2]);
        assert_eq!(batch.genders.dims(), [2]);

        let digits = batch.digits.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        let genders = batch.genders.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(digits, vec![3, 4]);
        assert_eq!(genders, vec![0, 1]);

        let inputs = batch.inputs.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert_eq!(inputs[..6], [3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(inputs[6..], [4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }
}
