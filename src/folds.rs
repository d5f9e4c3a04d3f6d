//! Deterministic k-fold partitioning of subject folders.
//!
//! Subjects are sorted and cut into `num_folds` contiguous chunks whose sizes
//! differ by at most one. For fold `k`, chunk `k` is the test set, chunk
//! `(k + 1) % num_folds` the validation set, and every other chunk is used for
//! training. Over all folds each subject lands in the test set exactly once.

use crate::error::{Error, Result};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Train, validation and test subjects of a single fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit<T = PathBuf> {
    pub train: Vec<T>,
    pub validation: Vec<T>,
    pub test: Vec<T>,
}

impl<T> FoldSplit<T> {
    pub fn len(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lists the subject folders of `root`, sorted by path.
pub fn subject_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(root).map_err(|e| Error::io(root, e))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(root, e))?;
        let file_type = entry.file_type().map_err(|e| Error::io(entry.path(), e))?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Splits the subject folders found under `root` for fold `fold` (0-based).
pub fn split_fold(root: &Path, fold: usize, num_folds: usize) -> Result<FoldSplit> {
    let subjects = subject_dirs(root)?;
    if subjects.len() < num_folds {
        // fold-count errors take precedence
        check_fold(fold, num_folds)?;
        return Err(Error::NotEnoughSubjects {
            root: root.to_path_buf(),
            found: subjects.len(),
            num_folds,
        });
    }
    split_fold_subjects(&subjects, fold, num_folds)
}

/// Splits an already sorted list of subjects for fold `fold` (0-based).
pub fn split_fold_subjects<T: Clone>(
    subjects: &[T],
    fold: usize,
    num_folds: usize,
) -> Result<FoldSplit<T>> {
    check_fold(fold, num_folds)?;
    if subjects.len() < num_folds {
        return Err(Error::NotEnoughSubjects {
            root: PathBuf::new(),
            found: subjects.len(),
            num_folds,
        });
    }

    let test_chunk = fold;
    let validation_chunk = (fold + 1) % num_folds;

    let mut split = FoldSplit {
        train: Vec::new(),
        validation: Vec::new(),
        test: Vec::new(),
    };
    for chunk in 0..num_folds {
        let members = &subjects[chunk_range(subjects.len(), num_folds, chunk)];
        let target = if chunk == test_chunk {
            &mut split.test
        } else if chunk == validation_chunk {
            &mut split.validation
        } else {
            &mut split.train
        };
        target.extend_from_slice(members);
    }
    debug_assert_eq!(split.len(), subjects.len());
    Ok(split)
}

fn check_fold(fold: usize, num_folds: usize) -> Result<()> {
    if num_folds < 3 {
        return Err(Error::InvalidFoldCount(num_folds));
    }
    if fold >= num_folds {
        return Err(Error::FoldOutOfRange { fold, num_folds });
    }
    Ok(())
}

/// Index range of `chunk` when `len` items are cut into `num_chunks` chunks.
///
/// The first `len % num_chunks` chunks hold one extra item.
fn chunk_range(len: usize, num_chunks: usize, chunk: usize) -> Range<usize> {
    let base = len / num_chunks;
    let extra = len % num_chunks;
    let start = chunk * base + chunk.min(extra);
    let size = base + usize::from(chunk < extra);
    start..start + size
}
