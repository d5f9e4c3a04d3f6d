//! Shuffled, drop-last batching over a [`Dataset`].
//!
//! Every pass draws a fresh permutation from a seed derived from the loader
//! seed and the pass number, so a pass can be replayed exactly. A trailing
//! batch smaller than the batch size is never produced.
//!
//! Loaders sharing a base seed stay independent when each one is given its
//! own stream through [`stream_seed`].

use crate::error::{Error, Result};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::marker::PhantomData;
use std::sync::Arc;

/// Seed of stream `stream` of `seed`.
///
/// Streams occupy the upper 32 bits, so the passes of two streams never
/// share a seed unless a loader runs more than 2^32 passes.
pub fn stream_seed(seed: u64, stream: u32) -> u64 {
    seed ^ (u64::from(stream) << 32)
}

fn pass_seed(seed: u64, epoch: usize) -> u64 {
    seed.wrapping_add(epoch as u64)
}

pub struct BatchLoader<I, D, Bt> {
    dataset: Arc<D>,
    batcher: Bt,
    batch_size: usize,
    shuffle: Option<u64>,
    _item: PhantomData<fn() -> I>,
}

impl<I, D, Bt> BatchLoader<I, D, Bt>
where
    D: Dataset<I>,
{
    /// Creates a loader that shuffles every pass, seeded with `seed`.
    pub fn new(dataset: Arc<D>, batcher: Bt, batch_size: usize, seed: u64) -> Result<Self> {
        Self::build(dataset, batcher, batch_size, Some(seed))
    }

    /// Creates a loader that keeps the dataset order.
    pub fn sequential(dataset: Arc<D>, batcher: Bt, batch_size: usize) -> Result<Self> {
        Self::build(dataset, batcher, batch_size, None)
    }

    fn build(
        dataset: Arc<D>,
        batcher: Bt,
        batch_size: usize,
        shuffle: Option<u64>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidBatchSize);
        }
        Ok(Self {
            dataset,
            batcher,
            batch_size,
            shuffle,
            _item: PhantomData,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of samples in the underlying dataset.
    pub fn num_items(&self) -> usize {
        self.dataset.len()
    }

    /// Number of full batches produced by every pass.
    pub fn num_batches(&self) -> usize {
        self.dataset.len() / self.batch_size
    }

    /// Dataset indices of every batch of pass `epoch`.
    pub fn batch_indices(&self, epoch: usize) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(seed) = self.shuffle {
            let mut rng = StdRng::seed_from_u64(pass_seed(seed, epoch));
            indices.shuffle(&mut rng);
        }
        indices
            .chunks_exact(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }

    /// Lazily yields the batches of pass `epoch` on `device`.
    pub fn iter<B, O>(&self, epoch: usize, device: &B::Device) -> impl Iterator<Item = O>
    where
        B: Backend,
        Bt: Batcher<B, I, O>,
    {
        self.batch_indices(epoch).into_iter().map(move |indices| {
            let items = indices
                .into_iter()
                .filter_map(|index| self.dataset.get(index))
                .collect();
            self.batcher.batch(items, device)
        })
    }
}
