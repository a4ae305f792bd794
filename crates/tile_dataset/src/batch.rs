//! Batch iteration over a container split.
//!
//! Batches are contiguous row windows; shuffling reorders the windows, never
//! the rows inside one (Keras `shuffle='batch'` semantics).

use crate::dataset::{one_hot, TileDataset};
use crate::types::{DatasetResult, Split};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::ops::Range;

pub struct TileBatch<B: Backend> {
    /// Tiles in NCHW layout, values in [0, 1].
    pub images: Tensor<B, 4>,
    /// One-hot labels, shape [batch, num_classes].
    pub targets: Tensor<B, 2>,
}

/// Contiguous row windows of `batch_size` over `rows`, optionally with the
/// window order shuffled.
pub fn batch_windows(
    rows: usize,
    batch_size: usize,
    shuffle: bool,
    seed: Option<u64>,
) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    let mut windows: Vec<Range<usize>> = (0..rows)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(rows))
        .collect();
    if shuffle {
        let mut rng = match seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
        };
        windows.shuffle(&mut rng);
    }
    windows
}

pub struct BatchIter {
    split: Split,
    windows: Vec<Range<usize>>,
    cursor: usize,
}

impl BatchIter {
    pub fn new(
        dataset: &TileDataset,
        split: Split,
        batch_size: usize,
        shuffle: bool,
        seed: Option<u64>,
    ) -> Self {
        let windows = batch_windows(dataset.rows(split), batch_size, shuffle, seed);
        Self {
            split,
            windows,
            cursor: 0,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.windows.len()
    }

    /// Load the next window from disk and assemble tensors on `device`.
    /// Returns `None` once the epoch is exhausted.
    pub fn next_batch<B: Backend>(
        &mut self,
        dataset: &TileDataset,
        device: &B::Device,
    ) -> DatasetResult<Option<TileBatch<B>>> {
        let Some(window) = self.windows.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(load_batch(dataset, self.split, window, device)?))
    }
}

/// Read rows `window` of a split and build the NCHW image tensor plus one-hot
/// targets.
pub fn load_batch<B: Backend>(
    dataset: &TileDataset,
    split: Split,
    window: Range<usize>,
    device: &B::Device,
) -> DatasetResult<TileBatch<B>> {
    let [height, width, channels] = dataset.tile_shape();
    let batch = window.len();

    let mut hwc = Vec::with_capacity(batch * height * width * channels);
    dataset.container().read_rows_f32(
        split.image_array(),
        window.start,
        window.end,
        &mut hwc,
    )?;

    // Containers store HWC rows; burn convolutions take NCHW.
    let mut chw = vec![0.0f32; hwc.len()];
    let pixels = height * width;
    for b in 0..batch {
        let src = &hwc[b * pixels * channels..(b + 1) * pixels * channels];
        let dst = &mut chw[b * pixels * channels..(b + 1) * pixels * channels];
        for p in 0..pixels {
            for c in 0..channels {
                dst[c * pixels + p] = src[p * channels + c];
            }
        }
    }

    let labels = &dataset.labels(split)[window.start..window.end];
    let num_classes = dataset.num_classes();
    let targets_buf = one_hot(labels, num_classes);

    let images = Tensor::<B, 1>::from_floats(chw.as_slice(), device)
        .reshape([batch, channels, height, width]);
    let targets = Tensor::<B, 1>::from_floats(targets_buf.as_slice(), device)
        .reshape([batch, num_classes]);

    Ok(TileBatch { images, targets })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_cover_all_rows_in_order_when_unshuffled() {
        let windows = batch_windows(10, 4, false, None);
        assert_eq!(windows, vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn shuffle_reorders_windows_not_rows() {
        let windows = batch_windows(64, 8, true, Some(7));
        assert_eq!(windows.len(), 8);
        // Every window is still a contiguous, aligned range.
        let mut starts: Vec<usize> = windows.iter().map(|w| w.start).collect();
        for w in &windows {
            assert_eq!(w.end - w.start, 8);
            assert_eq!(w.start % 8, 0);
        }
        starts.sort_unstable();
        assert_eq!(starts, (0..8).map(|i| i * 8).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_is_deterministic_for_a_seed() {
        let a = batch_windows(100, 16, true, Some(42));
        let b = batch_windows(100, 16, true, Some(42));
        assert_eq!(a, b);
    }

    #[test]
    fn zero_rows_yields_no_windows() {
        assert!(batch_windows(0, 8, true, Some(1)).is_empty());
    }
}
