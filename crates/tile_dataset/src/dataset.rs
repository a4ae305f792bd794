//! Train/validation views over a tile container.

use crate::container::TileContainer;
use crate::types::{DatasetResult, Split, TileDatasetError};
use std::path::Path;

/// Fraction of a `--tiles` subset assigned to the training split.
pub const TRAIN_FRACTION: f64 = 0.8;
/// Fraction of a `--tiles` subset assigned to the validation split.
pub const VAL_FRACTION: f64 = 0.2;

/// Prefix lengths for a requested subset of N tiles: floor(0.8 N) training
/// rows and floor(0.2 N) validation rows. Deterministic, no shuffling.
pub fn subset_lengths(tiles: usize) -> (usize, usize) {
    let train = (tiles as f64 * TRAIN_FRACTION) as usize;
    let val = (tiles as f64 * VAL_FRACTION) as usize;
    (train, val)
}

/// A container opened for training: resolved split lengths, cached labels,
/// and the one-hot class width. Images stay on disk until batched.
#[derive(Debug)]
pub struct TileDataset {
    container: TileContainer,
    train_rows: usize,
    val_rows: usize,
    train_labels: Vec<i64>,
    val_labels: Vec<i64>,
    num_classes: usize,
    /// [height, width, channels] of a single tile.
    tile_shape: [usize; 3],
}

impl TileDataset {
    /// Open `path` and resolve the four named arrays. `tiles` truncates both
    /// splits to a deterministic prefix; `classes` pins the one-hot width
    /// instead of inferring it from the loaded slice.
    pub fn load(
        path: &Path,
        tiles: Option<usize>,
        classes: Option<usize>,
    ) -> DatasetResult<Self> {
        let container = TileContainer::open(path)?;

        let train_meta = container.array(Split::Train.image_array())?;
        let val_meta = container.array(Split::Val.image_array())?;
        container.array(Split::Train.label_array())?;
        container.array(Split::Val.label_array())?;

        let shape = train_meta.shape.clone();
        if shape.len() != 4 {
            return Err(TileDatasetError::Other(format!(
                "{} must be [rows, height, width, channels], got {:?}",
                Split::Train.image_array(),
                shape
            )));
        }
        let tile_shape = [shape[1], shape[2], shape[3]];

        let (train_rows, val_rows) = match tiles {
            Some(n) => {
                let (train, val) = subset_lengths(n);
                if train > train_meta.rows() {
                    return Err(TileDatasetError::SubsetOutOfRange {
                        name: Split::Train.image_array().to_string(),
                        requested: train,
                        available: train_meta.rows(),
                    });
                }
                if val > val_meta.rows() {
                    return Err(TileDatasetError::SubsetOutOfRange {
                        name: Split::Val.image_array().to_string(),
                        requested: val,
                        available: val_meta.rows(),
                    });
                }
                (train, val)
            }
            None => (train_meta.rows(), val_meta.rows()),
        };

        let train_labels = container.read_labels(Split::Train.label_array(), 0, train_rows)?;
        let val_labels = container.read_labels(Split::Val.label_array(), 0, val_rows)?;

        // Negative labels are invalid under either class-width policy.
        for &l in train_labels.iter().chain(val_labels.iter()) {
            if l < 0 {
                return Err(TileDatasetError::LabelOutOfRange {
                    label: l,
                    classes: classes.unwrap_or(0),
                });
            }
        }

        let num_classes = match classes {
            Some(c) => {
                for &l in train_labels.iter().chain(val_labels.iter()) {
                    if l as usize >= c {
                        return Err(TileDatasetError::LabelOutOfRange {
                            label: l,
                            classes: c,
                        });
                    }
                }
                c
            }
            None => {
                // Inferred width: observed max index + 1, computed per split
                // exactly as the original did. Widths must agree.
                let train_width = observed_classes(&train_labels);
                let val_width = observed_classes(&val_labels);
                if train_width != val_width {
                    return Err(TileDatasetError::ClassMismatch {
                        train: train_width,
                        val: val_width,
                    });
                }
                train_width
            }
        };

        Ok(Self {
            container,
            train_rows,
            val_rows,
            train_labels,
            val_labels,
            num_classes,
            tile_shape,
        })
    }

    pub fn container(&self) -> &TileContainer {
        &self.container
    }

    pub fn rows(&self, split: Split) -> usize {
        match split {
            Split::Train => self.train_rows,
            Split::Val => self.val_rows,
        }
    }

    pub fn labels(&self, split: Split) -> &[i64] {
        match split {
            Split::Train => &self.train_labels,
            Split::Val => &self.val_labels,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// [height, width, channels] of a single tile.
    pub fn tile_shape(&self) -> [usize; 3] {
        self.tile_shape
    }
}

fn observed_classes(labels: &[i64]) -> usize {
    labels
        .iter()
        .copied()
        .max()
        .map(|m| m as usize + 1)
        .unwrap_or(0)
}

/// One-hot encode integer class indices into row-major [labels.len(), width].
pub fn one_hot(labels: &[i64], width: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; labels.len() * width];
    for (i, &label) in labels.iter().enumerate() {
        if label >= 0 && (label as usize) < width {
            out[i * width + label as usize] = 1.0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subset_lengths_floor() {
        assert_eq!(subset_lengths(20), (16, 4));
        assert_eq!(subset_lengths(1), (0, 0));
        assert_eq!(subset_lengths(5), (4, 1));
        assert_eq!(subset_lengths(7), (5, 1));
        assert_eq!(subset_lengths(100), (80, 20));
    }

    #[test]
    fn one_hot_sets_single_position() {
        let encoded = one_hot(&[0, 1, 1, 0], 2);
        assert_eq!(
            encoded,
            vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0]
        );
    }

    #[test]
    fn one_hot_skips_out_of_range_labels() {
        let encoded = one_hot(&[-1, 2, 1], 2);
        assert_eq!(encoded, vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn observed_classes_is_max_plus_one() {
        assert_eq!(observed_classes(&[0, 0, 1]), 2);
        assert_eq!(observed_classes(&[0]), 1);
        assert_eq!(observed_classes(&[]), 0);
    }
}
