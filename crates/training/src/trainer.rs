//! Two-phase fit loops over a tile container.
//!
//! A fresh model moves through `FRESH -> HEAD_TRAINED -> FINE_TUNED`: one
//! epoch with the backbone prefix frozen, an intermediate checkpoint, then
//! the remaining epochs with every layer trainable and best-validation
//! checkpointing. A resumed model skips straight to the fine-tuning loop.

use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use models::{ClassifierPhase, TileClassifier, TileClassifierConfig};
use std::path::{Path, PathBuf};
use tile_dataset::{BatchIter, Split, TileDataset};

use crate::history::TrainingHistory;
use crate::TrainBackend;

pub type ADBackend = Autodiff<TrainBackend>;

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub batch_size: usize,
    pub lr: f64,
    /// Batch-order shuffle seed; `None` draws from the thread rng.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EpochStats {
    pub loss: f32,
    pub accuracy: f32,
}

/// Effective fine-tuning epoch count: a fresh model spends one of the
/// requested epochs on the head-only phase, a resumed model does not.
pub fn fine_tune_epochs(resumed: bool, epochs: usize) -> usize {
    if resumed {
        epochs
    } else {
        epochs.saturating_sub(1).max(1)
    }
}

/// Mean categorical cross-entropy between logits and one-hot targets.
pub fn categorical_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (-(targets * log_probs)).sum_dim(1).mean()
}

fn correct_count<B: Backend>(logits: &Tensor<B, 2>, targets: &Tensor<B, 2>) -> usize {
    let preds: Vec<i64> = logits
        .clone()
        .argmax(1)
        .into_data()
        .to_vec()
        .unwrap_or_default();
    let truth: Vec<i64> = targets
        .clone()
        .argmax(1)
        .into_data()
        .to_vec()
        .unwrap_or_default();
    preds.iter().zip(truth.iter()).filter(|(p, t)| p == t).count()
}

fn scalar<B: Backend>(value: Tensor<B, 1>) -> f32 {
    value
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or(0.0)
}

/// Writes the best-by-validation-accuracy checkpoint, never replacing it with
/// a worse epoch.
pub struct CheckpointMonitor {
    path: PathBuf,
    best: Option<f32>,
}

impl CheckpointMonitor {
    pub fn new(path: PathBuf) -> Self {
        Self { path, best: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn best(&self) -> Option<f32> {
        self.best
    }

    /// Record an epoch's validation accuracy; returns whether it improved on
    /// the best seen so far (first observation always improves).
    pub fn observe(&mut self, val_accuracy: f32) -> bool {
        match self.best {
            Some(best) if val_accuracy <= best => false,
            _ => {
                self.best = Some(val_accuracy);
                true
            }
        }
    }

    fn observe_and_save(
        &mut self,
        model: &TileClassifier<ADBackend>,
        val_accuracy: f32,
    ) -> anyhow::Result<bool> {
        let previous = self.best;
        if !self.observe(val_accuracy) {
            println!(
                "val_acc did not improve from {:.4}",
                previous.unwrap_or(0.0)
            );
            return Ok(false);
        }
        match previous {
            Some(prev) => println!(
                "val_acc improved from {prev:.4} to {val_accuracy:.4}, saving model to {}",
                self.path.display()
            ),
            None => println!(
                "val_acc {val_accuracy:.4}, saving model to {}",
                self.path.display()
            ),
        }
        save_classifier(model, &self.path)?;
        Ok(true)
    }
}

pub fn save_classifier<B: Backend>(
    model: &TileClassifier<B>,
    path: &Path,
) -> anyhow::Result<()> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save checkpoint {}: {e}", path.display()))?;
    Ok(())
}

pub fn load_classifier<B: Backend, P: AsRef<Path>>(
    path: P,
    cfg: &TileClassifierConfig,
    device: &B::Device,
) -> Result<TileClassifier<B>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    TileClassifier::<B>::new(cfg, device).load_file(path.as_ref(), &recorder, device)
}

pub fn load_backbone<B: Backend, P: AsRef<Path>>(
    path: P,
    cfg: &TileClassifierConfig,
    device: &B::Device,
) -> Result<models::Backbone<B>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    models::Backbone::<B>::new(cfg, device).load_file(path.as_ref(), &recorder, device)
}

/// One optimization pass over the training split. Batch windows are shuffled;
/// rows within a window keep their on-disk order.
fn train_epoch(
    mut model: TileClassifier<ADBackend>,
    dataset: &TileDataset,
    opts: &TrainOptions,
    phase: ClassifierPhase,
    device: &<ADBackend as Backend>::Device,
    seed: Option<u64>,
) -> anyhow::Result<(TileClassifier<ADBackend>, EpochStats)> {
    let mut optim = SgdConfig::new().init();
    let mut iter = BatchIter::new(dataset, Split::Train, opts.batch_size, true, seed);
    let mut total_loss = 0.0f32;
    let mut total_correct = 0usize;
    let mut total = 0usize;

    while let Some(batch) = iter.next_batch::<ADBackend>(dataset, device)? {
        let batch_len = batch.images.dims()[0];
        let logits = model.forward(batch.images, phase);
        let loss = categorical_cross_entropy(logits.clone(), batch.targets.clone());
        let loss_detached = loss.clone().detach();
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(opts.lr, model, grads);

        total_loss += scalar(loss_detached) * batch_len as f32;
        total_correct += correct_count(&logits.detach(), &batch.targets);
        total += batch_len;
    }

    let stats = EpochStats {
        loss: total_loss / total.max(1) as f32,
        accuracy: total_correct as f32 / total.max(1) as f32,
    };
    Ok((model, stats))
}

/// Loss/accuracy over the validation split, dropout disabled. Runs on the
/// same device as the training loop.
fn validate(
    model: &TileClassifier<ADBackend>,
    dataset: &TileDataset,
    batch_size: usize,
    device: &<TrainBackend as Backend>::Device,
) -> anyhow::Result<EpochStats> {
    let model = model.valid();
    let mut iter = BatchIter::new(dataset, Split::Val, batch_size, false, None);
    let mut total_loss = 0.0f32;
    let mut total_correct = 0usize;
    let mut total = 0usize;

    while let Some(batch) = iter.next_batch::<TrainBackend>(dataset, device)? {
        let batch_len = batch.images.dims()[0];
        let logits = model.forward(batch.images, ClassifierPhase::Full);
        let loss = categorical_cross_entropy(logits.clone(), batch.targets.clone());
        total_loss += scalar(loss) * batch_len as f32;
        total_correct += correct_count(&logits, &batch.targets);
        total += batch_len;
    }

    Ok(EpochStats {
        loss: total_loss / total.max(1) as f32,
        accuracy: total_correct as f32 / total.max(1) as f32,
    })
}

/// Phase 1: exactly one epoch with the backbone prefix frozen, no validation.
pub fn train_head_phase(
    model: TileClassifier<ADBackend>,
    dataset: &TileDataset,
    opts: &TrainOptions,
    device: &<ADBackend as Backend>::Device,
) -> anyhow::Result<(TileClassifier<ADBackend>, EpochStats)> {
    let (model, stats) = train_epoch(
        model,
        dataset,
        opts,
        ClassifierPhase::HeadOnly,
        device,
        opts.seed,
    )?;
    println!(
        "epoch 1/1: loss {:.4} acc {:.4}",
        stats.loss, stats.accuracy
    );
    Ok((model, stats))
}

/// Phase 2 (and the whole schedule for resumed models): `epochs` passes with
/// everything trainable, validating each epoch and checkpointing the best.
pub fn fine_tune_phase(
    mut model: TileClassifier<ADBackend>,
    dataset: &TileDataset,
    epochs: usize,
    opts: &TrainOptions,
    device: &<ADBackend as Backend>::Device,
    monitor: &mut CheckpointMonitor,
    history: &mut TrainingHistory,
) -> anyhow::Result<TileClassifier<ADBackend>> {
    for epoch in 0..epochs {
        // Distinct batch order per epoch, still reproducible from the seed.
        let seed = opts.seed.map(|s| s.wrapping_add(epoch as u64 + 1));
        let (trained, stats) =
            train_epoch(model, dataset, opts, ClassifierPhase::Full, device, seed)?;
        model = trained;
        let val = validate(&model, dataset, opts.batch_size, device)?;
        println!(
            "epoch {}/{}: loss {:.4} acc {:.4} val_loss {:.4} val_acc {:.4}",
            epoch + 1,
            epochs,
            stats.loss,
            stats.accuracy,
            val.loss,
            val.accuracy
        );
        history.push_epoch(stats.loss, val.loss, stats.accuracy, val.accuracy);
        monitor.observe_and_save(&model, val.accuracy)?;
    }
    Ok(model)
}
