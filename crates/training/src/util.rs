//! CLI arguments and the end-to-end training orchestration.

use clap::Parser;
use models::{TileClassifier, TileClassifierConfig};
use std::path::{Path, PathBuf};
use tile_dataset::{Split, TileDataset};

use crate::history::plot_history;
use crate::trainer::{
    fine_tune_epochs, fine_tune_phase, load_backbone, load_classifier, save_classifier,
    train_head_phase, ADBackend, CheckpointMonitor, TrainOptions,
};
use crate::TrainingHistory;

pub const INTERMEDIATE_MODEL: &str = "intermediate_model.bin";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "train",
    about = "Two-phase transfer learning for tumor tile classification on tile containers"
)]
pub struct TrainArgs {
    /// Number of GPUs to run on (0 runs on CPU).
    #[arg(short = 'g', long = "GPUs", default_value_t = 1)]
    pub gpus: usize,
    /// Saved model record to resume training from.
    #[arg(short = 'm', long = "input_model")]
    pub input_model: Option<PathBuf>,
    /// Number of epochs to use in training.
    #[arg(short = 'e', long)]
    pub epochs: usize,
    /// Size of each batch in minibatch sampling.
    #[arg(short = 'b', long = "batch_size")]
    pub batch_size: usize,
    /// Number of tiles from the container to use for training/validation
    /// (20% validation split).
    #[arg(short = 't', long)]
    pub tiles: Option<usize>,
    /// Path to the tile container with training and validation data.
    #[arg(short = 'f', long = "file_input")]
    pub file_input: PathBuf,
    /// Directory to save weights and the training graphical summary.
    #[arg(short = 'o', long = "output_directory", default_value = ".")]
    pub output_directory: String,
    /// Name prefix of output files.
    #[arg(short = 'n', long = "output_name", default_value = "")]
    pub output_name: String,
    /// Save a graphical summary of the training history to the output
    /// directory.
    #[arg(short = 'H', long = "graphical_history")]
    pub graphical_history: bool,
    /// SGD learning rate.
    #[arg(long, default_value_t = 0.01)]
    pub lr: f64,
    /// Number of label classes. Inferred from the loaded labels if omitted.
    #[arg(long)]
    pub classes: Option<usize>,
    /// Batch-order shuffle seed for reproducible runs.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Directory for the intermediate (head-only) checkpoint.
    #[arg(long = "intermediate_dir", default_value = ".")]
    pub intermediate_dir: PathBuf,
    /// Pretrained backbone record to start a fresh model from.
    #[arg(long = "backbone_weights")]
    pub backbone_weights: Option<PathBuf>,
    /// Mixed blocks kept frozen (after the stem) during the head-only phase.
    #[arg(long = "frozen_blocks", default_value_t = 3)]
    pub frozen_blocks: usize,
}

/// Strip trailing path separators, falling back to the current directory.
pub fn normalize_output_dir(dir: &str) -> String {
    let stripped = dir.trim_end_matches(['/', '\\']);
    if stripped.is_empty() {
        ".".to_string()
    } else {
        stripped.to_string()
    }
}

pub fn final_checkpoint_path(output_directory: &str, output_name: &str) -> PathBuf {
    PathBuf::from(format!("{output_directory}/{output_name}_model.bin"))
}

pub fn history_plot_path(output_directory: &str, output_name: &str) -> PathBuf {
    PathBuf::from(format!(
        "{output_directory}/{output_name}_training_history.png"
    ))
}

pub fn intermediate_model_path(intermediate_dir: &Path) -> PathBuf {
    intermediate_dir.join(INTERMEDIATE_MODEL)
}

/// Device placement is the backend's concern; this only reports what the
/// build can actually drive.
pub fn validate_gpu_choice(gpus: usize) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (gpus, built_wgpu) {
        (0, _) => println!("note: --GPUs 0; training on CPU"),
        (1, _) => {}
        (n, false) => println!(
            "note: {n} GPUs requested but built without backend-wgpu; using the default device"
        ),
        (n, true) => println!(
            "note: {n} GPUs requested; replication is the backend's concern, using device 0"
        ),
    }
    Ok(())
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_gpu_choice(args.gpus)?;
    let output_directory = normalize_output_dir(&args.output_directory);

    let dataset = TileDataset::load(&args.file_input, args.tiles, args.classes)?;
    let [height, width, channels] = dataset.tile_shape();
    println!(
        "[tiles] train rows={} val rows={} classes={} tile={}x{}x{}",
        dataset.rows(Split::Train),
        dataset.rows(Split::Val),
        dataset.num_classes(),
        height,
        width,
        channels
    );

    let final_ckpt = final_checkpoint_path(&output_directory, &args.output_name);
    if let Some(parent) = final_ckpt.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let cfg = TileClassifierConfig {
        num_classes: dataset.num_classes().max(1),
        frozen_blocks: args.frozen_blocks,
        ..Default::default()
    };
    let opts = TrainOptions {
        batch_size: args.batch_size.max(1),
        lr: args.lr,
        seed: args.seed,
    };

    let (resumed, model) = match &args.input_model {
        Some(path) => {
            let model = load_classifier::<ADBackend, _>(path, &cfg, &device)
                .map_err(|e| anyhow::anyhow!("failed to load model {}: {e}", path.display()))?;
            println!("resuming from {}", path.display());
            (true, model)
        }
        None => {
            let mut model = TileClassifier::<ADBackend>::new(&cfg, &device);
            if let Some(weights) = &args.backbone_weights {
                let backbone =
                    load_backbone::<ADBackend, _>(weights, &cfg, &device).map_err(|e| {
                        anyhow::anyhow!(
                            "failed to load backbone weights {}: {e}",
                            weights.display()
                        )
                    })?;
                model = model.with_backbone(backbone);
                println!("loaded pretrained backbone from {}", weights.display());
            }

            println!("Freezing backbone weights");
            let (model, _) = train_head_phase(model, &dataset, &opts, &device)?;

            println!("Unfreezing backbone weights");
            let intermediate = intermediate_model_path(&args.intermediate_dir);
            if !args.intermediate_dir.as_os_str().is_empty() {
                std::fs::create_dir_all(&args.intermediate_dir)?;
            }
            save_classifier(&model, &intermediate)?;

            // Phase 2 always resumes from the intermediate artifact.
            let model = load_classifier::<ADBackend, _>(&intermediate, &cfg, &device)
                .map_err(|e| {
                    anyhow::anyhow!(
                        "failed to reload intermediate model {}: {e}",
                        intermediate.display()
                    )
                })?;
            (false, model)
        }
    };

    let epochs = fine_tune_epochs(resumed, args.epochs);
    let mut monitor = CheckpointMonitor::new(final_ckpt.clone());
    let mut history = TrainingHistory::default();
    let _model = fine_tune_phase(
        model,
        &dataset,
        epochs,
        &opts,
        &device,
        &mut monitor,
        &mut history,
    )?;

    println!("Saved checkpoint to {}", final_ckpt.display());

    if args.graphical_history {
        let plot = history_plot_path(&output_directory, &args.output_name);
        match plot_history(&history, &plot) {
            Ok(()) => println!("Saved training history to {}", plot.display()),
            Err(e) => eprintln!("Failed to plot training history: {e}"),
        }
    }

    Ok(())
}
