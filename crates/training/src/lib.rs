#![recursion_limit = "256"]

pub mod history;
pub mod trainer;
pub mod util;

pub use history::{plot_history, TrainingHistory};
pub use models::{ClassifierPhase, TileClassifier, TileClassifierConfig};
pub use trainer::{fine_tune_epochs, CheckpointMonitor, EpochStats, TrainOptions};
pub use util::{run_train, validate_gpu_choice, TrainArgs};

/// Backend alias for training (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
