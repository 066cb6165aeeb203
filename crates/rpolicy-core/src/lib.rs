//! Chess move-policy network core.
//!
//! Labeled positions are stored as back-to-back variable-length binary records
//! ([`record`]), indexed into fixed-size batches by [`dataset::PositionDataset`],
//! and fed to a two-layer [`network::PolicyNetwork`] whose 4096 move logits are
//! masked down to the legal moves of each position.

pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod features;
pub mod network;
pub mod optimizer;
pub mod policy;
pub mod record;
pub mod train;

pub use config::{Config, DatasetConfig, NetworkConfig, TrainConfig};
pub use dataset::PositionDataset;
pub use error::{DatasetError, EncodeError, NetworkError, RecordError, TrainError};
pub use features::{DenseFeatures, FeatureSource, IllegalMask, SparseFeatures};
pub use network::PolicyNetwork;
pub use record::{PositionRecord, SideToMove};

/// 入力特徴量の次元（2色 × 6駒種 × 64マス）
pub const INPUT_SIZE: usize = 768;
/// 出力（指し手）の次元（from × 64 + to）
pub const OUTPUT_SIZE: usize = 4096;
/// 隠れ層の既定幅
pub const DEFAULT_HIDDEN_SIZE: usize = 32;

pub const MIN_ACTIVE_FEATURES: usize = 3;
pub const MAX_ACTIVE_FEATURES: usize = 32;
pub const MIN_LEGAL_MOVES: usize = 1;
pub const MAX_LEGAL_MOVES: usize = 218;

/// 非合法手に設定するロジット。softmax 後の確率は数値的に 0 になる。
pub const ILLEGAL_LOGIT: f32 = -1_000_000.0;

/// 量子化時の倍率
pub const QUANTIZATION_SCALE: f32 = 255.0;
