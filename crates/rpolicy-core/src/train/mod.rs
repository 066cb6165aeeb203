//! 学習ループ
//!
//! バッチの読み込みはワーカースレッド、勾配計算は rayon、パラメータ更新は
//! メインスレッドで1バッチにつき1回行う。

mod loader;
mod schedule;
mod trainer;

pub use loader::BatchLoader;
pub use schedule::{LearningRateScheduler, training_progress};
pub use trainer::{EpochStats, Trainer, batch_gradients};
