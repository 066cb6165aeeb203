use crate::config::TrainConfig;

/// 学習率スケジューラ
///
/// 学習の進み具合（エポック + エポック内の割合）が `drop_epoch` に達した時点で
/// 学習率に `drop_factor` を1回だけ掛ける。
#[derive(Clone, Debug)]
pub struct LearningRateScheduler {
    base_lr: f32,
    drop_epoch: Option<f32>,
    drop_factor: f32,
}

impl LearningRateScheduler {
    pub fn new(base_lr: f32, drop_epoch: Option<f32>, drop_factor: f32) -> Self {
        Self {
            base_lr,
            drop_epoch,
            drop_factor,
        }
    }

    pub fn from_config(config: &TrainConfig) -> Self {
        Self::new(config.learning_rate, config.lr_drop_epoch, config.lr_drop_factor)
    }

    /// 単一学習率のスケジューラ
    pub fn constant(lr: f32) -> Self {
        Self::new(lr, None, 1.0)
    }

    /// 進み具合 `progress`（エポック単位、小数可）での学習率
    pub fn lr_at(&self, progress: f32) -> f32 {
        match self.drop_epoch {
            Some(drop) if progress >= drop => self.base_lr * self.drop_factor,
            _ => self.base_lr,
        }
    }
}

/// エポック `epoch` の `batch` 番目（0 始まり）開始時点の進み具合
pub fn training_progress(epoch: usize, batch: usize, batches_per_epoch: usize) -> f32 {
    if batches_per_epoch == 0 {
        return epoch as f32;
    }
    epoch as f32 + batch as f32 / batches_per_epoch as f32
}
