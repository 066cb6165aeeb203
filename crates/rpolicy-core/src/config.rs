//! 学習設定
//!
//! ネットワーク・データセット・学習ループの設定を1つの不変な構造体にまとめ、
//! 各コンストラクタへ明示的に渡す。TOML ファイルから読み込み、未指定の項目は
//! 既定値で埋める。

use crate::DEFAULT_HIDDEN_SIZE;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub network: NetworkConfig,
    pub dataset: DatasetConfig,
    pub train: TrainConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// 隠れ層の幅
    pub hidden_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hidden_size: DEFAULT_HIDDEN_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    /// 1バッチのレコード数
    pub batch_size: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self { batch_size: 8192 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    /// エポック数
    pub epochs: usize,
    /// 初期学習率
    pub learning_rate: f32,
    /// 学習率を落とすタイミング（エポック単位、小数可）。None なら固定。
    pub lr_drop_epoch: Option<f32>,
    /// 学習率の減衰倍率
    pub lr_drop_factor: f32,
    /// 初期化用シード
    pub seed: u64,
    /// バッチ読み込みワーカー数
    pub loader_workers: usize,
    /// 先読みするバッチ数
    pub prefetch_batches: usize,
    /// チェックポイント保存間隔（エポック単位）
    pub checkpoint_interval: usize,
    /// 出力ディレクトリ
    pub output_dir: PathBuf,
    /// 既存チェックポイントからの再開
    pub resume_path: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 40,
            learning_rate: 0.001,
            lr_drop_epoch: None,
            lr_drop_factor: 0.1,
            seed: 42,
            loader_workers: 4,
            prefetch_batches: 8,
            checkpoint_interval: 1,
            output_dir: PathBuf::from("nets"),
            resume_path: None,
        }
    }
}

impl Config {
    /// TOML ファイルから設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 値の整合性チェック
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.hidden_size == 0 {
            return Err(ConfigError::Invalid("network.hidden_size must be > 0".into()));
        }
        if self.dataset.batch_size == 0 {
            return Err(ConfigError::Invalid("dataset.batch_size must be > 0".into()));
        }
        let t = &self.train;
        if !(t.learning_rate.is_finite() && t.learning_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "train.learning_rate must be positive, got {}",
                t.learning_rate
            )));
        }
        if let Some(e) = t.lr_drop_epoch {
            if !(e.is_finite() && e >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "train.lr_drop_epoch must be >= 0, got {e}"
                )));
            }
        }
        if !(t.lr_drop_factor.is_finite() && t.lr_drop_factor > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "train.lr_drop_factor must be positive, got {}",
                t.lr_drop_factor
            )));
        }
        if t.loader_workers == 0 {
            return Err(ConfigError::Invalid("train.loader_workers must be >= 1".into()));
        }
        if t.checkpoint_interval == 0 {
            return Err(ConfigError::Invalid("train.checkpoint_interval must be >= 1".into()));
        }
        Ok(())
    }
}
