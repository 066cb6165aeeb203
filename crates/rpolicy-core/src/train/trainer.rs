use super::loader::BatchLoader;
use super::schedule::{LearningRateScheduler, training_progress};
use crate::config::Config;
use crate::dataset::PositionDataset;
use crate::error::TrainError;
use crate::export::{LayerJson, load_checkpoint_expecting, save_checkpoint};
use crate::network::{Gradients, PolicyNetwork};
use crate::optimizer::AdamState;
use crate::record::PositionRecord;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 1エポックの集計
#[derive(Clone, Debug, PartialEq)]
pub struct EpochStats {
    /// 1 始まり
    pub epoch: usize,
    /// バッチ平均損失の平均
    pub loss: f32,
    pub batches: usize,
    pub positions: usize,
    /// エポック終了時点の学習率
    pub lr: f32,
}

/// バッチの平均損失と平均勾配
///
/// レコードをスレッド数程度のチャンクに分け、チャンクごとの勾配を足し合わせる。
pub fn batch_gradients(network: &PolicyNetwork, batch: &[PositionRecord]) -> (f32, Gradients) {
    let h = network.hidden_size();
    if batch.is_empty() {
        return (0.0, Gradients::zeros(h));
    }
    let chunk = batch.len().div_ceil(rayon::current_num_threads()).max(1);
    let partials: Vec<(f32, Gradients)> = batch
        .par_chunks(chunk)
        .map(|records| {
            let mut grads = Gradients::zeros(h);
            let loss: f32 = records
                .iter()
                .map(|r| network.accumulate_gradients(r, &mut grads))
                .sum();
            (loss, grads)
        })
        .collect();

    let mut iter = partials.into_iter();
    let (mut loss, mut grads) = match iter.next() {
        Some(first) => first,
        None => return (0.0, Gradients::zeros(h)),
    };
    for (l, g) in iter {
        loss += l;
        grads.add_assign(&g);
    }
    let n = batch.len() as f32;
    grads.scale(1.0 / n);
    (loss / n, grads)
}

/// トレーナー
pub struct Trainer {
    config: Config,
    network: PolicyNetwork,
    adam: AdamState,
    interrupted: Arc<AtomicBool>,
    lr_scheduler: LearningRateScheduler,
}

impl Trainer {
    /// 新しいトレーナーを作成（リジュームまたはシード付きランダム初期化）
    pub fn new(config: Config) -> Result<Self, TrainError> {
        config.validate()?;
        let network = match &config.train.resume_path {
            Some(path) => {
                log::info!("Resuming from: {}", path.display());
                load_checkpoint_expecting(path, config.network.hidden_size)?
            }
            None => {
                let mut rng = ChaCha8Rng::seed_from_u64(config.train.seed);
                PolicyNetwork::new_random(&config.network, &mut rng)?
            }
        };
        Ok(Self::with_network(config, network))
    }

    /// 既存のネットワークから始める
    pub fn with_network(config: Config, network: PolicyNetwork) -> Self {
        let adam = AdamState::new(&network);
        let lr_scheduler = LearningRateScheduler::from_config(&config.train);
        Self {
            config,
            network,
            adam,
            interrupted: Arc::new(AtomicBool::new(false)),
            lr_scheduler,
        }
    }

    /// 中断フラグを取得（バッチの境界でのみ確認する）
    pub fn interrupted(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    pub fn network(&self) -> &PolicyNetwork {
        &self.network
    }

    pub fn into_network(self) -> PolicyNetwork {
        self.network
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 1バッチ分の学習（Adam を1ステップ）。バッチの平均損失を返す。
    pub fn train_batch(&mut self, batch: &[PositionRecord], lr: f32) -> f32 {
        let (loss, grads) = batch_gradients(&self.network, batch);
        self.adam.step(&mut self.network, &grads, lr);
        loss
    }

    /// 学習を実行
    pub fn train(&mut self, dataset: &PositionDataset) -> Result<Vec<EpochStats>, TrainError> {
        let train = &self.config.train;
        log::info!("Training with {} positions", dataset.len());
        log::info!("  Batch size: {}", dataset.batch_size());
        log::info!("  Batches per epoch: {}", dataset.num_batches());
        log::info!("  Epochs: {}", train.epochs);
        log::info!("  Hidden size: {}", self.network.hidden_size());
        log::info!("  Parameters: {}", self.network.parameter_count());
        match train.lr_drop_epoch {
            Some(e) => log::info!(
                "  Learning rate: {} (x{} at epoch {e})",
                train.learning_rate,
                train.lr_drop_factor
            ),
            None => log::info!("  Learning rate: {}", train.learning_rate),
        }

        std::fs::create_dir_all(&train.output_dir)?;

        let epochs = train.epochs;
        let mut history = Vec::with_capacity(epochs);
        for epoch in 0..epochs {
            if self.interrupted.load(Ordering::SeqCst) {
                log::warn!("Interrupted at epoch {epoch}");
                break;
            }

            let stats = self.train_epoch(dataset, epoch)?;
            log::info!(
                "Epoch {}/{}: lr={:.6}, loss={:.6}, batches={}, positions={}",
                stats.epoch,
                epochs,
                stats.lr,
                stats.loss,
                stats.batches,
                stats.positions
            );
            let completed = stats.batches == dataset.num_batches();
            history.push(stats);

            if completed && (epoch + 1) % self.config.train.checkpoint_interval == 0 {
                let path = self.checkpoint_path(&format!("policy_epoch_{}", epoch + 1));
                match save_checkpoint(&self.network, &path) {
                    Ok(()) => log::info!("Saved checkpoint: {}", path.display()),
                    Err(e) => log::error!("Failed to save checkpoint {}: {e}", path.display()),
                }
            }
        }

        // 最終モデルを保存
        let final_path = self.checkpoint_path("policy_final");
        save_checkpoint(&self.network, &final_path)?;
        let json_path = final_path.with_extension("json");
        LayerJson::from_network(&self.network).save(&json_path)?;
        log::info!(
            "Saved final model: {} and {}",
            final_path.display(),
            json_path.display()
        );

        Ok(history)
    }

    fn checkpoint_path(&self, stem: &str) -> PathBuf {
        Path::new(&self.config.train.output_dir).join(format!("{stem}.ckpt"))
    }

    /// 1エポックの学習
    fn train_epoch(
        &mut self,
        dataset: &PositionDataset,
        epoch: usize,
    ) -> Result<EpochStats, TrainError> {
        let num_batches = dataset.num_batches();
        let progress = ProgressBar::new(num_batches as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} loss:{msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let train = &self.config.train;
        let mut loader = BatchLoader::start(dataset, train.loader_workers, train.prefetch_batches);

        let mut total_loss = 0.0f32;
        let mut batches = 0usize;
        let mut positions = 0usize;
        let mut lr = self.lr_scheduler.lr_at(training_progress(epoch, 0, num_batches));

        while let Some(next) = loader.next_batch() {
            let (batch_idx, batch) = next?;
            if self.interrupted.load(Ordering::SeqCst) {
                log::warn!("Interrupted at epoch {} batch {batch_idx}", epoch + 1);
                break;
            }

            lr = self
                .lr_scheduler
                .lr_at(training_progress(epoch, batch_idx, num_batches));
            let loss = self.train_batch(&batch, lr);

            total_loss += loss;
            batches += 1;
            positions += batch.len();

            if batch_idx % 10 == 0 || batches == num_batches {
                progress.set_message(format!("{:.4}", total_loss / batches as f32));
            }
            progress.inc(1);
        }
        loader.finish();
        progress.finish();

        let loss = if batches > 0 {
            total_loss / batches as f32
        } else {
            0.0
        };
        Ok(EpochStats {
            epoch: epoch + 1,
            loss,
            batches,
            positions,
            lr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatasetConfig, NetworkConfig, TrainConfig};
    use crate::export::load_checkpoint;
    use crate::record::{SideToMove, encode_record};
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    /// 特徴量から最善手が決まる小さな合成データ
    fn synthetic_records(n: usize) -> Vec<PositionRecord> {
        (0..n)
            .map(|i| {
                let k = (i % 4) as u16;
                let features = vec![k, 100 + k, 700 + k];
                let moves = vec![10, 20, 30, 40];
                PositionRecord::new(SideToMove::White, features, moves, 10 * (k + 1)).unwrap()
            })
            .collect()
    }

    fn write_dataset(records: &[PositionRecord]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let mut bytes = Vec::new();
        for r in records {
            encode_record(&mut bytes, r).unwrap();
        }
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn config(output_dir: &Path, epochs: usize) -> Config {
        Config {
            network: NetworkConfig { hidden_size: 8 },
            dataset: DatasetConfig { batch_size: 16 },
            train: TrainConfig {
                epochs,
                learning_rate: 0.01,
                loader_workers: 2,
                prefetch_batches: 2,
                output_dir: output_dir.to_path_buf(),
                ..TrainConfig::default()
            },
        }
    }

    #[test]
    fn test_training_lowers_loss() {
        let records = synthetic_records(64);
        let file = write_dataset(&records);
        let out = TempDir::new().unwrap();
        let cfg = config(out.path(), 15);
        let dataset = PositionDataset::open(file.path(), &cfg.dataset).unwrap();

        let mut trainer = Trainer::new(cfg).unwrap();
        let (before, _) = batch_gradients(trainer.network(), &records);
        let history = trainer.train(&dataset).unwrap();
        let (after, _) = batch_gradients(trainer.network(), &records);

        assert_eq!(history.len(), 15);
        assert!(history.iter().all(|s| s.batches == 4 && s.positions == 64));
        assert!(history.last().unwrap().loss < history[0].loss);
        assert!(after < before, "loss did not decrease: {before} -> {after}");

        // 毎エポックのチェックポイントと最終モデル
        assert!(out.path().join("policy_epoch_1.ckpt").exists());
        assert!(out.path().join("policy_epoch_15.ckpt").exists());
        let final_net = load_checkpoint(out.path().join("policy_final.ckpt")).unwrap();
        assert_eq!(&final_net, trainer.network());
        assert!(out.path().join("policy_final.json").exists());
    }

    #[test]
    fn test_same_seed_gives_same_result() {
        let records = synthetic_records(32);
        let file = write_dataset(&records);
        let run = || {
            let out = TempDir::new().unwrap();
            let cfg = config(out.path(), 2);
            let dataset = PositionDataset::open(file.path(), &cfg.dataset).unwrap();
            let mut trainer = Trainer::new(cfg).unwrap();
            trainer.train(&dataset).unwrap();
            trainer.into_network()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_interrupt_stops_before_first_batch() {
        let records = synthetic_records(32);
        let file = write_dataset(&records);
        let out = TempDir::new().unwrap();
        let cfg = config(out.path(), 3);
        let dataset = PositionDataset::open(file.path(), &cfg.dataset).unwrap();

        let mut trainer = Trainer::new(cfg).unwrap();
        let initial = trainer.network().clone();
        trainer.interrupted().store(true, Ordering::SeqCst);
        let history = trainer.train(&dataset).unwrap();
        assert!(history.is_empty());
        assert_eq!(trainer.network(), &initial);
    }

    #[test]
    fn test_resume_from_checkpoint() {
        let out = TempDir::new().unwrap();
        let path = out.path().join("start.ckpt");
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let net = PolicyNetwork::new_random(&NetworkConfig { hidden_size: 8 }, &mut rng).unwrap();
        save_checkpoint(&net, &path).unwrap();

        let mut cfg = config(out.path(), 1);
        cfg.train.resume_path = Some(path.clone());
        let trainer = Trainer::new(cfg.clone()).unwrap();
        assert_eq!(trainer.network(), &net);

        cfg.network.hidden_size = 16;
        assert!(matches!(
            Trainer::new(cfg),
            Err(TrainError::Network(crate::NetworkError::HiddenSizeMismatch { .. }))
        ));
    }

    #[test]
    fn test_parallel_gradients_match_sequential() {
        let records = synthetic_records(37);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let net = PolicyNetwork::new_random(&NetworkConfig { hidden_size: 4 }, &mut rng).unwrap();

        let (loss, grads) = batch_gradients(&net, &records);

        let mut expected = Gradients::zeros(4);
        let mut expected_loss = 0.0;
        for r in &records {
            expected_loss += net.accumulate_gradients(r, &mut expected);
        }
        expected.scale(1.0 / records.len() as f32);
        expected_loss /= records.len() as f32;

        assert!((loss - expected_loss).abs() < 1e-4);
        for (a, b) in grads.tensors().iter().zip(expected.tensors()) {
            for (x, y) in a.iter().zip(b) {
                assert!((x - y).abs() < 1e-4);
            }
        }
    }
}
