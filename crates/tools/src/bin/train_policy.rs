//! 方策ネットワークの学習

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use rpolicy_core::train::Trainer;
use rpolicy_core::{Config, PositionDataset};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train the chess move-policy network")]
struct Cli {
    /// 教師データ（バイナリレコード）
    #[arg(long)]
    data: PathBuf,

    /// 設定ファイル（TOML）。以下のオプションはファイルの値を上書きする
    #[arg(long)]
    config: Option<PathBuf>,

    /// エポック数
    #[arg(long)]
    epochs: Option<usize>,

    /// バッチサイズ
    #[arg(long)]
    batch_size: Option<usize>,

    /// 隠れ層の幅
    #[arg(long)]
    hidden_size: Option<usize>,

    /// 学習率
    #[arg(long)]
    lr: Option<f32>,

    /// 学習率を落とすエポック（小数可）
    #[arg(long)]
    lr_drop_epoch: Option<f32>,

    /// 学習率の減衰倍率
    #[arg(long)]
    lr_drop_factor: Option<f32>,

    /// 初期化用シード
    #[arg(long)]
    seed: Option<u64>,

    /// 読み込みワーカー数
    #[arg(long)]
    workers: Option<usize>,

    /// 出力ディレクトリ
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// 既存チェックポイントから再開
    #[arg(long)]
    resume: Option<PathBuf>,

    /// 最終的な設定を TOML で表示して終了
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(v) = self.epochs {
            config.train.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.dataset.batch_size = v;
        }
        if let Some(v) = self.hidden_size {
            config.network.hidden_size = v;
        }
        if let Some(v) = self.lr {
            config.train.learning_rate = v;
        }
        if let Some(v) = self.lr_drop_epoch {
            config.train.lr_drop_epoch = Some(v);
        }
        if let Some(v) = self.lr_drop_factor {
            config.train.lr_drop_factor = v;
        }
        if let Some(v) = self.seed {
            config.train.seed = v;
        }
        if let Some(v) = self.workers {
            config.train.loader_workers = v;
        }
        if let Some(v) = &self.output_dir {
            config.train.output_dir = v.clone();
        }
        if let Some(v) = &self.resume {
            config.train.resume_path = Some(v.clone());
        }
    }
}

fn main() -> Result<()> {
    tools::init_logger();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => Config::default(),
    };
    cli.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;

    if cli.print_config {
        print!("{}", toml::to_string(&config).context("Failed to serialize configuration")?);
        return Ok(());
    }

    let dataset = PositionDataset::open(&cli.data, &config.dataset)
        .with_context(|| format!("Failed to open dataset {}", cli.data.display()))?;

    let mut trainer = Trainer::new(config).context("Failed to initialize trainer")?;

    // Ctrl-C ハンドラ
    {
        let interrupted = trainer.interrupted();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted, stopping after the current batch...");
            interrupted.store(true, Ordering::SeqCst);
        })
        .ok();
    }

    let history = trainer.train(&dataset)?;
    if let Some(last) = history.last() {
        println!(
            "Finished {} epochs, final loss {:.6} (first {:.6})",
            history.len(),
            last.loss,
            history[0].loss
        );
    }
    println!(
        "Final model: {}",
        trainer.config().train.output_dir.join("policy_final.ckpt").display()
    );
    Ok(())
}
