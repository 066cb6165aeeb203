//! 学習済みチェックポイントを ×255 で量子化し、バイナリと JSON を書き出す

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use rpolicy_core::export::{CHECKPOINT_EXTENSION, load_checkpoint, quantize};
use tools::common::io::has_extension;

#[derive(Parser, Debug)]
#[command(author, version, about = "Quantize a policy checkpoint (x255, rounded)")]
struct Cli {
    /// 学習済みチェックポイント（.ckpt）
    checkpoint: PathBuf,

    /// 出力ディレクトリ
    #[arg(long, default_value = "quantized")]
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    tools::init_logger();
    let cli = Cli::parse();

    if !has_extension(&cli.checkpoint, CHECKPOINT_EXTENSION) {
        bail!(
            "Wrong extension for {}, must be .{CHECKPOINT_EXTENSION}",
            cli.checkpoint.display()
        );
    }
    let stem = cli
        .checkpoint
        .file_stem()
        .and_then(|s| s.to_str())
        .context("checkpoint path has no file name")?
        .to_string();

    let network = load_checkpoint(&cli.checkpoint)
        .with_context(|| format!("Failed to load {}", cli.checkpoint.display()))?;
    log::info!(
        "Loaded {} (hidden size {}, {} parameters)",
        cli.checkpoint.display(),
        network.hidden_size(),
        network.parameter_count()
    );

    let quantized = quantize(&network);

    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("Failed to create {}", cli.output_dir.display()))?;
    let bin_path = cli.output_dir.join(format!("{stem}.bin"));
    let json_path = cli.output_dir.join(format!("{stem}.json"));
    quantized
        .save_raw(&bin_path)
        .with_context(|| format!("Failed to write {}", bin_path.display()))?;
    quantized
        .to_json()
        .save(&json_path)
        .with_context(|| format!("Failed to write {}", json_path.display()))?;

    println!("Wrote {}", bin_path.display());
    println!("Wrote {}", json_path.display());
    Ok(())
}
