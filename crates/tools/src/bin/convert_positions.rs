//! `FEN|uci` 形式のテキストを学習用バイナリレコードに変換する

use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rpolicy_core::EncodeError;
use rpolicy_core::features::{
    encode_position, is_rule_draw, is_underpromotion, parse_labeled_line,
};
use rpolicy_core::record::encode_record;
use tools::common::io::open_reader;

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert FEN|uci lines into binary policy training records")]
struct Cli {
    /// 入力ファイル（1行に `FEN|uci`、.gz 可、`-` で標準入力）
    input: PathBuf,

    /// 出力ファイル（レコードを連結したバイナリ）
    output: PathBuf,

    /// 変換する局面数の上限
    #[arg(long)]
    limit: Option<u64>,
}

#[derive(Default, Debug)]
struct Stats {
    seen: u64,
    converted: u64,
    invalid: u64,
    underpromotion: u64,
    drawn: u64,
    unencodable: u64,
}

fn main() -> Result<()> {
    tools::init_logger();
    let cli = Cli::parse();

    let reader = open_reader(&cli.input)
        .with_context(|| format!("Failed to open {}", cli.input.display()))?;
    let file = File::create(&cli.output)
        .with_context(|| format!("Failed to create {}", cli.output.display()))?;
    let mut writer = BufWriter::new(file);

    let mut stats = Stats::default();
    for (i, line) in reader.lines().enumerate() {
        if cli.limit.is_some_and(|lim| stats.converted >= lim) {
            break;
        }
        let line = line.with_context(|| format!("Failed to read line {}", i + 1))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.seen += 1;

        let (position, best_move) = match parse_labeled_line(line) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Skipping line {}: {e}", i + 1);
                stats.invalid += 1;
                continue;
            }
        };
        // クイーン以外への成りは学習対象外
        if is_underpromotion(&best_move) {
            stats.underpromotion += 1;
            continue;
        }
        // 50手ルール・駒不足の引き分けは学習しない
        if is_rule_draw(&position) {
            stats.drawn += 1;
            continue;
        }
        let record = match encode_position(&position, &best_move) {
            Ok(r) => r,
            Err(e @ (EncodeError::NoLegalMoves | EncodeError::Record(_))) => {
                log::debug!("Skipping line {}: {e}", i + 1);
                stats.unencodable += 1;
                continue;
            }
            Err(e) => {
                log::warn!("Skipping line {}: {e}", i + 1);
                stats.invalid += 1;
                continue;
            }
        };
        encode_record(&mut writer, &record)
            .with_context(|| format!("Failed to write {}", cli.output.display()))?;
        stats.converted += 1;

        if stats.converted % 1_000_000 == 0 {
            log::info!("Converted {} positions", stats.converted);
        }
    }
    writer.flush()?;
    drop(writer);

    let size = std::fs::metadata(&cli.output).map(|m| m.len()).unwrap_or(0);
    println!("Positions seen: {}", stats.seen);
    println!("Positions converted: {}", stats.converted);
    println!(
        "Skipped: {} invalid, {} under-promotion, {} drawn, {} not encodable",
        stats.invalid, stats.underpromotion, stats.drawn, stats.unencodable
    );
    println!("{}: {:.2} MB", cli.output.display(), size as f64 / (1024.0 * 1024.0));
    Ok(())
}
