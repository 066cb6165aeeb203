//! 学習済みネットワークの方策を表示する

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use rpolicy_core::PolicyNetwork;
use rpolicy_core::export::{LayerJson, load_checkpoint};
use rpolicy_core::features::parse_fen;
use rpolicy_core::policy::legal_move_policy;
use tools::common::io::has_extension;

const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
const KIWIPETE_FEN: &str = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";

#[derive(Parser, Debug)]
#[command(author, version, about = "Print the move policy of a trained network")]
struct Cli {
    /// チェックポイント（.ckpt）または JSON（.json）
    network: PathBuf,

    /// 表示する局面（省略時は初期局面と kiwipete）
    #[arg(long)]
    fen: Vec<String>,

    /// 上位 N 手だけ表示
    #[arg(long)]
    top: Option<usize>,
}

fn load_network(path: &Path) -> Result<PolicyNetwork> {
    let network = if has_extension(path, "json") {
        LayerJson::load(path)?.into_network()?
    } else {
        load_checkpoint(path)?
    };
    Ok(network)
}

fn main() -> Result<()> {
    tools::init_logger();
    let cli = Cli::parse();

    let network = load_network(&cli.network)
        .with_context(|| format!("Failed to load {}", cli.network.display()))?;

    let fens = if cli.fen.is_empty() {
        vec![START_FEN.to_string(), KIWIPETE_FEN.to_string()]
    } else {
        cli.fen.clone()
    };

    for (i, fen) in fens.iter().enumerate() {
        if i > 0 {
            println!();
        }
        let position = parse_fen(fen)?;
        let policy = legal_move_policy(&network, &position)?;
        println!("Fen: {fen}");
        let shown = cli.top.unwrap_or(policy.len());
        for p in policy.iter().take(shown) {
            println!("{} ({}): {:.4}", p.uci, p.move_index, p.probability);
        }
    }
    Ok(())
}
