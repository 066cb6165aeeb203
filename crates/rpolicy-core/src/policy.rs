//! 合法手ごとの方策（推論）

use crate::error::EncodeError;
use crate::features::{board_features, move_index};
use crate::network::PolicyNetwork;
use shakmaty::{CastlingMode, Chess, Position};

/// 合法手1つの確率
#[derive(Clone, Debug, PartialEq)]
pub struct MovePolicy {
    pub uci: String,
    pub move_index: u16,
    pub probability: f32,
}

/// 局面の全合法手について確率を計算し、降順に並べて返す
///
/// 出力は合法手の分だけ計算し、その中で softmax を取る。合法手が1つなら確率 1、
/// 合法手がなければ空。
pub fn legal_move_policy(
    network: &PolicyNetwork,
    position: &Chess,
) -> Result<Vec<MovePolicy>, EncodeError> {
    let turn = position.turn();
    let legal = position.legal_moves();
    if legal.is_empty() {
        return Ok(Vec::new());
    }

    let mut policy = Vec::with_capacity(legal.len());
    for m in legal.iter() {
        let index =
            move_index(m, turn).ok_or_else(|| EncodeError::UnsupportedMove(format!("{m:?}")))?;
        policy.push(MovePolicy {
            uci: m.to_uci(CastlingMode::Standard).to_string(),
            move_index: index,
            probability: 1.0,
        });
    }
    if policy.len() == 1 {
        return Ok(policy);
    }

    let hidden = network.hidden(board_features(position.board(), turn).as_slice());
    let logits: Vec<f32> = policy
        .iter()
        .map(|p| network.output_logit(&hidden, p.move_index as usize))
        .collect();
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&z| (z - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    for (p, e) in policy.iter_mut().zip(exps) {
        p.probability = e / total;
    }

    policy.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    Ok(policy)
}
