//! 入力特徴量と指し手インデックス
//!
//! 特徴量インデックスは `relative_color * 384 + piece_type * 64 + square`。
//! 常に手番側から見た盤面で表現する: 黒番では色を入れ替え（手番側の駒が
//! 前半 384 次元に入る）、マスを上下反転（`sq ^ 56`）する。指し手インデックス
//! `from * 64 + to` も同じ変換をかける。特徴量・合法手・最善手で変換を揃えないと
//! 学習結果は意味を持たない。

use crate::error::EncodeError;
use crate::record::{PositionRecord, SideToMove};
use crate::{INPUT_SIZE, OUTPUT_SIZE};
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::{Board, CastlingMode, Chess, Color, Move, Position, Role, Square};

/// 局面ごとのアクティブな特徴量インデックスを返すもの
///
/// 密／疎の表現は消費側（ネットワーク）が一度だけ選ぶ。ここでは常に疎な
/// インデックス列を返す。
pub trait FeatureSource {
    fn active_features(&self) -> &[u16];
}

impl FeatureSource for PositionRecord {
    fn active_features(&self) -> &[u16] {
        PositionRecord::active_features(self)
    }
}

impl FeatureSource for [u16] {
    fn active_features(&self) -> &[u16] {
        self
    }
}

/// 疎な特徴量インデックス列
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SparseFeatures(pub Vec<u16>);

impl FeatureSource for SparseFeatures {
    fn active_features(&self) -> &[u16] {
        &self.0
    }
}

/// 768 次元の密ベクトルから作る特徴量
///
/// 構築時に非ゼロ要素のインデックスを一度だけ抽出する。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenseFeatures {
    indices: Vec<u16>,
}

impl DenseFeatures {
    pub fn new(dense: &[f32]) -> Self {
        debug_assert_eq!(dense.len(), INPUT_SIZE);
        let indices = dense
            .iter()
            .take(INPUT_SIZE)
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(i, _)| i as u16)
            .collect();
        Self { indices }
    }
}

impl FeatureSource for DenseFeatures {
    fn active_features(&self) -> &[u16] {
        &self.indices
    }
}

const MASK_WORDS: usize = OUTPUT_SIZE / 64;

/// 4096 手分の合法性ビット集合（セットされたビット = 合法）
///
/// 外部表現は「1 = 非合法、0 = 合法」の密ベクトル。
#[derive(Clone, PartialEq, Eq)]
pub struct IllegalMask {
    legal: [u64; MASK_WORDS],
}

impl IllegalMask {
    /// 全て非合法
    pub fn all_illegal() -> Self {
        Self {
            legal: [0; MASK_WORDS],
        }
    }

    pub fn from_legal_moves(moves: &[u16]) -> Self {
        let mut mask = Self::all_illegal();
        for &m in moves {
            mask.set_legal(m as usize);
        }
        mask
    }

    /// 密ベクトル（1 = 非合法）から作る
    pub fn from_dense(dense: &[f32]) -> Self {
        debug_assert_eq!(dense.len(), OUTPUT_SIZE);
        let mut mask = Self::all_illegal();
        for (i, &v) in dense.iter().take(OUTPUT_SIZE).enumerate() {
            if v == 0.0 {
                mask.set_legal(i);
            }
        }
        mask
    }

    pub fn set_legal(&mut self, index: usize) {
        self.legal[index / 64] |= 1u64 << (index % 64);
    }

    #[inline]
    pub fn is_legal(&self, index: usize) -> bool {
        self.legal[index / 64] & (1u64 << (index % 64)) != 0
    }

    #[inline]
    pub fn is_illegal(&self, index: usize) -> bool {
        !self.is_legal(index)
    }

    /// 合法手として立っているインデックス数（重複は1つに数える）
    pub fn legal_count(&self) -> usize {
        self.legal.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// 合法なインデックスを昇順に列挙
    pub fn legal_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..OUTPUT_SIZE).filter(move |&i| self.is_legal(i))
    }

    /// 1 = 非合法、0 = 合法 の 4096 次元ベクトル
    pub fn to_dense(&self) -> Vec<f32> {
        (0..OUTPUT_SIZE)
            .map(|i| if self.is_legal(i) { 0.0 } else { 1.0 })
            .collect()
    }
}

impl std::fmt::Debug for IllegalMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IllegalMask")
            .field("legal", &self.legal_indices().collect::<Vec<_>>())
            .finish()
    }
}

fn piece_type_index(role: Role) -> u16 {
    match role {
        Role::Pawn => 0,
        Role::Knight => 1,
        Role::Bishop => 2,
        Role::Rook => 3,
        Role::Queen => 4,
        Role::King => 5,
    }
}

/// 手番側から見たマス番号
#[inline]
pub fn canonical_square(square: Square, turn: Color) -> u16 {
    let sq = square as u16;
    if turn == Color::Black { sq ^ 56 } else { sq }
}

/// 駒1つの特徴量インデックス
pub fn feature_index(square: Square, role: Role, color: Color, turn: Color) -> u16 {
    let relative_color = if color == turn { 0 } else { 1 };
    relative_color * 384 + piece_type_index(role) * 64 + canonical_square(square, turn)
}

/// 盤上の全駒の特徴量（a1 から h8 の順）
pub fn board_features(board: &Board, turn: Color) -> Vec<u16> {
    let mut features = Vec::with_capacity(32);
    for square in board.occupied() {
        if let Some(piece) = board.piece_at(square) {
            features.push(feature_index(square, piece.role, piece.color, turn));
        }
    }
    features
}

/// 指し手インデックス
///
/// キャスリングは UCI 標準表記（王の移動先、例 e1g1）で表す。成り駒の種類は
/// 区別しない（e7e8q と e7e8n は同じインデックス）。
pub fn move_index(m: &Move, turn: Color) -> Option<u16> {
    match m.to_uci(CastlingMode::Standard) {
        UciMove::Normal { from, to, .. } => {
            Some(canonical_square(from, turn) * 64 + canonical_square(to, turn))
        }
        _ => None,
    }
}

/// クイーン以外への成り
pub fn is_underpromotion(m: &Move) -> bool {
    matches!(m.promotion(), Some(role) if role != Role::Queen)
}

pub fn side_to_move(turn: Color) -> SideToMove {
    match turn {
        Color::White => SideToMove::White,
        Color::Black => SideToMove::Black,
    }
}

/// 50手ルールまたは駒不足で引き分けの局面（教師データから除外する）
///
/// 駒不足は玉2枚のみ、または玉2枚 + ナイト／ビショップ1枚に限る。
pub fn is_rule_draw(position: &Chess) -> bool {
    if position.halfmoves() >= 100 {
        return true;
    }
    let board = position.board();
    match board.occupied().count() {
        2 => true,
        3 => (board.knights() | board.bishops()).any(),
        _ => false,
    }
}

/// 合法手の指し手インデックス（生成順、成りの重複を含む）
pub fn legal_move_indices(position: &Chess) -> Result<Vec<u16>, EncodeError> {
    let turn = position.turn();
    position
        .legal_moves()
        .iter()
        .map(|m| move_index(m, turn).ok_or_else(|| EncodeError::UnsupportedMove(format!("{m:?}"))))
        .collect()
}

/// 局面と最善手から教師レコードを作る
pub fn encode_position(position: &Chess, best_move: &Move) -> Result<PositionRecord, EncodeError> {
    let turn = position.turn();
    let legal = position.legal_moves();
    if legal.is_empty() {
        return Err(EncodeError::NoLegalMoves);
    }
    if !legal.contains(best_move) {
        return Err(EncodeError::IllegalBestMove(
            best_move.to_uci(CastlingMode::Standard).to_string(),
        ));
    }

    let features = board_features(position.board(), turn);
    let moves = legal_move_indices(position)?;
    let best = move_index(best_move, turn)
        .ok_or_else(|| EncodeError::UnsupportedMove(format!("{best_move:?}")))?;

    Ok(PositionRecord::new(side_to_move(turn), features, moves, best)?)
}

/// FEN 文字列から局面を作る
pub fn parse_fen(fen: &str) -> Result<Chess, EncodeError> {
    let invalid = |reason: String| EncodeError::InvalidFen {
        fen: fen.to_string(),
        reason,
    };
    let parsed = Fen::from_ascii(fen.trim().as_bytes()).map_err(|e| invalid(e.to_string()))?;
    parsed
        .into_position::<Chess>(CastlingMode::Standard)
        .map_err(|e| invalid(e.to_string()))
}

/// 局面上で UCI 表記の指し手を解決する
pub fn parse_uci_move(position: &Chess, uci: &str) -> Result<Move, EncodeError> {
    let uci = uci.trim();
    UciMove::from_ascii(uci.as_bytes())
        .map_err(|_| EncodeError::InvalidUci(uci.to_string()))?
        .to_move(position)
        .map_err(|_| EncodeError::IllegalBestMove(uci.to_string()))
}

/// `FEN|uci` 形式の1行を解釈する
pub fn parse_labeled_line(line: &str) -> Result<(Chess, Move), EncodeError> {
    let mut tokens = line.split('|');
    let (Some(fen), Some(uci)) = (tokens.next(), tokens.next()) else {
        return Err(EncodeError::MalformedLine(line.to_string()));
    };
    let position = parse_fen(fen)?;
    let best_move = parse_uci_move(&position, uci)?;
    Ok((position, best_move))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordError;
    use std::collections::BTreeSet;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    /// 上下反転して色を入れ替えた FEN を作る
    fn mirror_fen(fen: &str) -> String {
        let parts: Vec<&str> = fen.split_whitespace().collect();
        let swap_case = |s: &str| -> String {
            s.chars()
                .map(|c| {
                    if c.is_ascii_uppercase() {
                        c.to_ascii_lowercase()
                    } else {
                        c.to_ascii_uppercase()
                    }
                })
                .collect()
        };
        let board: Vec<String> = parts[0].split('/').rev().map(swap_case).collect();
        let turn = if parts[1] == "w" { "b" } else { "w" };
        let castling = if parts[2] == "-" {
            "-".to_string()
        } else {
            let swapped = swap_case(parts[2]);
            let mut upper: Vec<char> = swapped.chars().filter(|c| c.is_ascii_uppercase()).collect();
            let lower: Vec<char> = swapped.chars().filter(|c| c.is_ascii_lowercase()).collect();
            upper.extend(lower);
            upper.into_iter().collect()
        };
        let ep = if parts[3] == "-" {
            "-".to_string()
        } else {
            let file = &parts[3][..1];
            let rank: u32 = parts[3][1..].parse().unwrap();
            format!("{file}{}", 9 - rank)
        };
        format!("{} {} {} {} {} {}", board.join("/"), turn, castling, ep, parts[4], parts[5])
    }

    #[test]
    fn test_start_position_features_and_moves() {
        let position = parse_fen(START_FEN).unwrap();
        let features = board_features(position.board(), position.turn());
        assert_eq!(features.len(), 32);
        assert_eq!(features.iter().collect::<BTreeSet<_>>().len(), 32);

        // 白番なので反転なし: 白の駒は前半、黒の駒は後半
        assert!(features.contains(&(4 * 64 + 3))); // 白クイーン d1
        assert!(features.contains(&(384 + 5 * 64 + 60))); // 黒キング e8
        assert!(features.contains(&(8))); // 白ポーン a2

        let moves = legal_move_indices(&position).unwrap();
        assert_eq!(moves.len(), 20);
        assert!(moves.contains(&(12 * 64 + 28))); // e2e4
        assert!(moves.contains(&(6 * 64 + 21))); // g1f3
    }

    #[test]
    fn test_start_position_record() {
        let position = Chess::default();
        let best = parse_uci_move(&position, "e2e4").unwrap();
        let record = encode_position(&position, &best).unwrap();
        assert_eq!(record.side_to_move(), SideToMove::White);
        assert_eq!(record.active_features().len(), 32);
        assert_eq!(record.legal_moves().len(), 20);
        assert_eq!(record.best_move(), 12 * 64 + 28);
    }

    #[test]
    fn test_black_to_move_is_mirrored() {
        let position = parse_fen("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1")
            .unwrap();
        let best = parse_uci_move(&position, "e7e5").unwrap();
        let record = encode_position(&position, &best).unwrap();

        assert_eq!(record.side_to_move(), SideToMove::Black);
        // e7 (52) → e2 (12), e5 (36) → e4 (28)
        assert_eq!(record.best_move(), 12 * 64 + 28);
        // 黒キング e8 は手番側の駒として e1 に入る
        assert!(record.active_features().contains(&(5 * 64 + 4)));
        // 白キング e1 は相手側の駒として e8 に入る
        assert!(record.active_features().contains(&(384 + 5 * 64 + 60)));
    }

    #[test]
    fn test_mirrored_positions_share_encoding() {
        let fens = [
            "r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 4 4",
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R b KQkq - 0 1",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 b - - 0 1",
            "rnbqkbnr/ppp1pppp/8/8/3pP3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 3",
        ];
        for fen in fens {
            let black = parse_fen(fen).unwrap();
            let white = parse_fen(&mirror_fen(fen)).unwrap();
            assert_eq!(black.turn(), Color::Black);
            assert_eq!(white.turn(), Color::White);

            let mut fb = board_features(black.board(), black.turn());
            let mut fw = board_features(white.board(), white.turn());
            fb.sort_unstable();
            fw.sort_unstable();
            assert_eq!(fb, fw, "features differ for {fen}");

            let mb: BTreeSet<u16> = legal_move_indices(&black).unwrap().into_iter().collect();
            let mw: BTreeSet<u16> = legal_move_indices(&white).unwrap().into_iter().collect();
            assert_eq!(mb, mw, "moves differ for {fen}");
        }
    }

    #[test]
    fn test_castling_uses_king_destination() {
        let position =
            parse_fen("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1")
                .unwrap();
        let moves = legal_move_indices(&position).unwrap();
        assert_eq!(moves.len(), 48);
        assert!(moves.contains(&(4 * 64 + 6))); // e1g1
        assert!(moves.contains(&(4 * 64 + 2))); // e1c1
    }

    #[test]
    fn test_promotions_fold_into_one_index() {
        let position = parse_fen("8/4P3/8/8/8/8/k7/4K3 w - - 0 1").unwrap();
        let moves = legal_move_indices(&position).unwrap();
        let promo = 52 * 64 + 60;
        assert_eq!(moves.iter().filter(|&&m| m == promo).count(), 4);

        let queen = parse_uci_move(&position, "e7e8q").unwrap();
        let knight = parse_uci_move(&position, "e7e8n").unwrap();
        assert!(!is_underpromotion(&queen));
        assert!(is_underpromotion(&knight));
        assert_eq!(move_index(&queen, Color::White), move_index(&knight, Color::White));
    }

    #[test]
    fn test_bare_kings_cannot_be_encoded() {
        let position = parse_fen("8/8/8/8/8/8/k7/4K3 w - - 0 1").unwrap();
        let best = parse_uci_move(&position, "e1e2").unwrap();
        let err = encode_position(&position, &best).unwrap_err();
        assert!(matches!(err, EncodeError::Record(RecordError::FeatureCount(2))));
    }

    #[test]
    fn test_checkmate_has_no_legal_moves() {
        // Fool's mate
        let position =
            parse_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3").unwrap();
        assert!(legal_move_indices(&position).unwrap().is_empty());
    }

    #[test]
    fn test_rule_draws() {
        // 50手ルール
        assert!(is_rule_draw(&parse_fen("r3k3/8/8/8/8/8/8/4K2R w - - 100 80").unwrap()));
        assert!(!is_rule_draw(&parse_fen("r3k3/8/8/8/8/8/8/4K2R w - - 99 80").unwrap()));
        // 駒不足
        assert!(is_rule_draw(&parse_fen("8/8/8/8/8/8/k7/4KN2 w - - 0 1").unwrap()));
        assert!(is_rule_draw(&parse_fen("8/8/8/8/8/8/k7/4KB2 w - - 0 1").unwrap()));
        assert!(is_rule_draw(&parse_fen("8/8/8/8/8/8/k7/4K3 w - - 0 1").unwrap()));
        assert!(!is_rule_draw(&parse_fen("8/8/8/8/8/8/k7/4KR2 w - - 0 1").unwrap()));
        assert!(!is_rule_draw(&parse_fen("8/8/8/8/8/8/kp6/4K3 w - - 0 1").unwrap()));
        assert!(!is_rule_draw(&parse_fen(START_FEN).unwrap()));

        // encode_position 自体は引き分け局面も符号化できる
        let position = parse_fen("8/8/8/8/8/8/k7/4KN2 w - - 0 1").unwrap();
        let m = parse_uci_move(&position, "f1d2").unwrap();
        assert!(encode_position(&position, &m).is_ok());
    }

    #[test]
    fn test_parse_labeled_line() {
        let (position, best) = parse_labeled_line(&format!("{START_FEN}|g1f3")).unwrap();
        assert_eq!(move_index(&best, position.turn()), Some(6 * 64 + 21));

        assert!(matches!(
            parse_labeled_line(START_FEN),
            Err(EncodeError::MalformedLine(_))
        ));
        assert!(matches!(
            parse_labeled_line(&format!("{START_FEN}|e2e5")),
            Err(EncodeError::IllegalBestMove(_))
        ));
        assert!(matches!(
            parse_labeled_line("not a fen|e2e4"),
            Err(EncodeError::InvalidFen { .. })
        ));
    }

    #[test]
    fn test_dense_and_sparse_sources_agree() {
        let mut dense = vec![0.0f32; INPUT_SIZE];
        dense[3] = 1.0;
        dense[400] = 1.0;
        dense[767] = 1.0;
        let from_dense = DenseFeatures::new(&dense);
        let sparse = SparseFeatures(vec![3, 400, 767]);
        assert_eq!(from_dense.active_features(), sparse.active_features());
    }

    #[test]
    fn test_illegal_mask_dense_round_trip() {
        let mask = IllegalMask::from_legal_moves(&[0, 63, 64, 4095, 64]);
        assert_eq!(mask.legal_count(), 4);
        let dense = mask.to_dense();
        assert_eq!(dense.len(), OUTPUT_SIZE);
        assert_eq!(dense.iter().filter(|&&v| v == 0.0).count(), 4);
        assert_eq!(IllegalMask::from_dense(&dense), mask);
        assert_eq!(mask.legal_indices().collect::<Vec<_>>(), vec![0, 63, 64, 4095]);
    }
}
