//! 教師局面のバイナリレコード
//!
//! 1レコードは可変長で、ファイルにはヘッダもチェックサムもなく連続して並ぶ。
//! レイアウト（リトルエンディアン、パディングなし）:
//!
//! | field | type | 制約 |
//! |---|---|---|
//! | side_to_move | i8 | 0 = 白, 1 = 黒 |
//! | num_active_features | u8 | 3..=32 |
//! | active_features | i16 × n | 0..768 |
//! | num_legal_moves | u8 | 1..=218 |
//! | legal_moves | i16 × n | 0..4096 |
//! | best_move | u16 | 0..4096、legal_moves に含まれること |
//!
//! 整合性チェックは範囲と所属のみで、範囲内に収まるビット化けは検出できない。

use crate::error::{RecordError, RecordResult};
use crate::features::IllegalMask;
use crate::{
    INPUT_SIZE, MAX_ACTIVE_FEATURES, MAX_LEGAL_MOVES, MIN_ACTIVE_FEATURES, MIN_LEGAL_MOVES,
    OUTPUT_SIZE,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// 手番
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SideToMove {
    White,
    Black,
}

impl SideToMove {
    pub fn from_i8(v: i8) -> RecordResult<Self> {
        match v {
            0 => Ok(SideToMove::White),
            1 => Ok(SideToMove::Black),
            other => Err(RecordError::InvalidSideToMove(other)),
        }
    }

    pub fn as_i8(self) -> i8 {
        match self {
            SideToMove::White => 0,
            SideToMove::Black => 1,
        }
    }
}

/// 教師局面1件
///
/// 構築時に全ての不変条件を検証するため、存在する値は常に正しくエンコードできる。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionRecord {
    side_to_move: SideToMove,
    active_features: Vec<u16>,
    legal_moves: Vec<u16>,
    best_move: u16,
}

impl PositionRecord {
    pub fn new(
        side_to_move: SideToMove,
        active_features: Vec<u16>,
        legal_moves: Vec<u16>,
        best_move: u16,
    ) -> RecordResult<Self> {
        check_feature_count(active_features.len())?;
        if let Some(&bad) = active_features.iter().find(|&&f| f as usize >= INPUT_SIZE) {
            return Err(RecordError::FeatureIndex(bad as i32));
        }
        check_move_count(legal_moves.len())?;
        if let Some(&bad) = legal_moves.iter().find(|&&m| m as usize >= OUTPUT_SIZE) {
            return Err(RecordError::MoveIndex(bad as i32));
        }
        check_best_move(best_move, &legal_moves)?;

        Ok(Self {
            side_to_move,
            active_features,
            legal_moves,
            best_move,
        })
    }

    pub fn side_to_move(&self) -> SideToMove {
        self.side_to_move
    }

    pub fn active_features(&self) -> &[u16] {
        &self.active_features
    }

    pub fn legal_moves(&self) -> &[u16] {
        &self.legal_moves
    }

    pub fn best_move(&self) -> u16 {
        self.best_move
    }

    /// エンコード後のバイト数
    pub fn encoded_len(&self) -> usize {
        1 + 1 + 2 * self.active_features.len() + 1 + 2 * self.legal_moves.len() + 2
    }

    /// 768 次元の one-hot 入力
    pub fn dense_features(&self) -> Vec<f32> {
        let mut dense = vec![0.0f32; INPUT_SIZE];
        for &f in &self.active_features {
            dense[f as usize] = 1.0;
        }
        dense
    }

    /// 4096 次元の非合法手マスク（合法手の位置だけ 0）
    pub fn illegal_mask(&self) -> IllegalMask {
        IllegalMask::from_legal_moves(&self.legal_moves)
    }

    pub fn target_index(&self) -> usize {
        self.best_move as usize
    }

    /// 4096 次元の one-hot 教師信号
    pub fn target_one_hot(&self) -> Vec<f32> {
        let mut target = vec![0.0f32; OUTPUT_SIZE];
        target[self.best_move as usize] = 1.0;
        target
    }
}

fn check_feature_count(n: usize) -> RecordResult<()> {
    if (MIN_ACTIVE_FEATURES..=MAX_ACTIVE_FEATURES).contains(&n) {
        Ok(())
    } else {
        Err(RecordError::FeatureCount(n))
    }
}

fn check_move_count(n: usize) -> RecordResult<()> {
    if (MIN_LEGAL_MOVES..=MAX_LEGAL_MOVES).contains(&n) {
        Ok(())
    } else {
        Err(RecordError::MoveCount(n))
    }
}

fn check_best_move(best_move: u16, legal_moves: &[u16]) -> RecordResult<()> {
    if best_move as usize >= OUTPUT_SIZE {
        return Err(RecordError::BestMoveIndex(best_move));
    }
    if !legal_moves.contains(&best_move) {
        return Err(RecordError::BestMoveNotLegal(best_move));
    }
    Ok(())
}

/// 先頭バイト以降の EOF はレコード途中での終端
fn mid_record(e: io::Error) -> RecordError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        RecordError::Truncated
    } else {
        RecordError::Io(e)
    }
}

fn read_indices<R: Read>(reader: &mut R, n: usize) -> RecordResult<Vec<i16>> {
    let mut buf = vec![0i16; n];
    reader.read_i16_into::<LittleEndian>(&mut buf).map_err(mid_record)?;
    Ok(buf)
}

/// レコードを1件読む
///
/// ストリームがレコード先頭でちょうど終わっていれば `Ok(None)`。
pub fn decode_record<R: Read>(reader: &mut R) -> RecordResult<Option<PositionRecord>> {
    let stm = match reader.read_i8() {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(RecordError::Io(e)),
    };
    let side_to_move = SideToMove::from_i8(stm)?;

    let num_features = reader.read_u8().map_err(mid_record)? as usize;
    check_feature_count(num_features)?;
    let mut active_features = Vec::with_capacity(num_features);
    for f in read_indices(reader, num_features)? {
        if f < 0 || f as usize >= INPUT_SIZE {
            return Err(RecordError::FeatureIndex(f as i32));
        }
        active_features.push(f as u16);
    }

    let num_moves = reader.read_u8().map_err(mid_record)? as usize;
    check_move_count(num_moves)?;
    let mut legal_moves = Vec::with_capacity(num_moves);
    for m in read_indices(reader, num_moves)? {
        if m < 0 || m as usize >= OUTPUT_SIZE {
            return Err(RecordError::MoveIndex(m as i32));
        }
        legal_moves.push(m as u16);
    }

    let best_move = reader.read_u16::<LittleEndian>().map_err(mid_record)?;
    check_best_move(best_move, &legal_moves)?;

    Ok(Some(PositionRecord {
        side_to_move,
        active_features,
        legal_moves,
        best_move,
    }))
}

/// レコードを1件書く（decode_record の逆変換）
pub fn encode_record<W: Write>(writer: &mut W, record: &PositionRecord) -> RecordResult<()> {
    writer.write_i8(record.side_to_move.as_i8())?;
    writer.write_u8(record.active_features.len() as u8)?;
    for &f in &record.active_features {
        writer.write_i16::<LittleEndian>(f as i16)?;
    }
    writer.write_u8(record.legal_moves.len() as u8)?;
    for &m in &record.legal_moves {
        writer.write_i16::<LittleEndian>(m as i16)?;
    }
    writer.write_u16::<LittleEndian>(record.best_move)?;
    Ok(())
}

/// ストリーム上のレコードを順に読むイテレータ
///
/// 最初のエラーで停止する（以降のレコード境界は信頼できないため）。
pub struct RecordReader<R> {
    reader: R,
    failed: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            failed: false,
        }
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = RecordResult<PositionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match decode_record(&mut self.reader) {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// テスト用の妥当なレコード
    pub(crate) fn sample_record(seed: u16) -> PositionRecord {
        let features = vec![seed % 64, 320 + seed % 64, 384 + 5 * 64 + (seed + 7) % 64];
        let moves = vec![12 * 64 + 28, 6 * 64 + 21, seed % 4096];
        PositionRecord::new(SideToMove::White, features, moves, 12 * 64 + 28).unwrap()
    }

    /// 手書きのバイト列（白番、特徴量3個、合法手2個、最善手 = 2番目）
    fn hand_written_bytes() -> Vec<u8> {
        let mut bytes = vec![0u8, 3];
        for f in [4i16, 60, 767] {
            bytes.extend_from_slice(&f.to_le_bytes());
        }
        bytes.push(2);
        for m in [796i16, 4095] {
            bytes.extend_from_slice(&m.to_le_bytes());
        }
        bytes.extend_from_slice(&4095u16.to_le_bytes());
        bytes
    }

    #[test]
    fn test_decode_hand_written_record() {
        let bytes = hand_written_bytes();
        let mut cursor = Cursor::new(&bytes);
        let record = decode_record(&mut cursor).unwrap().unwrap();

        assert_eq!(record.side_to_move(), SideToMove::White);
        assert_eq!(record.active_features(), &[4, 60, 767]);
        assert_eq!(record.legal_moves(), &[796, 4095]);
        assert_eq!(record.best_move(), 4095);
        assert_eq!(record.encoded_len(), bytes.len());

        // 直後はレコード先頭での終端
        assert!(decode_record(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_encode_of_decode_is_identity() {
        let bytes = hand_written_bytes();
        let record = decode_record(&mut Cursor::new(&bytes)).unwrap().unwrap();
        let mut out = Vec::new();
        encode_record(&mut out, &record).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_decode_of_encode_is_identity() {
        let record = PositionRecord::new(
            SideToMove::Black,
            (0..32).map(|i| i * 24).collect(),
            (0..218).map(|i| i * 18).collect(),
            217 * 18,
        )
        .unwrap();
        let mut out = Vec::new();
        encode_record(&mut out, &record).unwrap();
        assert_eq!(out.len(), record.encoded_len());

        let decoded = decode_record(&mut Cursor::new(&out)).unwrap().unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_empty_stream_is_end_of_stream() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(decode_record(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_two_features_is_corrupt() {
        let mut bytes = vec![0u8, 2];
        bytes.extend_from_slice(&1i16.to_le_bytes());
        bytes.extend_from_slice(&2i16.to_le_bytes());
        bytes.push(1);
        bytes.extend_from_slice(&10i16.to_le_bytes());
        bytes.extend_from_slice(&10u16.to_le_bytes());

        let err = decode_record(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, RecordError::FeatureCount(2)));
    }

    #[test]
    fn test_best_move_not_in_list_is_corrupt() {
        let mut bytes = hand_written_bytes();
        let n = bytes.len();
        bytes[n - 2..].copy_from_slice(&797u16.to_le_bytes());

        let err = decode_record(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, RecordError::BestMoveNotLegal(797)));
    }

    #[test]
    fn test_out_of_range_values_are_corrupt() {
        // side to move
        let mut bytes = hand_written_bytes();
        bytes[0] = 2;
        assert!(matches!(
            decode_record(&mut Cursor::new(&bytes)).unwrap_err(),
            RecordError::InvalidSideToMove(2)
        ));

        // 負の特徴量インデックス
        let mut bytes = hand_written_bytes();
        bytes[2..4].copy_from_slice(&(-1i16).to_le_bytes());
        assert!(matches!(
            decode_record(&mut Cursor::new(&bytes)).unwrap_err(),
            RecordError::FeatureIndex(-1)
        ));

        // 特徴量インデックス 768
        let mut bytes = hand_written_bytes();
        bytes[2..4].copy_from_slice(&768i16.to_le_bytes());
        assert!(matches!(
            decode_record(&mut Cursor::new(&bytes)).unwrap_err(),
            RecordError::FeatureIndex(768)
        ));

        // 合法手数 0
        let mut bytes = hand_written_bytes();
        bytes[8] = 0;
        assert!(matches!(
            decode_record(&mut Cursor::new(&bytes)).unwrap_err(),
            RecordError::MoveCount(0)
        ));

        // 合法手数 219
        let mut bytes = hand_written_bytes();
        bytes[8] = 219;
        assert!(matches!(
            decode_record(&mut Cursor::new(&bytes)).unwrap_err(),
            RecordError::MoveCount(219)
        ));

        // 指し手インデックス 4096
        let mut bytes = hand_written_bytes();
        bytes[9..11].copy_from_slice(&4096i16.to_le_bytes());
        assert!(matches!(
            decode_record(&mut Cursor::new(&bytes)).unwrap_err(),
            RecordError::MoveIndex(4096)
        ));

        // 最善手インデックス 4096
        let mut bytes = hand_written_bytes();
        let n = bytes.len();
        bytes[n - 2..].copy_from_slice(&4096u16.to_le_bytes());
        assert!(matches!(
            decode_record(&mut Cursor::new(&bytes)).unwrap_err(),
            RecordError::BestMoveIndex(4096)
        ));
    }

    #[test]
    fn test_truncated_record_is_corrupt() {
        let bytes = hand_written_bytes();
        for cut in 1..bytes.len() {
            let err = decode_record(&mut Cursor::new(&bytes[..cut])).unwrap_err();
            assert!(matches!(err, RecordError::Truncated), "cut at {cut}: {err}");
        }
    }

    #[test]
    fn test_constructor_enforces_invariants() {
        assert!(matches!(
            PositionRecord::new(SideToMove::White, vec![1, 2], vec![5], 5),
            Err(RecordError::FeatureCount(2))
        ));
        assert!(matches!(
            PositionRecord::new(SideToMove::White, vec![1, 2, 3], vec![], 5),
            Err(RecordError::MoveCount(0))
        ));
        assert!(matches!(
            PositionRecord::new(SideToMove::White, vec![1, 2, 3], vec![5, 6], 7),
            Err(RecordError::BestMoveNotLegal(7))
        ));
        assert!(matches!(
            PositionRecord::new(SideToMove::White, vec![1, 2, 768], vec![5], 5),
            Err(RecordError::FeatureIndex(768))
        ));
    }

    #[test]
    fn test_record_reader_stops_at_first_error() {
        let mut bytes = Vec::new();
        encode_record(&mut bytes, &sample_record(1)).unwrap();
        encode_record(&mut bytes, &sample_record(2)).unwrap();
        bytes.push(7); // 不正な手番

        let results: Vec<_> = RecordReader::new(Cursor::new(bytes)).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(RecordError::InvalidSideToMove(7))));
    }

    #[test]
    fn test_derived_arrays() {
        let record = sample_record(3);
        let dense = record.dense_features();
        assert_eq!(dense.len(), INPUT_SIZE);
        assert_eq!(dense.iter().filter(|&&x| x == 1.0).count(), 3);

        let mask = record.illegal_mask();
        assert_eq!(mask.legal_count(), 3);
        for &m in record.legal_moves() {
            assert!(!mask.is_illegal(m as usize));
        }

        let target = record.target_one_hot();
        assert_eq!(target.iter().sum::<f32>(), 1.0);
        assert_eq!(target[record.target_index()], 1.0);
    }
}
