//! Error types for the policy trainer
//!
//! 破損データは常に致命的エラーとして扱う。レコード境界は直前のレコードを
//! 正しく読めた場合にしか分からないため、スキップして続行することはしない。

use std::path::PathBuf;

/// 1レコードのデコード／エンコードで発生するエラー
#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    /// side_to_move が 0/1 以外
    #[error("invalid side to move: {0}")]
    InvalidSideToMove(i8),

    /// アクティブ特徴量数が [3, 32] の範囲外
    #[error("active feature count {0} out of range [3, 32]")]
    FeatureCount(usize),

    /// 特徴量インデックスが [0, 768) の範囲外
    #[error("feature index {0} out of range [0, 768)")]
    FeatureIndex(i32),

    /// 合法手数が [1, 218] の範囲外
    #[error("legal move count {0} out of range [1, 218]")]
    MoveCount(usize),

    /// 指し手インデックスが [0, 4096) の範囲外
    #[error("move index {0} out of range [0, 4096)")]
    MoveIndex(i32),

    /// 最善手インデックスが [0, 4096) の範囲外
    #[error("best move index {0} out of range [0, 4096)")]
    BestMoveIndex(u16),

    /// 最善手が合法手リストに含まれていない
    #[error("best move index {0} is not among the legal moves")]
    BestMoveNotLegal(u16),

    /// レコードの途中でストリームが終了した
    #[error("stream ended in the middle of a record")]
    Truncated,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// データセットの構築・バッチ読み込みで発生するエラー
#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 破損レコード（読み込み全体を中断する）
    #[error("corrupt record #{record} at byte offset {offset}: {source}")]
    Corrupt {
        offset: u64,
        record: u64,
        #[source]
        source: RecordError,
    },

    /// 1バッチ分のレコードすら存在しない
    #[error("insufficient data: {records} records, batch size {batch_size}")]
    InsufficientData { records: u64, batch_size: usize },

    #[error("batch index {index} out of range ({batches} batches)")]
    BatchOutOfRange { index: usize, batches: usize },

    #[error("record index {index} out of range ({len} records)")]
    RecordOutOfRange { index: usize, len: usize },

    #[error("invalid batch size: {0}")]
    InvalidBatchSize(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// パラメータの保存・読み込みで発生するエラー
#[derive(thiserror::Error, Debug)]
pub enum NetworkError {
    #[error("not a policy checkpoint (bad magic)")]
    BadMagic,

    #[error("hidden size mismatch: expected {expected}, got {actual}")]
    HiddenSizeMismatch { expected: usize, actual: usize },

    /// Parameter buffer length mismatch
    #[error("parameter length mismatch: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("invalid hidden size: {0}")]
    InvalidHiddenSize(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// 局面からレコードを組み立てる際のエラー
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("position has no legal moves")]
    NoLegalMoves,

    #[error("best move {0} is not legal in this position")]
    IllegalBestMove(String),

    #[error("unsupported move {0}")]
    UnsupportedMove(String),

    /// `FEN|uci` 形式になっていない行
    #[error("malformed line: {0}")]
    MalformedLine(String),

    #[error("invalid FEN {fen}: {reason}")]
    InvalidFen { fen: String, reason: String },

    #[error("invalid UCI move {0}")]
    InvalidUci(String),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// 設定ファイルのエラー
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// 学習ループのエラー
#[derive(thiserror::Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// ローダーのワーカーが予期せず終了した
    #[error("batch loader stopped before delivering batch {0}")]
    LoaderDisconnected(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type RecordResult<T> = Result<T, RecordError>;
pub type DatasetResult<T> = Result<T, DatasetError>;
pub type NetworkResult<T> = Result<T, NetworkError>;
