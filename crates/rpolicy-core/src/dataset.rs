//! 教師局面データセット
//!
//! 構築時にファイルを一度だけ先頭から走査し、`batch_size` 件ごとのレコード
//! 開始オフセットを記録する。末尾の端数バッチは捨てる。バッチの読み込みは
//! 毎回ファイルを開き直し、直近の1バッチだけをキャッシュする。

use crate::config::DatasetConfig;
use crate::error::{DatasetError, DatasetResult, RecordError};
use crate::record::{PositionRecord, RecordReader, decode_record};
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub struct PositionDataset {
    path: PathBuf,
    batch_size: usize,
    /// 各バッチ先頭レコードのバイトオフセット
    batch_offsets: Vec<u64>,
    total_records: u64,
    /// (バッチ番号, レコード)
    cache: Option<(usize, Vec<PositionRecord>)>,
    batch_loads: usize,
}

impl PositionDataset {
    /// ファイルを走査してバッチ索引を作る
    pub fn open<P: AsRef<Path>>(path: P, config: &DatasetConfig) -> DatasetResult<Self> {
        let path = path.as_ref().to_path_buf();
        let batch_size = config.batch_size;
        if batch_size == 0 {
            return Err(DatasetError::InvalidBatchSize(batch_size));
        }

        let file = File::open(&path).map_err(|source| DatasetError::Open {
            path: path.clone(),
            source,
        })?;

        let mut batch_offsets = Vec::new();
        let mut offset = 0u64;
        let mut records = 0u64;
        for record in RecordReader::new(BufReader::new(file)) {
            let record = match record {
                Ok(record) => record,
                Err(source) => {
                    return Err(DatasetError::Corrupt {
                        offset,
                        record: records,
                        source,
                    });
                }
            };
            if records % batch_size as u64 == 0 {
                batch_offsets.push(offset);
            }
            offset += record.encoded_len() as u64;
            records += 1;
        }

        // 端数バッチの開始位置は不要
        let full_batches = (records / batch_size as u64) as usize;
        batch_offsets.truncate(full_batches);
        if full_batches == 0 {
            return Err(DatasetError::InsufficientData {
                records,
                batch_size,
            });
        }

        let dropped = records - (full_batches * batch_size) as u64;
        log::info!(
            "Indexed {}: {records} records, {full_batches} batches of {batch_size} ({dropped} dropped)",
            path.display()
        );

        Ok(Self {
            path,
            batch_size,
            batch_offsets,
            total_records: records,
            cache: None,
            batch_loads: 0,
        })
    }

    /// 同じファイルと索引を使う独立したインスタンス（キャッシュは共有しない）
    ///
    /// 読み込みワーカーごとに1つずつ持たせる。
    pub fn fork(&self) -> Self {
        Self {
            path: self.path.clone(),
            batch_size: self.batch_size,
            batch_offsets: self.batch_offsets.clone(),
            total_records: self.total_records,
            cache: None,
            batch_loads: 0,
        }
    }

    /// 使用可能なレコード数（batch_size の倍数）
    pub fn len(&self) -> usize {
        self.batch_offsets.len() * self.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.batch_offsets.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        self.batch_offsets.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 捨てた端数も含むファイル内のレコード数
    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ディスクからのバッチ読み込み回数
    pub fn batch_loads(&self) -> usize {
        self.batch_loads
    }

    /// バッチを取得する（キャッシュ済みならディスクを読まない）
    pub fn get_batch(&mut self, batch_index: usize) -> DatasetResult<&[PositionRecord]> {
        let cached = matches!(&self.cache, Some((k, _)) if *k == batch_index);
        if !cached {
            let records = self.load_batch(batch_index)?;
            self.cache = Some((batch_index, records));
        }
        match &self.cache {
            Some((_, records)) => Ok(records.as_slice()),
            None => Err(DatasetError::BatchOutOfRange {
                index: batch_index,
                batches: self.num_batches(),
            }),
        }
    }

    /// レコードを1件取得する
    ///
    /// 所属するバッチ単位でキャッシュするため、昇順アクセスでのみ効率が良い。
    pub fn get(&mut self, record_index: usize) -> DatasetResult<&PositionRecord> {
        let len = self.len();
        if record_index >= len {
            return Err(DatasetError::RecordOutOfRange {
                index: record_index,
                len,
            });
        }
        let batch_size = self.batch_size;
        let batch = self.get_batch(record_index / batch_size)?;
        Ok(&batch[record_index % batch_size])
    }

    /// バッチを読み込んで所有権ごと返す
    pub fn take_batch(&mut self, batch_index: usize) -> DatasetResult<Vec<PositionRecord>> {
        if let Some((k, _)) = &self.cache {
            if *k == batch_index {
                if let Some((_, records)) = self.cache.take() {
                    return Ok(records);
                }
            }
        }
        self.load_batch(batch_index)
    }

    fn load_batch(&mut self, batch_index: usize) -> DatasetResult<Vec<PositionRecord>> {
        let offset = *self
            .batch_offsets
            .get(batch_index)
            .ok_or(DatasetError::BatchOutOfRange {
                index: batch_index,
                batches: self.batch_offsets.len(),
            })?;

        // ハンドルはこの読み込みの間だけ保持する
        let file = File::open(&self.path).map_err(|source| DatasetError::Open {
            path: self.path.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset))?;

        let first_record = (batch_index * self.batch_size) as u64;
        let mut records = Vec::with_capacity(self.batch_size);
        let mut pos = offset;
        for i in 0..self.batch_size {
            let corrupt = |source| DatasetError::Corrupt {
                offset: pos,
                record: first_record + i as u64,
                source,
            };
            let record = decode_record(&mut reader)
                .map_err(corrupt)?
                .ok_or_else(|| corrupt(RecordError::Truncated))?;
            pos += record.encoded_len() as u64;
            records.push(record);
        }

        self.batch_loads += 1;
        log::debug!("Loaded batch {batch_index} from offset {offset}");
        Ok(records)
    }
}
