use crate::dataset::PositionDataset;
use crate::error::{DatasetError, TrainError};
use crate::record::PositionRecord;
use crossbeam_channel::{Receiver, bounded};
use std::collections::BTreeMap;
use std::thread::JoinHandle;

enum BatchMsg {
    Ok(usize, Vec<PositionRecord>),
    Err(usize, DatasetError),
}

/// 先読みバッチローダー
///
/// ワーカー `w` (N 個中) はバッチ `w, w+N, w+2N, ...` を読み込み、チャネルへ送る。
/// 受信側は並べ替えバッファで昇順に戻すため、学習順序は決定的になる。
pub struct BatchLoader {
    rx: Option<Receiver<BatchMsg>>,
    workers: Vec<JoinHandle<()>>,
    pending: BTreeMap<usize, Vec<PositionRecord>>,
    next: usize,
    num_batches: usize,
    failed: bool,
}

impl BatchLoader {
    /// 1エポック分の読み込みを開始する
    pub fn start(dataset: &PositionDataset, num_workers: usize, prefetch_batches: usize) -> Self {
        let num_batches = dataset.num_batches();
        let num_workers = num_workers.clamp(1, num_batches.max(1));
        let (tx, rx) = bounded::<BatchMsg>(prefetch_batches.max(1));

        let mut workers = Vec::with_capacity(num_workers);
        for w in 0..num_workers {
            let tx = tx.clone();
            let mut ds = dataset.fork();
            let handle = std::thread::spawn(move || {
                for k in (w..num_batches).step_by(num_workers) {
                    let msg = match ds.take_batch(k) {
                        Ok(batch) => BatchMsg::Ok(k, batch),
                        Err(e) => {
                            let _ = tx.send(BatchMsg::Err(k, e));
                            return;
                        }
                    };
                    if tx.send(msg).is_err() {
                        break; // receiver dropped
                    }
                }
            });
            workers.push(handle);
        }

        Self {
            rx: Some(rx),
            workers,
            pending: BTreeMap::new(),
            next: 0,
            num_batches,
            failed: false,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    /// 次のバッチ（バッチ番号順）
    pub fn next_batch(&mut self) -> Option<Result<(usize, Vec<PositionRecord>), TrainError>> {
        if self.failed || self.next >= self.num_batches {
            return None;
        }
        let k = self.next;
        loop {
            if let Some(batch) = self.pending.remove(&k) {
                self.next += 1;
                return Some(Ok((k, batch)));
            }
            let received = match &self.rx {
                Some(rx) => rx.recv(),
                None => return None,
            };
            match received {
                Ok(BatchMsg::Ok(index, batch)) => {
                    self.pending.insert(index, batch);
                }
                Ok(BatchMsg::Err(index, e)) => {
                    log::error!("Failed to load batch {index}: {e}");
                    self.failed = true;
                    return Some(Err(e.into()));
                }
                Err(_) => {
                    self.failed = true;
                    return Some(Err(TrainError::LoaderDisconnected(k)));
                }
            }
        }
    }

    /// チャネルを閉じてワーカーを待つ
    pub fn finish(&mut self) {
        self.rx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.pending.clear();
    }
}

impl Iterator for BatchLoader {
    type Item = Result<(usize, Vec<PositionRecord>), TrainError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}

impl Drop for BatchLoader {
    fn drop(&mut self) {
        self.finish();
    }
}
