//! 768 → H → 4096 のマスク付き方策ネットワーク
//!
//! パラメータはエクスポート時と同じ並びのフラットな `Vec<f32>` で持つ:
//! `w1[feature * H + j]`, `b1[j]`, `w2[j * 4096 + move]`, `b2[move]`。

use crate::config::NetworkConfig;
use crate::error::{NetworkError, NetworkResult};
use crate::features::{FeatureSource, IllegalMask};
use crate::record::PositionRecord;
use crate::{ILLEGAL_LOGIT, INPUT_SIZE, OUTPUT_SIZE};
use rand::Rng;

#[derive(Clone, Debug, PartialEq)]
pub struct PolicyNetwork {
    hidden_size: usize,
    pub(crate) w1: Vec<f32>,
    pub(crate) b1: Vec<f32>,
    pub(crate) w2: Vec<f32>,
    pub(crate) b2: Vec<f32>,
}

impl PolicyNetwork {
    /// 全パラメータ 0 のネットワーク
    pub fn zeroed(hidden_size: usize) -> NetworkResult<Self> {
        if hidden_size == 0 {
            return Err(NetworkError::InvalidHiddenSize(hidden_size));
        }
        Ok(Self {
            hidden_size,
            w1: vec![0.0; INPUT_SIZE * hidden_size],
            b1: vec![0.0; hidden_size],
            w2: vec![0.0; hidden_size * OUTPUT_SIZE],
            b2: vec![0.0; OUTPUT_SIZE],
        })
    }

    /// 全パラメータを [-1, 1) の一様乱数で初期化
    pub fn new_random(config: &NetworkConfig, rng: &mut impl Rng) -> NetworkResult<Self> {
        let mut net = Self::zeroed(config.hidden_size)?;
        for tensor in net.tensors_mut() {
            for w in tensor.iter_mut() {
                *w = rng.random_range(-1.0..1.0);
            }
        }
        Ok(net)
    }

    /// エクスポート順のテンソルから組み立てる
    pub fn from_parts(
        hidden_size: usize,
        w1: Vec<f32>,
        b1: Vec<f32>,
        w2: Vec<f32>,
        b2: Vec<f32>,
    ) -> NetworkResult<Self> {
        if hidden_size == 0 {
            return Err(NetworkError::InvalidHiddenSize(hidden_size));
        }
        let expected = parameter_count(hidden_size);
        let actual = w1.len() + b1.len() + w2.len() + b2.len();
        if w1.len() != INPUT_SIZE * hidden_size
            || b1.len() != hidden_size
            || w2.len() != hidden_size * OUTPUT_SIZE
            || b2.len() != OUTPUT_SIZE
        {
            return Err(NetworkError::Length {
                expected: expected * 4,
                actual: actual * 4,
            });
        }
        Ok(Self {
            hidden_size,
            w1,
            b1,
            w2,
            b2,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn parameter_count(&self) -> usize {
        parameter_count(self.hidden_size)
    }

    pub fn w1(&self) -> &[f32] {
        &self.w1
    }

    pub fn b1(&self) -> &[f32] {
        &self.b1
    }

    pub fn w2(&self) -> &[f32] {
        &self.w2
    }

    pub fn b2(&self) -> &[f32] {
        &self.b2
    }

    /// エクスポート順 (w1, b1, w2, b2)
    pub fn tensors(&self) -> [&[f32]; 4] {
        [&self.w1, &self.b1, &self.w2, &self.b2]
    }

    pub(crate) fn tensors_mut(&mut self) -> [&mut [f32]; 4] {
        [&mut self.w1, &mut self.b1, &mut self.w2, &mut self.b2]
    }

    fn hidden_into<F: FeatureSource + ?Sized>(&self, features: &F, pre: &mut [f32]) {
        let h = self.hidden_size;
        pre.copy_from_slice(&self.b1);
        for &f in features.active_features() {
            let f = f as usize;
            debug_assert!(f < INPUT_SIZE, "feature index {f} out of range");
            let row = &self.w1[f * h..(f + 1) * h];
            for (acc, w) in pre.iter_mut().zip(row) {
                *acc += w;
            }
        }
    }

    /// ReLU 後の隠れ層
    pub fn hidden<F: FeatureSource + ?Sized>(&self, features: &F) -> Vec<f32> {
        let mut hidden = vec![0.0; self.hidden_size];
        self.hidden_into(features, &mut hidden);
        for x in hidden.iter_mut() {
            *x = x.max(0.0);
        }
        hidden
    }

    /// 指定した出力1つのロジット
    #[inline]
    pub fn output_logit(&self, hidden: &[f32], move_index: usize) -> f32 {
        let mut out = self.b2[move_index];
        for (j, &a) in hidden.iter().enumerate() {
            if a != 0.0 {
                out += a * self.w2[j * OUTPUT_SIZE + move_index];
            }
        }
        out
    }

    fn raw_from_hidden(&self, hidden: &[f32]) -> Vec<f32> {
        let mut raw = self.b2.clone();
        for (j, &a) in hidden.iter().enumerate() {
            if a == 0.0 {
                continue;
            }
            let row = &self.w2[j * OUTPUT_SIZE..(j + 1) * OUTPUT_SIZE];
            for (o, w) in raw.iter_mut().zip(row) {
                *o += a * w;
            }
        }
        raw
    }

    /// マスク前の 4096 ロジット
    pub fn forward_raw<F: FeatureSource + ?Sized>(&self, features: &F) -> Vec<f32> {
        let hidden = self.hidden(features);
        self.raw_from_hidden(&hidden)
    }

    /// 非合法手を `ILLEGAL_LOGIT` に置き換えた 4096 ロジット
    pub fn forward<F: FeatureSource + ?Sized>(&self, features: &F, mask: &IllegalMask) -> Vec<f32> {
        let mut logits = self.forward_raw(features);
        apply_mask(&mut logits, mask);
        logits
    }

    /// 1局面分のクロスエントロピー損失を計算し、勾配を `grads` に加算する
    ///
    /// マスク後の softmax では非合法手の確率が厳密に 0 になるので、合法手の
    /// 出力だけを計算すれば 4096 全体で計算した場合と同じ結果になる。
    pub fn accumulate_gradients(&self, record: &PositionRecord, grads: &mut Gradients) -> f32 {
        let h = self.hidden_size;
        let mut hidden_pre = vec![0.0; h];
        self.hidden_into(record, &mut hidden_pre);
        let hidden: Vec<f32> = hidden_pre.iter().map(|x| x.max(0.0)).collect();

        // 成りの重複インデックスは1つの出力
        let mut legal = record.legal_moves().to_vec();
        legal.sort_unstable();
        legal.dedup();

        let logits: Vec<f32> = legal
            .iter()
            .map(|&m| self.output_logit(&hidden, m as usize))
            .collect();
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|&z| (z - max).exp()).collect();
        let sum: f32 = exps.iter().sum();

        let target = record.best_move();
        let mut loss = 0.0;
        let mut d_hidden = vec![0.0f32; h];
        for ((&m, &z), &e) in legal.iter().zip(&logits).zip(&exps) {
            let o = m as usize;
            let p = e / sum;
            let g = if m == target {
                loss = sum.ln() - (z - max);
                p - 1.0
            } else {
                p
            };
            grads.b2[o] += g;
            for j in 0..h {
                let idx = j * OUTPUT_SIZE + o;
                grads.w2[idx] += g * hidden[j];
                d_hidden[j] += g * self.w2[idx];
            }
        }

        for j in 0..h {
            if hidden_pre[j] <= 0.0 {
                d_hidden[j] = 0.0;
            }
        }
        for (gb, &d) in grads.b1.iter_mut().zip(&d_hidden) {
            *gb += d;
        }
        for &f in record.active_features() {
            let row = &mut grads.w1[f as usize * h..(f as usize + 1) * h];
            for (gw, &d) in row.iter_mut().zip(&d_hidden) {
                *gw += d;
            }
        }
        loss
    }
}

pub fn parameter_count(hidden_size: usize) -> usize {
    INPUT_SIZE * hidden_size + hidden_size + hidden_size * OUTPUT_SIZE + OUTPUT_SIZE
}

/// 非合法手のロジットを `ILLEGAL_LOGIT` で上書き
pub fn apply_mask(logits: &mut [f32], mask: &IllegalMask) {
    for (i, z) in logits.iter_mut().enumerate() {
        if mask.is_illegal(i) {
            *z = ILLEGAL_LOGIT;
        }
    }
}

/// 数値的に安定な softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&z| (z - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// パラメータと同じ並びの勾配バッファ
#[derive(Clone, Debug)]
pub struct Gradients {
    pub w1: Vec<f32>,
    pub b1: Vec<f32>,
    pub w2: Vec<f32>,
    pub b2: Vec<f32>,
}

impl Gradients {
    pub fn zeros(hidden_size: usize) -> Self {
        Self {
            w1: vec![0.0; INPUT_SIZE * hidden_size],
            b1: vec![0.0; hidden_size],
            w2: vec![0.0; hidden_size * OUTPUT_SIZE],
            b2: vec![0.0; OUTPUT_SIZE],
        }
    }

    pub fn tensors(&self) -> [&[f32]; 4] {
        [&self.w1, &self.b1, &self.w2, &self.b2]
    }

    fn tensors_mut(&mut self) -> [&mut [f32]; 4] {
        [&mut self.w1, &mut self.b1, &mut self.w2, &mut self.b2]
    }

    pub fn add_assign(&mut self, other: &Gradients) {
        for (dst, src) in self.tensors_mut().into_iter().zip(other.tensors()) {
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s;
            }
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for tensor in self.tensors_mut() {
            for g in tensor.iter_mut() {
                *g *= factor;
            }
        }
    }
}
