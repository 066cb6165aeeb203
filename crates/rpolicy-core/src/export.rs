//! パラメータの保存・読み込み
//!
//! - 生バイナリ (`.bin`): ヘッダなし。w1 (768×H, 入力優先), b1 (H),
//!   w2 (H×4096, 隠れ層優先), b2 (4096) を f32 LE で順に並べる。
//! - 量子化バイナリ: 同じ並びで、各値を ×255 して四捨五入（0 から遠い方へ）した
//!   整数値を f32 として格納する。
//! - JSON: `conn1.weight` ([H][768]), `conn1.bias`, `conn2.weight` ([4096][H]),
//!   `conn2.bias` をキーとするオブジェクト。
//! - チェックポイント (`.ckpt`): マジック `RPOLICY1`、u32 LE の隠れ層幅、
//!   続けて生バイナリと同じ並び。

use crate::error::{NetworkError, NetworkResult};
use crate::network::{PolicyNetwork, parameter_count};
use crate::{INPUT_SIZE, OUTPUT_SIZE, QUANTIZATION_SCALE};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const CHECKPOINT_MAGIC: &[u8; 8] = b"RPOLICY1";
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

fn write_tensors<W: Write>(writer: &mut W, tensors: [&[f32]; 4]) -> io::Result<()> {
    for tensor in tensors {
        for &x in tensor {
            writer.write_f32::<LittleEndian>(x)?;
        }
    }
    Ok(())
}

fn read_tensors<R: Read>(reader: &mut R, hidden_size: usize) -> NetworkResult<PolicyNetwork> {
    // ヘッダの幅から事前確保しない。expected + 1 バイトまで読んで長さを比べる
    let expected = hidden_size
        .checked_mul(INPUT_SIZE + 1 + OUTPUT_SIZE)
        .and_then(|n| n.checked_add(OUTPUT_SIZE))
        .and_then(|n| n.checked_mul(4))
        .ok_or(NetworkError::InvalidHiddenSize(hidden_size))?;
    let mut bytes = Vec::new();
    reader
        .by_ref()
        .take((expected as u64).saturating_add(1))
        .read_to_end(&mut bytes)?;
    if bytes.len() != expected {
        return Err(NetworkError::Length {
            expected,
            actual: bytes.len(),
        });
    }

    let mut values = vec![0.0f32; parameter_count(hidden_size)];
    LittleEndian::read_f32_into(&bytes, &mut values);

    let b2 = values.split_off(values.len() - OUTPUT_SIZE);
    let w2 = values.split_off(values.len() - hidden_size * OUTPUT_SIZE);
    let b1 = values.split_off(values.len() - hidden_size);
    let w1 = values;
    PolicyNetwork::from_parts(hidden_size, w1, b1, w2, b2)
}

/// 生バイナリを書き出す
pub fn write_raw<W: Write>(writer: &mut W, network: &PolicyNetwork) -> NetworkResult<()> {
    write_tensors(writer, network.tensors())?;
    Ok(())
}

pub fn save_raw<P: AsRef<Path>>(network: &PolicyNetwork, path: P) -> NetworkResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_raw(&mut writer, network)?;
    writer.flush()?;
    Ok(())
}

/// 生バイナリを読む（隠れ層幅はファイルに含まれないので指定する）
pub fn read_raw<R: Read>(reader: &mut R, hidden_size: usize) -> NetworkResult<PolicyNetwork> {
    if hidden_size == 0 {
        return Err(NetworkError::InvalidHiddenSize(hidden_size));
    }
    read_tensors(reader, hidden_size)
}

pub fn write_checkpoint<W: Write>(writer: &mut W, network: &PolicyNetwork) -> NetworkResult<()> {
    writer.write_all(CHECKPOINT_MAGIC)?;
    writer.write_u32::<LittleEndian>(network.hidden_size() as u32)?;
    write_raw(writer, network)
}

pub fn read_checkpoint<R: Read>(reader: &mut R) -> NetworkResult<PolicyNetwork> {
    let mut magic = [0u8; 8];
    match reader.read_exact(&mut magic) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(NetworkError::BadMagic),
        Err(e) => return Err(e.into()),
    }
    if &magic != CHECKPOINT_MAGIC {
        return Err(NetworkError::BadMagic);
    }
    let hidden_size = reader.read_u32::<LittleEndian>()? as usize;
    if hidden_size == 0 {
        return Err(NetworkError::InvalidHiddenSize(hidden_size));
    }
    read_tensors(reader, hidden_size)
}

pub fn save_checkpoint<P: AsRef<Path>>(network: &PolicyNetwork, path: P) -> NetworkResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_checkpoint(&mut writer, network)?;
    writer.flush()?;
    Ok(())
}

pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> NetworkResult<PolicyNetwork> {
    let mut reader = BufReader::new(File::open(path)?);
    read_checkpoint(&mut reader)
}

/// チェックポイントを読み、隠れ層幅が想定と一致するか確認する
pub fn load_checkpoint_expecting<P: AsRef<Path>>(
    path: P,
    hidden_size: usize,
) -> NetworkResult<PolicyNetwork> {
    let network = load_checkpoint(path)?;
    if network.hidden_size() != hidden_size {
        return Err(NetworkError::HiddenSizeMismatch {
            expected: hidden_size,
            actual: network.hidden_size(),
        });
    }
    Ok(network)
}

#[inline]
pub fn quantize_value(x: f32) -> f32 {
    (x * QUANTIZATION_SCALE).round()
}

/// ×255 して丸めたパラメータ
///
/// 元のネットワークは変更しない。
#[derive(Clone, Debug, PartialEq)]
pub struct QuantizedNetwork {
    hidden_size: usize,
    w1: Vec<f32>,
    b1: Vec<f32>,
    w2: Vec<f32>,
    b2: Vec<f32>,
}

impl QuantizedNetwork {
    pub fn from_network(network: &PolicyNetwork) -> Self {
        let q = |t: &[f32]| t.iter().map(|&x| quantize_value(x)).collect::<Vec<_>>();
        Self {
            hidden_size: network.hidden_size(),
            w1: q(network.w1()),
            b1: q(network.b1()),
            w2: q(network.w2()),
            b2: q(network.b2()),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn tensors(&self) -> [&[f32]; 4] {
        [&self.w1, &self.b1, &self.w2, &self.b2]
    }

    /// 整数としての値（テンソル順）
    pub fn to_i32(&self) -> [Vec<i32>; 4] {
        self.tensors()
            .map(|t| t.iter().map(|&x| x as i32).collect::<Vec<_>>())
    }

    pub fn write_raw<W: Write>(&self, writer: &mut W) -> NetworkResult<()> {
        write_tensors(writer, self.tensors())?;
        Ok(())
    }

    pub fn save_raw<P: AsRef<Path>>(&self, path: P) -> NetworkResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_raw(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn to_json(&self) -> LayerJson {
        LayerJson::from_tensors(self.hidden_size, self.tensors())
    }
}

pub fn quantize(network: &PolicyNetwork) -> QuantizedNetwork {
    QuantizedNetwork::from_network(network)
}

/// 層名をキーとする JSON 表現（nn.Linear と同じ [出力][入力] の向き）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerJson {
    #[serde(rename = "conn1.weight")]
    pub conn1_weight: Vec<Vec<f32>>,
    #[serde(rename = "conn1.bias")]
    pub conn1_bias: Vec<f32>,
    #[serde(rename = "conn2.weight")]
    pub conn2_weight: Vec<Vec<f32>>,
    #[serde(rename = "conn2.bias")]
    pub conn2_bias: Vec<f32>,
}

impl LayerJson {
    fn from_tensors(hidden_size: usize, [w1, b1, w2, b2]: [&[f32]; 4]) -> Self {
        let h = hidden_size;
        let conn1_weight = (0..h)
            .map(|j| (0..INPUT_SIZE).map(|f| w1[f * h + j]).collect())
            .collect();
        let conn2_weight = (0..OUTPUT_SIZE)
            .map(|o| (0..h).map(|j| w2[j * OUTPUT_SIZE + o]).collect())
            .collect();
        Self {
            conn1_weight,
            conn1_bias: b1.to_vec(),
            conn2_weight,
            conn2_bias: b2.to_vec(),
        }
    }

    pub fn from_network(network: &PolicyNetwork) -> Self {
        Self::from_tensors(network.hidden_size(), network.tensors())
    }

    /// ネットワークに戻す（形が合わなければ Length エラー）
    pub fn into_network(self) -> NetworkResult<PolicyNetwork> {
        let h = self.conn1_bias.len();
        let shape_ok = self.conn1_weight.len() == h
            && self.conn1_weight.iter().all(|row| row.len() == INPUT_SIZE)
            && self.conn2_weight.len() == OUTPUT_SIZE
            && self.conn2_weight.iter().all(|row| row.len() == h)
            && self.conn2_bias.len() == OUTPUT_SIZE;
        if h == 0 || !shape_ok {
            let actual = self.conn1_weight.iter().map(Vec::len).sum::<usize>()
                + self.conn1_bias.len()
                + self.conn2_weight.iter().map(Vec::len).sum::<usize>()
                + self.conn2_bias.len();
            return Err(NetworkError::Length {
                expected: parameter_count(h) * 4,
                actual: actual * 4,
            });
        }

        let mut w1 = vec![0.0f32; INPUT_SIZE * h];
        for (j, row) in self.conn1_weight.iter().enumerate() {
            for (f, &w) in row.iter().enumerate() {
                w1[f * h + j] = w;
            }
        }
        let mut w2 = vec![0.0f32; h * OUTPUT_SIZE];
        for (o, row) in self.conn2_weight.iter().enumerate() {
            for (j, &w) in row.iter().enumerate() {
                w2[j * OUTPUT_SIZE + o] = w;
            }
        }
        PolicyNetwork::from_parts(h, w1, self.conn1_bias, w2, self.conn2_bias)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> NetworkResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> NetworkResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

pub fn save_json<P: AsRef<Path>>(network: &PolicyNetwork, path: P) -> NetworkResult<()> {
    LayerJson::from_network(network).save(path)
}
