use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::time::Instant;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::utils::{l2_squared, write_atomic};

const MAGIC: &[u8; 4] = b"CVIX";
const VERSION: u32 = 1;
/// magic + version + dimension + count
const HEADER_SIZE: u64 = 4 + 4 + 4 + 8;

/// 一个近邻结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// 向量在索引中的位置
    pub position: usize,
    /// L2 距离的平方
    pub distance: f32,
}

/// 只追加的精确 L2 向量索引
///
/// 向量的位置等于插入顺序，插入后不会被修改或移动。
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "dimension must be positive");
        Self { dimension, data: vec![] }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 已添加的向量数量
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&[f32]> {
        self.data.chunks_exact(self.dimension).nth(position)
    }

    /// 追加一个向量，返回它的位置
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.len() != self.dimension {
            return Err(Error::InvalidInput(format!(
                "向量维度为 {}，索引维度为 {}",
                vector.len(),
                self.dimension
            )));
        }
        let position = self.len();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    /// 暴力扫描所有向量，返回距离最小的 k 个结果
    ///
    /// 结果按距离升序排列，距离相同时位置较小者在前。
    /// k 大于索引大小时只返回现有的全部向量，不做填充。
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(Error::InvalidInput(format!(
                "查询向量维度为 {}，索引维度为 {}",
                query.len(),
                self.dimension
            )));
        }
        if k == 0 || self.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let mut neighbors = self
            .data
            .par_chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, v)| Neighbor { position, distance: l2_squared(query, v) })
            .collect::<Vec<_>>();

        let k = k.min(neighbors.len());
        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, compare);
            neighbors.truncate(k);
        }
        neighbors.sort_unstable_by(compare);

        debug!("扫描 {} 个向量，耗时 {:.2}ms", self.len(), start.elapsed().as_secs_f32() * 1000.);
        Ok(neighbors)
    }

    /// 丢弃末尾的向量，只用于修复写入中断的快照
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dimension);
    }

    /// 保存到文件，先写入临时文件再替换
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_atomic(path, |w| {
            w.write_all(MAGIC)?;
            w.write_u32::<LittleEndian>(VERSION)?;
            w.write_u32::<LittleEndian>(self.dimension as u32)?;
            w.write_u64::<LittleEndian>(self.len() as u64)?;
            for &v in &self.data {
                w.write_f32::<LittleEndian>(v)?;
            }
            Ok(())
        })
        .map_err(|e| Error::IndexPersistence(format!("写入 {} 失败: {}", path.display(), e)))
    }

    /// 从文件加载，并检查维度是否与特征提取器一致
    pub fn load(path: impl AsRef<Path>, expected_dimension: usize) -> Result<Self> {
        let path = path.as_ref();
        let err = |msg: String| Error::IndexPersistence(format!("{}: {}", path.display(), msg));
        let io_err = |e: std::io::Error| err(e.to_string());

        let file = File::open(path).map_err(io_err)?;
        let file_len = file.metadata().map_err(io_err)?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(io_err)?;
        if &magic != MAGIC {
            return Err(err("不是索引文件".to_string()));
        }
        let version = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        if version != VERSION {
            return Err(err(format!("不支持的索引版本 {}", version)));
        }
        let dimension = reader.read_u32::<LittleEndian>().map_err(io_err)? as usize;
        if dimension != expected_dimension {
            return Err(err(format!("索引维度为 {}，期望维度为 {}", dimension, expected_dimension)));
        }
        let count = reader.read_u64::<LittleEndian>().map_err(io_err)?;

        // 先根据文件大小校验数量，避免损坏的头部导致超大内存分配
        let expected_len = (count as u128) * (dimension as u128) * 4 + HEADER_SIZE as u128;
        if expected_len != file_len as u128 {
            return Err(err(format!(
                "文件大小为 {} 字节，头部声明 {} 个向量需要 {} 字节",
                file_len, count, expected_len
            )));
        }

        let mut data = vec![0f32; count as usize * dimension];
        reader.read_f32_into::<LittleEndian>(&mut data).map_err(io_err)?;
        debug!("从 {} 加载了 {} 个向量", path.display(), count);
        Ok(Self { dimension, data })
    }
}

fn compare(a: &Neighbor, b: &Neighbor) -> std::cmp::Ordering {
    a.distance.total_cmp(&b.distance).then(a.position.cmp(&b.position))
}
