use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::write_atomic;

/// 专辑记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRecord {
    /// 封面图片的定位符，由外部存储解析
    pub file_name: String,
    /// 外部目录中的专辑 ID
    pub id: String,
    /// 专辑名
    pub name: String,
    /// 发行日期
    pub release_date: String,
    /// 曲目数量
    pub total_tracks: u32,
    /// 艺术家列表
    pub artist: Vec<String>,
    /// 专辑外部链接
    #[serde(alias = "spotify_url")]
    pub external_url: String,
    /// 在向量索引中的位置，未计算特征前为 null
    #[serde(default, alias = "faiss_index")]
    pub index_position: Option<usize>,
}

/// 专辑记录集合，以及索引位置到记录的反向映射
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    records: Vec<AlbumRecord>,
    by_id: HashMap<String, usize>,
    by_file: HashMap<String, usize>,
    by_position: HashMap<usize, usize>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由记录列表构建，检查字段和唯一性，但不检查与索引的一致性
    pub fn from_records(records: Vec<AlbumRecord>) -> Result<Self> {
        let mut store = Self::new();
        for record in records {
            if record.id.is_empty() || record.file_name.is_empty() {
                return Err(Error::MetadataPersistence(format!(
                    "记录缺少 id 或 file_name: {:?}",
                    record.name
                )));
            }
            if store.by_id.contains_key(&record.id) {
                return Err(Error::MetadataPersistence(format!("重复的专辑 ID: {}", record.id)));
            }
            if store.by_file.contains_key(&record.file_name) {
                return Err(Error::MetadataPersistence(format!(
                    "重复的文件名: {}",
                    record.file_name
                )));
            }
            let slot = store.records.len();
            if let Some(position) = record.index_position {
                if let Some(&other) = store.by_position.get(&position) {
                    return Err(Error::DanglingReference(format!(
                        "位置 {} 同时属于 {} 和 {}",
                        position, store.records[other].id, record.id
                    )));
                }
                store.by_position.insert(position, slot);
            }
            store.by_id.insert(record.id.clone(), slot);
            store.by_file.insert(record.file_name.clone(), slot);
            store.records.push(record);
        }
        Ok(store)
    }

    /// 记录总数
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 已分配位置的记录数量
    pub fn assigned_count(&self) -> usize {
        self.by_position.len()
    }

    pub fn records(&self) -> &[AlbumRecord] {
        &self.records
    }

    /// 尚未计算特征的记录，按登记顺序
    pub fn pending(&self) -> impl Iterator<Item = &AlbumRecord> {
        self.records.iter().filter(|r| r.index_position.is_none())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&AlbumRecord> {
        self.by_id.get(id).map(|&slot| &self.records[slot])
    }

    /// 登记一条新记录，位置总是初始化为空
    pub fn register(&mut self, mut record: AlbumRecord) -> Result<()> {
        if record.id.is_empty() || record.file_name.is_empty() {
            return Err(Error::InvalidInput(format!("记录缺少 id 或 file_name: {:?}", record.name)));
        }
        if let Some(&slot) = self.by_id.get(&record.id) {
            return Err(Error::DuplicateRecord(format!(
                "专辑 {} 已登记为 {}",
                record.id, self.records[slot].file_name
            )));
        }
        if let Some(&slot) = self.by_file.get(&record.file_name) {
            return Err(Error::DuplicateRecord(format!(
                "文件 {} 已属于专辑 {}",
                record.file_name, self.records[slot].id
            )));
        }
        record.index_position = None;
        let slot = self.records.len();
        self.by_id.insert(record.id.clone(), slot);
        self.by_file.insert(record.file_name.clone(), slot);
        self.records.push(record);
        Ok(())
    }

    /// 为记录分配索引位置，每条记录只能分配一次
    pub fn assign_position(&mut self, id: &str, position: usize) -> Result<()> {
        let slot = *self
            .by_id
            .get(id)
            .ok_or_else(|| Error::InvalidInput(format!("未登记的专辑: {}", id)))?;
        if let Some(old) = self.records[slot].index_position {
            return Err(Error::PositionConflict {
                position,
                reason: format!("专辑 {} 已位于 {}", id, old),
            });
        }
        if let Some(&other) = self.by_position.get(&position) {
            return Err(Error::PositionConflict {
                position,
                reason: format!("已被专辑 {} 占用", self.records[other].id),
            });
        }
        self.records[slot].index_position = Some(position);
        self.by_position.insert(position, slot);
        Ok(())
    }

    /// 根据索引位置查找记录
    pub fn lookup_by_position(&self, position: usize) -> Result<&AlbumRecord> {
        self.by_position
            .get(&position)
            .map(|&slot| &self.records[slot])
            .ok_or_else(|| Error::DanglingReference(format!("位置 {} 没有对应的记录", position)))
    }

    /// 检查位置集合是否恰好为 0..index_len
    pub fn validate(&self, index_len: usize) -> Result<()> {
        if let Some((&position, &slot)) = self.by_position.iter().find(|(p, _)| **p >= index_len)
        {
            return Err(Error::DanglingReference(format!(
                "专辑 {} 引用了位置 {}，但索引只有 {} 个向量",
                self.records[slot].id, position, index_len
            )));
        }
        // 位置唯一且都小于 index_len，因此数量相等即为连续
        if self.assigned_count() != index_len {
            return Err(Error::DanglingReference(format!(
                "已分配位置的记录有 {} 条，索引有 {} 个向量",
                self.assigned_count(),
                index_len
            )));
        }
        Ok(())
    }

    /// 读取元数据文件，只检查字段和唯一性
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| {
            Error::MetadataPersistence(format!("读取 {} 失败: {}", path.display(), e))
        })?;
        let records: Vec<AlbumRecord> = serde_json::from_slice(&data).map_err(|e| {
            Error::MetadataPersistence(format!("解析 {} 失败: {}", path.display(), e))
        })?;
        debug!("从 {} 读取了 {} 条记录", path.display(), records.len());
        Self::from_records(records)
    }

    /// 读取元数据文件，并检查与索引的一致性
    pub fn load(path: impl AsRef<Path>, index_len: usize) -> Result<Self> {
        let store = Self::read(path)?;
        store.validate(index_len)?;
        Ok(store)
    }

    /// 保存为 JSON 数组，先写入临时文件再替换
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_atomic(path, |w| {
            serde_json::to_writer_pretty(&mut *w, &self.records)?;
            Ok(())
        })
        .map_err(|e| Error::MetadataPersistence(format!("写入 {} 失败: {}", path.display(), e)))
    }
}
