use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use fs2::FileExt;
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::index::FlatIndex;
use crate::metadata::MetadataStore;

/// 索引和元数据文件的位置
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub index: PathBuf,
    pub metadata: PathBuf,
}

impl StorePaths {
    /// 写入锁文件，与索引文件位于同一目录
    pub fn lock(&self) -> PathBuf {
        self.index.with_extension("lock")
    }
}

/// 修改索引和元数据期间持有的独占锁，释放时自动解锁
///
/// 只约束同样获取该锁的进程，查询路径不需要获取
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
}

impl StoreLock {
    /// 尝试获取锁，已被其他进程持有时立即返回 [`Error::StoreLocked`]
    pub fn acquire(paths: &StorePaths) -> Result<Self> {
        let path = paths.lock();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Err(Error::StoreLocked(path)),
                Err(e) => return Err(e.into()),
            }
        }
        debug!("已获取写入锁: {}", path.display());
        Ok(Self { _file: file })
    }
}

/// 一组一致的向量索引和元数据
///
/// 入库时独占修改，完成后持久化并整体替换到 [`SnapshotCell`] 中。
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub index: FlatIndex,
    pub metadata: MetadataStore,
}

impl Snapshot {
    pub fn empty(dimension: usize) -> Self {
        Self { index: FlatIndex::new(dimension), metadata: MetadataStore::new() }
    }

    /// 从磁盘打开快照，不存在的文件视为空
    ///
    /// 元数据与索引不一致时返回 [`Error::DanglingReference`]，不会自动截断
    pub fn open(paths: &StorePaths, dimension: usize) -> Result<Self> {
        let index = open_index(paths, dimension)?;
        let metadata = if paths.metadata.exists() {
            MetadataStore::load(&paths.metadata, index.len())?
        } else {
            let metadata = MetadataStore::new();
            metadata.validate(index.len())?;
            metadata
        };
        info!("已加载 {} 条记录，{} 个向量", metadata.len(), index.len());
        Ok(Self { index, metadata })
    }

    /// 先写索引再写元数据，两者都是先写临时文件再替换
    ///
    /// 因此在两次写入之间崩溃时，磁盘上的元数据不会引用索引中不存在的位置
    pub fn persist(&self, paths: &StorePaths) -> Result<()> {
        self.metadata.validate(self.index.len())?;
        self.index.persist(&paths.index)?;
        self.metadata.persist(&paths.metadata)?;
        info!("已保存 {} 条记录，{} 个向量", self.metadata.len(), self.index.len());
        Ok(())
    }

    /// 修复在写入索引之后、写入元数据之前中断的快照
    ///
    /// 只丢弃索引末尾没有任何记录引用的向量，返回丢弃的数量。
    /// 其他形式的不一致仍然返回错误。
    pub fn repair(paths: &StorePaths, dimension: usize) -> Result<usize> {
        let mut index = open_index(paths, dimension)?;
        let metadata =
            if paths.metadata.exists() { MetadataStore::read(&paths.metadata)? } else { MetadataStore::new() };

        let assigned = metadata.assigned_count();
        if assigned > index.len() {
            return Err(Error::DanglingReference(format!(
                "元数据引用了 {} 个位置，但索引只有 {} 个向量，无法修复",
                assigned,
                index.len()
            )));
        }
        let orphans = index.len() - assigned;
        index.truncate(assigned);
        metadata.validate(index.len())?;

        if orphans > 0 {
            warn!("丢弃索引末尾 {} 个未被引用的向量", orphans);
            index.persist(&paths.index)?;
        }
        Ok(orphans)
    }
}

fn open_index(paths: &StorePaths, dimension: usize) -> Result<FlatIndex> {
    if dimension == 0 {
        return Err(Error::InvalidInput("向量维度必须大于 0".to_string()));
    }
    if paths.index.exists() {
        FlatIndex::load(&paths.index, dimension)
    } else {
        Ok(FlatIndex::new(dimension))
    }
}

/// 供查询路径读取的当前快照
///
/// 查询时取出一个 `Arc`，之后替换快照不影响正在进行的查询
pub struct SnapshotCell {
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotCell {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { current: RwLock::new(Arc::new(snapshot)) }
    }

    pub fn load(&self) -> Arc<Snapshot> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 替换为新的快照，返回旧快照
    pub fn swap(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, snapshot)
    }
}
