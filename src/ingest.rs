use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use indicatif::ProgressBar;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::extractor::FeatureExtractor;
use crate::metadata::AlbumRecord;
use crate::snapshot::{Snapshot, StorePaths};

/// 根据记录中的 file_name 取得图片字节
pub trait ImageSource: Send + Sync {
    fn fetch(&self, file_name: &str) -> Result<Vec<u8>>;
}

/// 从本地目录读取图片，相对路径以 root 为基准
pub struct LocalImageSource {
    root: PathBuf,
}

impl LocalImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ImageSource for LocalImageSource {
    fn fetch(&self, file_name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(file_name);
        fs::read(&path).map_err(|e| Error::ImageUnavailable { path, reason: e.to_string() })
    }
}

/// 一次入库的统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// 新登记的记录数量
    pub registered: usize,
    /// 因已存在而跳过的记录数量
    pub duplicates: usize,
    /// 成功计算特征并加入索引的数量
    pub embedded: usize,
    /// 图片读取或解码失败、仍在等待处理的数量
    pub failed: usize,
}

impl IngestReport {
    pub fn changed(&self) -> bool {
        self.registered > 0 || self.embedded > 0
    }

    fn merge(mut self, other: IngestReport) -> Self {
        self.registered += other.registered;
        self.duplicates += other.duplicates;
        self.embedded += other.embedded;
        self.failed += other.failed;
        self
    }
}

/// 入库流程：登记新专辑，计算封面特征，写入索引并分配位置
pub struct IngestionPipeline<'a> {
    extractor: &'a dyn FeatureExtractor,
    source: &'a dyn ImageSource,
    batch_size: usize,
    pb: ProgressBar,
}

impl<'a> IngestionPipeline<'a> {
    pub fn new(extractor: &'a dyn FeatureExtractor, source: &'a dyn ImageSource) -> Self {
        Self { extractor, source, batch_size: num_cpus::get() * 10, pb: ProgressBar::hidden() }
    }

    /// 每批并行计算特征的图片数量
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    /// 登记尚不存在的专辑，已存在的专辑 ID 直接跳过
    pub fn register(
        &self,
        snapshot: &mut Snapshot,
        candidates: impl IntoIterator<Item = AlbumRecord>,
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for record in candidates {
            if snapshot.metadata.contains(&record.id) {
                debug!("跳过已登记专辑: {}", record.id);
                report.duplicates += 1;
                continue;
            }
            match snapshot.metadata.register(record) {
                Ok(()) => report.registered += 1,
                Err(Error::DuplicateRecord(msg)) => {
                    warn!("跳过重复记录: {}", msg);
                    report.duplicates += 1;
                }
                Err(e) => return Err(e),
            }
        }
        info!("登记了 {} 条新记录，跳过 {} 条已存在记录", report.registered, report.duplicates);
        Ok(report)
    }

    /// 为所有未分配位置的记录计算特征并加入索引
    ///
    /// 特征按批并行计算，加入索引和分配位置则按登记顺序串行进行。
    /// 单张图片失败时记录保持未处理状态，其他错误会中断整个流程。
    pub fn embed_pending(&self, snapshot: &mut Snapshot) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let pending = snapshot
            .metadata
            .pending()
            .map(|r| (r.id.clone(), r.file_name.clone()))
            .collect::<Vec<_>>();
        if pending.is_empty() {
            info!("没有待处理的记录");
            return Ok(report);
        }
        if self.extractor.dimension() != snapshot.index.dimension() {
            return Err(Error::InvalidInput(format!(
                "特征维度为 {}，索引维度为 {}",
                self.extractor.dimension(),
                snapshot.index.dimension()
            )));
        }

        info!("开始处理 {} 张图片", pending.len());
        self.pb.set_length(pending.len() as u64);

        for chunk in pending.chunks(self.batch_size) {
            let start = Instant::now();
            let embeddings = chunk
                .par_iter()
                .map(|(_, file_name)| {
                    let bytes = self.source.fetch(file_name)?;
                    self.extractor.embed_bytes(&bytes)
                })
                .collect::<Vec<_>>();

            for ((id, file_name), embedding) in chunk.iter().zip(embeddings) {
                match embedding {
                    Ok(embedding) => {
                        let position = snapshot.index.add(&embedding)?;
                        snapshot.metadata.assign_position(id, position)?;
                        report.embedded += 1;
                        self.pb.set_message(file_name.clone());
                    }
                    Err(e) if e.is_per_image() => {
                        warn!("跳过图片 {}: {}", file_name, e);
                        report.failed += 1;
                    }
                    Err(e) => return Err(e),
                }
                self.pb.inc(1);
            }
            info!("处理 {} 张图片，耗时 {:.2}s", chunk.len(), start.elapsed().as_secs_f32());
        }

        info!("成功处理 {} 张图片，失败 {} 张", report.embedded, report.failed);
        Ok(report)
    }

    /// 登记、计算特征并保存快照，没有变更时不写入文件
    pub fn run(
        &self,
        snapshot: &mut Snapshot,
        candidates: impl IntoIterator<Item = AlbumRecord>,
        paths: &StorePaths,
    ) -> Result<IngestReport> {
        let report = self.register(snapshot, candidates)?;
        let report = report.merge(self.embed_pending(snapshot)?);
        if report.changed() {
            snapshot.persist(paths)?;
        } else {
            info!("没有需要保存的变更");
        }
        Ok(report)
    }
}
