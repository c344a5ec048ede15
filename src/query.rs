use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use log::debug;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::extractor::{Embedding, FeatureExtractor, decode_image};
use crate::metadata::AlbumRecord;
use crate::snapshot::{Snapshot, SnapshotCell};

/// 一条带距离的搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// L2 距离的平方
    pub distance: f32,
    pub record: AlbumRecord,
}

/// 单次相似专辑查询
#[derive(Clone)]
pub struct QueryService {
    extractor: Arc<dyn FeatureExtractor>,
    snapshot: Arc<SnapshotCell>,
}

impl QueryService {
    pub fn new(extractor: Arc<dyn FeatureExtractor>, snapshot: Arc<SnapshotCell>) -> Self {
        Self { extractor, snapshot }
    }

    pub fn snapshot(&self) -> &Arc<SnapshotCell> {
        &self.snapshot
    }

    /// 返回与图片最相似的 k 张专辑，按距离升序
    pub fn query(&self, image: &[u8], k: usize) -> Result<Vec<AlbumRecord>> {
        Ok(self.query_scored(image, k)?.into_iter().map(|hit| hit.record).collect())
    }

    pub fn query_scored(&self, image: &[u8], k: usize) -> Result<Vec<SearchHit>> {
        check_k(k)?;
        let image = decode_image(image)?;
        self.search(&image, k)
    }

    pub fn query_image(&self, image: &DynamicImage, k: usize) -> Result<Vec<SearchHit>> {
        check_k(k)?;
        self.search(image, k)
    }

    fn search(&self, image: &DynamicImage, k: usize) -> Result<Vec<SearchHit>> {
        let start = Instant::now();
        let embedding = self.extractor.embed(image)?;
        debug!("特征提取耗时 {:.2}ms", start.elapsed().as_secs_f32() * 1000.);
        // 整个查询只读取同一个快照
        let snapshot = self.snapshot.load();
        resolve(&snapshot, &embedding, k)
    }
}

fn check_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(Error::InvalidInput("k 必须大于 0".to_string()));
    }
    Ok(())
}

/// 在快照中搜索特征向量，并把位置转换为专辑记录
pub fn search_snapshot(snapshot: &Snapshot, embedding: &Embedding, k: usize) -> Result<Vec<SearchHit>> {
    check_k(k)?;
    resolve(snapshot, embedding, k)
}

fn resolve(snapshot: &Snapshot, embedding: &Embedding, k: usize) -> Result<Vec<SearchHit>> {
    snapshot
        .index
        .search(embedding, k)?
        .into_iter()
        .map(|neighbor| {
            let record = snapshot.metadata.lookup_by_position(neighbor.position)?;
            Ok(SearchHit { distance: neighbor.distance, record: record.clone() })
        })
        .collect()
}
