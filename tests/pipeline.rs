use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use coversearch::{
    AlbumRecord, Embedding, Error, FeatureExtractor, ImageSource, IngestionPipeline, QueryService,
    Result, Snapshot, SnapshotCell, StorePaths,
};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use rstest::*;
use tempfile::TempDir;

/// 以各通道平均值作为特征的提取器
struct MeanColor;

impl FeatureExtractor for MeanColor {
    fn dimension(&self) -> usize {
        3
    }

    fn embed(&self, image: &DynamicImage) -> Result<Embedding> {
        let rgb = image.to_rgb8();
        let n = (rgb.width() * rgb.height()) as f32;
        let mut sum = [0f32; 3];
        for pixel in rgb.pixels() {
            for c in 0..3 {
                sum[c] += pixel[c] as f32 / 255.0;
            }
        }
        Ok(sum.iter().map(|s| s / n).collect())
    }
}

/// 总是失败的提取器，用于模拟推理错误
struct Broken;

impl FeatureExtractor for Broken {
    fn dimension(&self) -> usize {
        3
    }

    fn embed(&self, _: &DynamicImage) -> Result<Embedding> {
        Err(Error::Model("推理失败".to_string()))
    }
}

/// 内存中的图片来源，记录读取次数
#[derive(Default)]
struct MemorySource {
    images: HashMap<String, Vec<u8>>,
    fetched: AtomicUsize,
}

impl MemorySource {
    fn with(mut self, file_name: &str, bytes: Vec<u8>) -> Self {
        self.images.insert(file_name.to_string(), bytes);
        self
    }
}

impl ImageSource for MemorySource {
    fn fetch(&self, file_name: &str) -> Result<Vec<u8>> {
        self.fetched.fetch_add(1, Ordering::SeqCst);
        self.images.get(file_name).cloned().ok_or_else(|| Error::ImageUnavailable {
            path: file_name.into(),
            reason: "not found".to_string(),
        })
    }
}

fn png(color: [u8; 3]) -> Vec<u8> {
    let mut buf = vec![];
    DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 12, Rgb(color)))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn album(id: &str) -> AlbumRecord {
    AlbumRecord {
        file_name: format!("{}.png", id),
        id: id.to_string(),
        name: id.to_uppercase(),
        release_date: "1999-09-09".to_string(),
        total_tracks: 12,
        artist: vec!["Someone".to_string()],
        external_url: format!("https://open.spotify.com/album/{}", id),
        index_position: None,
    }
}

#[fixture]
fn store() -> (TempDir, StorePaths) {
    let dir = TempDir::new().unwrap();
    let paths =
        StorePaths { index: dir.path().join("index.bin"), metadata: dir.path().join("metadata.json") };
    (dir, paths)
}

fn colors() -> MemorySource {
    MemorySource::default()
        .with("red.png", png([255, 0, 0]))
        .with("green.png", png([0, 255, 0]))
        .with("blue.png", png([0, 0, 255]))
}

#[rstest]
fn test_ingest_then_query(store: (TempDir, StorePaths)) {
    let (_dir, paths) = store;
    let source = colors();
    let mut snapshot = Snapshot::open(&paths, 3).unwrap();
    let report = IngestionPipeline::new(&MeanColor, &source)
        .batch_size(2)
        .run(&mut snapshot, ["red", "green", "blue"].map(album), &paths)
        .unwrap();
    assert_eq!(report.registered, 3);
    assert_eq!(report.embedded, 3);
    assert_eq!(report.failed, 0);

    let snapshot = Snapshot::open(&paths, 3).unwrap();
    assert_eq!(snapshot.index.len(), 3);
    // 位置按登记顺序分配
    assert_eq!(snapshot.metadata.lookup_by_position(0).unwrap().id, "red");
    assert_eq!(snapshot.metadata.lookup_by_position(2).unwrap().id, "blue");

    let service = QueryService::new(Arc::new(MeanColor), Arc::new(SnapshotCell::new(snapshot)));
    let result = service.query(&png([250, 10, 5]), 2).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].id, "red");
    assert_eq!(result[0].index_position, Some(0));

    // 已入库的图片查询自身，距离为 0
    let hits = service.query_scored(&png([0, 0, 255]), 1).unwrap();
    assert_eq!(hits[0].record.id, "blue");
    assert_eq!(hits[0].distance, 0.0);

    // k 大于索引大小时只返回全部记录
    assert_eq!(service.query(&png([1, 2, 3]), 10).unwrap().len(), 3);
}

#[rstest]
fn test_ingest_is_idempotent(store: (TempDir, StorePaths)) {
    let (_dir, paths) = store;
    let source = colors();
    let mut snapshot = Snapshot::open(&paths, 3).unwrap();
    let pipeline = IngestionPipeline::new(&MeanColor, &source);
    pipeline.run(&mut snapshot, ["red", "green"].map(album), &paths).unwrap();
    let fetched = source.fetched.load(Ordering::SeqCst);
    let metadata_before = std::fs::read(&paths.metadata).unwrap();

    let mut snapshot = Snapshot::open(&paths, 3).unwrap();
    let report = pipeline.run(&mut snapshot, ["red", "green"].map(album), &paths).unwrap();
    assert_eq!(report.registered, 0);
    assert_eq!(report.duplicates, 2);
    assert_eq!(report.embedded, 0);
    assert!(!report.changed());
    assert_eq!(source.fetched.load(Ordering::SeqCst), fetched);
    assert_eq!(std::fs::read(&paths.metadata).unwrap(), metadata_before);
    assert_eq!(Snapshot::open(&paths, 3).unwrap().index.len(), 2);
}

#[rstest]
fn test_bad_images_stay_pending(store: (TempDir, StorePaths)) {
    let (_dir, paths) = store;
    let source = colors().with("broken.png", b"not an image".to_vec());
    let mut snapshot = Snapshot::open(&paths, 3).unwrap();
    let report = IngestionPipeline::new(&MeanColor, &source)
        .run(&mut snapshot, ["red", "broken", "missing", "green"].map(album), &paths)
        .unwrap();
    assert_eq!(report.registered, 4);
    assert_eq!(report.embedded, 2);
    assert_eq!(report.failed, 2);

    let snapshot = Snapshot::open(&paths, 3).unwrap();
    assert_eq!(snapshot.index.len(), 2);
    let pending = snapshot.metadata.pending().map(|r| r.id.as_str()).collect::<Vec<_>>();
    assert_eq!(pending, vec!["broken", "missing"]);
    assert_eq!(snapshot.metadata.lookup_by_position(1).unwrap().id, "green");

    // 补上图片后再次运行，只处理之前失败的记录
    let source = colors().with("missing.png", png([9, 9, 9]));
    let mut snapshot = snapshot;
    let report = IngestionPipeline::new(&MeanColor, &source)
        .run(&mut snapshot, ["red", "missing"].map(album), &paths)
        .unwrap();
    assert_eq!(report.registered, 0);
    assert_eq!(report.embedded, 1);
    assert_eq!(report.failed, 1);
    let snapshot = Snapshot::open(&paths, 3).unwrap();
    assert_eq!(snapshot.metadata.get("missing").unwrap().index_position, Some(2));
}

#[rstest]
fn test_model_error_aborts_without_writing(store: (TempDir, StorePaths)) {
    let (_dir, paths) = store;
    let source = colors();
    let mut snapshot = Snapshot::open(&paths, 3).unwrap();
    let err = IngestionPipeline::new(&Broken, &source)
        .run(&mut snapshot, ["red"].map(album), &paths)
        .unwrap_err();
    assert!(matches!(err, Error::Model(_)));
    assert!(!paths.index.exists());
    assert!(!paths.metadata.exists());
}

#[rstest]
fn test_dimension_mismatch_is_rejected(store: (TempDir, StorePaths)) {
    let (_dir, paths) = store;
    let source = colors();
    let mut snapshot = Snapshot::open(&paths, 4).unwrap();
    let err = IngestionPipeline::new(&MeanColor, &source)
        .run(&mut snapshot, ["red"].map(album), &paths)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[rstest]
fn test_query_errors() {
    let service =
        QueryService::new(Arc::new(MeanColor), Arc::new(SnapshotCell::new(Snapshot::empty(3))));
    assert!(matches!(service.query(&png([0, 0, 0]), 0), Err(Error::InvalidInput(_))));
    assert!(matches!(service.query(b"garbage", 3), Err(Error::InvalidImage(_))));
    assert!(service.query(&png([0, 0, 0]), 3).unwrap().is_empty());
}

#[rstest]
fn test_reload_is_visible_to_new_queries(store: (TempDir, StorePaths)) {
    let (_dir, paths) = store;
    let cell = Arc::new(SnapshotCell::new(Snapshot::open(&paths, 3).unwrap()));
    let service = QueryService::new(Arc::new(MeanColor), cell.clone());
    assert!(service.query(&png([255, 0, 0]), 1).unwrap().is_empty());

    let source = colors();
    let mut snapshot = Snapshot::open(&paths, 3).unwrap();
    IngestionPipeline::new(&MeanColor, &source)
        .run(&mut snapshot, ["red"].map(album), &paths)
        .unwrap();
    cell.swap(Snapshot::open(&paths, 3).unwrap());

    let result = service.query(&png([255, 0, 0]), 1).unwrap();
    assert_eq!(result[0].id, "red");
}

#[test]
fn test_embedding_is_deterministic() {
    let image = image::load_from_memory(&png([12, 34, 56])).unwrap();
    assert_eq!(image.dimensions(), (16, 12));
    let a = MeanColor.embed(&image).unwrap();
    let b = MeanColor.embed_bytes(&png([12, 34, 56])).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), MeanColor.dimension());
}
