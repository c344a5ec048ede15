use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, Opts};
use crate::extractor::ResNetExtractor;
use crate::ingest::{IngestionPipeline, LocalImageSource};
use crate::metadata::AlbumRecord;
use crate::snapshot::{Snapshot, StoreLock};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    /// 专辑目录文件，内容为专辑记录的 JSON 数组
    pub catalog: PathBuf,
    /// 封面图片所在目录，记录中的相对路径以此为基准
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub images: PathBuf,
    /// 每批并行计算特征的图片数量
    #[arg(short, long, value_name = "SIZE", default_value_t = 64)]
    pub batch_size: usize,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let data = tokio::fs::read(&self.catalog)
            .await
            .with_context(|| format!("无法读取专辑目录: {}", self.catalog.display()))?;
        let candidates: Vec<AlbumRecord> = serde_json::from_slice(&data)
            .with_context(|| format!("无法解析专辑目录: {}", self.catalog.display()))?;
        info!("专辑目录中共有 {} 张专辑", candidates.len());

        tokio::fs::create_dir_all(opts.conf_dir.path()).await?;
        let paths = opts.conf_dir.store_paths();

        let report = block_in_place(|| -> anyhow::Result<_> {
            let _lock = StoreLock::acquire(&paths)?;
            let mut snapshot = Snapshot::open(&paths, self.extractor.dimension)?;
            let extractor = ResNetExtractor::open(
                self.extractor.model_path(&opts.conf_dir),
                self.extractor.clone(),
            )?;
            let source = LocalImageSource::new(&self.images);

            let pb = ProgressBar::no_length().with_style(pb_style());
            let report = IngestionPipeline::new(&extractor, &source)
                .batch_size(self.batch_size)
                .progress(pb.clone())
                .run(&mut snapshot, candidates, &paths)?;
            pb.finish_with_message("专辑添加完成");
            Ok(report)
        })?;

        info!(
            "新登记 {} 张，跳过 {} 张，加入索引 {} 张，失败 {} 张",
            report.registered, report.duplicates, report.embedded, report.failed
        );
        Ok(())
    }
}
