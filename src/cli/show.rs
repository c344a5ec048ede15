use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, Opts};
use crate::snapshot::Snapshot;

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let snapshot = Snapshot::open(&opts.conf_dir.store_paths(), self.extractor.dimension)?;
        let metadata = &snapshot.metadata;
        println!("配置目录: {}", opts.conf_dir.path().display());
        println!("向量维度: {}", snapshot.index.dimension());
        println!("专辑数量: {}", metadata.len());
        println!("已索引  : {}", metadata.assigned_count());
        println!("待处理  : {}", metadata.len() - metadata.assigned_count());
        Ok(())
    }
}
