use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, Opts};
use crate::snapshot::{Snapshot, StoreLock};

#[derive(Parser, Debug, Clone)]
pub struct RepairCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
}

impl SubCommandExtend for RepairCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let paths = opts.conf_dir.store_paths();
        let _lock = StoreLock::acquire(&paths)?;
        let removed = Snapshot::repair(&paths, self.extractor.dimension)?;
        if removed == 0 {
            info!("索引与元数据一致，无需修复");
        } else {
            info!("修复完成，丢弃了 {} 个向量", removed);
        }
        Ok(())
    }
}
