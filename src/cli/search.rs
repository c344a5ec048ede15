use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, Opts, SearchOptions};
use crate::extractor::ResNetExtractor;
use crate::query::{QueryService, SearchHit};
use crate::snapshot::{Snapshot, SnapshotCell};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let bytes = tokio::fs::read(&self.image).await?;

        let result = block_in_place(|| -> Result<_> {
            let snapshot = Snapshot::open(&opts.conf_dir.store_paths(), self.extractor.dimension)?;
            let extractor = ResNetExtractor::open(
                self.extractor.model_path(&opts.conf_dir),
                self.extractor.clone(),
            )?;
            let service =
                QueryService::new(Arc::new(extractor), Arc::new(SnapshotCell::new(snapshot)));
            Ok(service.query_scored(&bytes, self.search.k)?)
        })?;

        print_result(&result, self)
    }
}

fn print_result(result: &[SearchHit], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for hit in result {
                let r = &hit.record;
                println!(
                    "{:.2}\t{}\t{}\t{}\t{}",
                    hit.distance,
                    r.name,
                    r.artist.join(", "),
                    r.external_url,
                    r.file_name
                );
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}

impl FromStr for OutputFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            _ => Ok(Self::Table),
        }
    }
}
