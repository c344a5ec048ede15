use std::sync::Arc;

use clap::Parser;
use log::info;
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, SearchOptions};
use crate::extractor::ResNetExtractor;
use crate::query::QueryService;
use crate::snapshot::{Snapshot, SnapshotCell};
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 重新加载快照使用的 token，不填则随机生成
    #[arg(long, default_value_t = String::new())]
    pub token: String,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let paths = opts.conf_dir.store_paths();
        let dimension = self.extractor.dimension;

        // 模型在进程启动时加载一次，之后所有请求共享
        let (snapshot, extractor) = block_in_place(|| -> anyhow::Result<_> {
            let snapshot = Snapshot::open(&paths, dimension)?;
            let extractor = ResNetExtractor::open(
                self.extractor.model_path(&opts.conf_dir),
                self.extractor.clone(),
            )?;
            Ok((snapshot, extractor))
        })?;
        let query = QueryService::new(Arc::new(extractor), Arc::new(SnapshotCell::new(snapshot)));

        let mut token = self.token.clone();
        if token.is_empty() {
            token = Alphanumeric.sample_string(&mut rand::rng(), 32);
            info!("鉴权 token: {}", token);
        }

        // 创建应用状态
        let state = server::AppState::new(query, paths, dimension, self.search.clone(), token);

        // 创建应用
        let app = server::create_app(state);

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
