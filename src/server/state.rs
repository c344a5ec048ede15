use std::sync::Arc;

use crate::config::SearchOptions;
use crate::query::QueryService;
use crate::snapshot::StorePaths;

/// 应用状态
pub struct AppState {
    /// 查询服务，持有共享的特征提取器和当前快照
    pub query: QueryService,
    /// 重新加载快照时读取的文件
    pub paths: StorePaths,
    /// 特征向量维度
    pub dimension: usize,
    /// 搜索配置选项
    pub search: SearchOptions,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(
        query: QueryService,
        paths: StorePaths,
        dimension: usize,
        search: SearchOptions,
        token: String,
    ) -> Arc<Self> {
        Arc::new(AppState { query, paths, dimension, search, token })
    }
}
