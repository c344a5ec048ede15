use axum::body::Bytes;
use axum_typed_multipart::TryFromMultipart;
use serde::Serialize;
use utoipa::ToSchema;

use crate::query::SearchHit;

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub file: Bytes,
    pub k: Option<usize>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的图片文件
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 返回的专辑数量
    pub k: Option<usize>,
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u128,
    /// 按距离升序排列的专辑
    #[schema(value_type = Vec<Object>)]
    pub result: Vec<SearchHit>,
}

/// 重新加载快照的响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ReloadResponse {
    /// 记录数量
    pub records: usize,
    /// 向量数量
    pub vectors: usize,
}
