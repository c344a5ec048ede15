use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("cover_search_count", "count of the search requests", &["status"])
        .expect("failed to register cover_search_count")
});

static METRIC_SEARCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("cover_search_duration", "duration of the per-image search in seconds")
        .expect("failed to register cover_search_duration")
});

static METRIC_SEARCH_RESULTS: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "cover_search_results",
        "number of albums returned by the per-image search",
        vec![0., 1., 5., 10., 20., 50., 100.]
    )
    .expect("failed to register cover_search_results")
});

/// 记录一次成功的搜索
pub fn observe_search(duration: f32, results: usize) {
    METRIC_SEARCH_COUNT.with_label_values(&["ok"]).inc();
    METRIC_SEARCH_DURATION.observe(duration as f64);
    METRIC_SEARCH_RESULTS.observe(results as f64);
}

/// 记录一次失败的搜索
pub fn inc_search_error() {
    METRIC_SEARCH_COUNT.with_label_values(&["error"]).inc();
}

/// 以文本格式导出所有指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather()).unwrap_or_default()
}
