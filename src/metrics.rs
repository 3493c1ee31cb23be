use std::sync::LazyLock;

use prometheus::*;

use crate::context::ExecutionContext;
use crate::index::Metric;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("vit_search_count", "count of the image to search", &["context"])
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "vit_search_duration",
        "duration of extract + search per query in seconds",
        &["context"]
    )
    .unwrap()
});

static METRIC_SEARCH_TOP_SCORE: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "vit_search_top_score",
        "score of the best match per query",
        &["metric"],
        (-4..=16).map(|x| x as f64 * 0.25).collect()
    )
    .unwrap()
});

/// 记录一次完成的查询
pub fn observe_search(context: ExecutionContext, seconds: f32) {
    let context = context.to_string();
    METRIC_SEARCH_COUNT.with_label_values(&[context.as_str()]).inc();
    METRIC_SEARCH_DURATION.with_label_values(&[context.as_str()]).observe(seconds as f64);
}

/// 记录最佳结果的得分
pub fn observe_top_score(metric: Metric, score: f32) {
    METRIC_SEARCH_TOP_SCORE.with_label_values(&[metric.to_string().as_str()]).observe(score as f64);
}

/// 以文本格式导出所有指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather()).unwrap_or_default()
}
