use std::sync::LazyLock;

use prometheus::*;

static METRIC_BATCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("clip_batch_count", "count of the processed batches", &["status"])
        .unwrap()
});

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("clip_search_count", "count of the text queries", &["status"])
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "clip_search_duration",
        "duration of the per-query search in seconds",
        &["status"]
    )
    .unwrap()
});

/// 记录一个批次的处理结果，status 为 processed / skipped / locked / failed
pub fn inc_batch(status: &str) {
    METRIC_BATCH_COUNT.with_label_values(&[status]).inc();
}

/// 记录一次查询及其耗时
pub fn observe_search(status: &str, seconds: f64) {
    METRIC_SEARCH_COUNT.with_label_values(&[status]).inc();
    METRIC_SEARCH_DURATION.with_label_values(&[status]).observe(seconds);
}

