use std::sync::LazyLock;

use anyhow::Result;
use prometheus::*;

static METRIC_IMAGES_ENCODED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("picsearch_images_encoded", "count of newly encoded images").unwrap()
});

static METRIC_IMAGES_REUSED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("picsearch_images_reused", "count of embeddings reused from the archive")
        .unwrap()
});

static METRIC_IMAGES_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("picsearch_images_rejected", "count of images that failed to decode")
        .unwrap()
});

static METRIC_QUERY_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("picsearch_query_duration", "duration of a query in seconds").unwrap()
});

static METRIC_INDEX_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("picsearch_index_duration", "duration of an index run in seconds").unwrap()
});

pub fn inc_encoded(n: usize) {
    METRIC_IMAGES_ENCODED.inc_by(n as u64);
}

pub fn inc_reused(n: usize) {
    METRIC_IMAGES_REUSED.inc_by(n as u64);
}

pub fn inc_rejected(n: usize) {
    METRIC_IMAGES_REJECTED.inc_by(n as u64);
}

pub fn observe_query(secs: f64) {
    METRIC_QUERY_DURATION.observe(secs);
}

pub fn observe_index(secs: f64) {
    METRIC_INDEX_DURATION.observe(secs);
}

/// 以 prometheus 文本格式导出所有指标
pub fn gather_text() -> Result<String> {
    let mut buf = vec![];
    TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}
