use std::collections::HashMap;
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;

/// 统一的进度条样式
pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} ({per_sec}) {msg}",
    )
    .expect("invalid progress bar template")
    .progress_chars("##-")
}

/// 记录各阶段的耗时
#[derive(Debug, Default)]
pub struct TimeMeasure(pub HashMap<&'static str, Duration>);

impl TimeMeasure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measure<F, R>(&mut self, key: &'static str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let r = f();
        *self.0.entry(key).or_default() += start.elapsed();
        r
    }

    /// 按耗时从大到小排列
    pub fn sorted(&self) -> Vec<(&'static str, Duration)> {
        let mut v = self.0.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>();
        v.sort_by(|a, b| b.1.cmp(&a.1));
        v
    }
}
