//! Prometheus text exposition for `GET /api/metrics`.
//! `lava_callback_requests_total` is the primary counter name (renaming
//! would break existing dashboards); `kci_requests_total` is carried
//! alongside as a neutral alias of the same count.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub http_requests_total: AtomicU64,
    pub lava_callback_requests_total: AtomicU64,
    pub lava_callback_requests_authfail_total: AtomicU64,
    pub lava_callback_late_fail_total: AtomicU64,
    pub pipeline_api_requests_total: AtomicU64,
    pub pipeline_api_auth_fail_total: AtomicU64,
    pub executor_threads_active: AtomicI64,
    pub executor_threads_all: AtomicI64,
}

impl Metrics {
    pub fn render(&self) -> String {
        let callback_total = self.lava_callback_requests_total.load(Ordering::Relaxed);
        let mut out = String::new();
        push_counter(&mut out, "http_requests_total", self.http_requests_total.load(Ordering::Relaxed));
        push_counter(&mut out, "lava_callback_requests_total", callback_total);
        push_counter(&mut out, "kci_requests_total", callback_total);
        push_counter(
            &mut out,
            "lava_callback_requests_authfail_total",
            self.lava_callback_requests_authfail_total.load(Ordering::Relaxed),
        );
        push_counter(
            &mut out,
            "lava_callback_late_fail_total",
            self.lava_callback_late_fail_total.load(Ordering::Relaxed),
        );
        push_counter(
            &mut out,
            "pipeline_api_requests_total",
            self.pipeline_api_requests_total.load(Ordering::Relaxed),
        );
        push_counter(
            &mut out,
            "pipeline_api_auth_fail_total",
            self.pipeline_api_auth_fail_total.load(Ordering::Relaxed),
        );
        push_gauge(
            &mut out,
            "executor_threads_active",
            self.executor_threads_active.load(Ordering::Relaxed),
        );
        push_gauge(
            &mut out,
            "executor_threads_all",
            self.executor_threads_all.load(Ordering::Relaxed),
        );
        out
    }
}

fn push_counter(out: &mut String, name: &str, value: u64) {
    out.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
}

fn push_gauge(out: &mut String, name: &str, value: i64) {
    out.push_str(&format!("# TYPE {name} gauge\n{name} {value}\n"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_all_counters_and_the_neutral_alias() {
        let metrics = Metrics::default();
        metrics.lava_callback_requests_total.store(3, Ordering::Relaxed);
        let text = metrics.render();
        assert!(text.contains("lava_callback_requests_total 3"));
        assert!(text.contains("kci_requests_total 3"));
        assert!(text.contains("executor_threads_all 0"));
    }
}
