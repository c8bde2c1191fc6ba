use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub const AUDIT_TARGET: &str = "docmock::audit";
pub const QUERY_TARGET: &str = "docmock::query";

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub slow_query_ms: u64,
    pub enable_audit: bool,
}

pub const DEFAULT_SLOW_QUERY_MS: u64 = 500;

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { slow_query_ms: DEFAULT_SLOW_QUERY_MS, enable_audit: true }
    }
}

#[derive(Default)]
pub struct Metrics {
    pub queries_total: AtomicU64,
    pub queries_slow_total: AtomicU64,
    pub writes_total: AtomicU64,
    pub audits_total: AtomicU64,
}

#[derive(Default)]
pub struct Telemetry {
    pub cfg: RwLock<TelemetryConfig>,
    pub metrics: Metrics,
    // Tests capture audit lines in memory
    audit_sink: RwLock<Option<Arc<RwLock<Vec<String>>>>>,
}

pub(crate) static TELEMETRY: std::sync::LazyLock<Telemetry> =
    std::sync::LazyLock::new(Telemetry::default);

/// Reads taking at least `ms` milliseconds are logged as slow.
pub fn set_slow_query_ms(ms: u64) {
    TELEMETRY.cfg.write().slow_query_ms = ms;
}
pub fn set_audit_enabled(enabled: bool) {
    TELEMETRY.cfg.write().enable_audit = enabled;
}
pub fn set_audit_sink_for_tests(sink: Arc<RwLock<Vec<String>>>) {
    *TELEMETRY.audit_sink.write() = Some(sink);
}

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Records one read (find, count, aggregate) against a namespace.
pub fn log_query(namespace: &str, op: &str, duration_ms: u128, result_count: usize) {
    TELEMETRY.metrics.queries_total.fetch_add(1, Ordering::Relaxed);
    let slow_ms = TELEMETRY.cfg.read().slow_query_ms;
    let slow = u64::try_from(duration_ms).map_or(true, |ms| ms >= slow_ms);
    if slow {
        TELEMETRY.metrics.queries_slow_total.fetch_add(1, Ordering::Relaxed);
        log::warn!(target: QUERY_TARGET, "slow {op} on {namespace}: {duration_ms}ms, {result_count} docs");
    } else {
        log::debug!(target: QUERY_TARGET, "{op} on {namespace}: {duration_ms}ms, {result_count} docs");
    }
    crate::devlog!(
        "{{\"bench\":\"query\",\"op\":\"{}\",\"ns\":\"{}\",\"result_count\":{},\"slow\":{}}}",
        op,
        namespace,
        result_count,
        slow
    );
}

/// Records one write. `detail` is usually the affected `_id` or a count.
pub fn log_audit(op: &str, namespace: &str, detail: &str) {
    TELEMETRY.metrics.writes_total.fetch_add(1, Ordering::Relaxed);
    if !TELEMETRY.cfg.read().enable_audit {
        return;
    }
    TELEMETRY.metrics.audits_total.fetch_add(1, Ordering::Relaxed);
    let line = serde_json::json!({
        "ts": now_ts(), "op": op, "ns": namespace, "detail": detail
    })
    .to_string();
    let sink = TELEMETRY.audit_sink.read().clone();
    if let Some(sink) = sink {
        sink.write().push(line.clone());
    }
    log::info!(target: AUDIT_TARGET, "{line}");
}

#[must_use]
pub fn metrics_text() -> String {
    let m = &TELEMETRY.metrics;
    format!(
        "docmock_queries_total {}\n\
         docmock_queries_slow_total {}\n\
         docmock_writes_total {}\n\
         docmock_audits_total {}\n",
        m.queries_total.load(Ordering::Relaxed),
        m.queries_slow_total.load(Ordering::Relaxed),
        m.writes_total.load(Ordering::Relaxed),
        m.audits_total.load(Ordering::Relaxed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devlog::{drain, enable_thread_sink};

    // The settings are process-wide; tests that change them take turns.
    static SETTINGS: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn audit_lines_reach_the_sink() {
        let _turn = SETTINGS.lock();
        let sink = Arc::new(RwLock::new(Vec::new()));
        set_audit_sink_for_tests(sink.clone());
        log_audit("insert", "db.telemetry_test", "1");
        assert!(sink.read().iter().any(|l| l.contains("db.telemetry_test")));
        assert!(metrics_text().contains("docmock_writes_total"));
    }

    #[test]
    fn disabled_audit_skips_the_sink() {
        let _turn = SETTINGS.lock();
        let sink = Arc::new(RwLock::new(Vec::new()));
        set_audit_sink_for_tests(sink.clone());
        set_audit_enabled(false);
        log_audit("insert", "db.muted", "1");
        set_audit_enabled(true);
        log_audit("insert", "db.loud", "1");
        let lines = sink.read().clone();
        assert!(!lines.iter().any(|l| l.contains("db.muted")));
        assert!(lines.iter().any(|l| l.contains("db.loud")));
    }

    #[test]
    fn slow_query_threshold_flags_reads() {
        let _turn = SETTINGS.lock();
        let _g = enable_thread_sink();
        set_slow_query_ms(0);
        log_query("db.c", "find", 0, 1);
        set_slow_query_ms(u64::MAX);
        log_query("db.c", "find", 5, 1);
        set_slow_query_ms(DEFAULT_SLOW_QUERY_MS);
        let lines = drain();
        assert!(lines[0].contains("\"slow\":true"));
        assert!(lines[1].contains("\"slow\":false"));
        assert!(metrics_text().contains("docmock_queries_slow_total"));
    }
}
