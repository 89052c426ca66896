use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, HistogramVec, TextEncoder, register_counter_vec, register_histogram_vec,
};

// Delivery metrics
pub static NOTIFICATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "alertmux_notifications_total",
        "Total number of notification attempts",
        &["integration", "status"]
    )
    .unwrap()
});

pub static NOTIFICATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "alertmux_notification_duration_seconds",
        "Notification delivery latency in seconds",
        &["integration"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap()
});

pub static NOTIFICATIONS_RATE_LIMITED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "alertmux_notifications_rate_limited_total",
        "Total number of notifications dropped by the rate limiter",
        &["integration"]
    )
    .unwrap()
});

// Test dispatch metrics
pub static TEST_DISPATCHES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "alertmux_test_dispatches_total",
        "Total number of test notification results",
        &["status"]
    )
    .unwrap()
});

// History metrics
pub static HISTORY_ENTRIES_DROPPED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "alertmux_history_entries_dropped_total",
        "Total number of notification history entries that were not recorded",
        &["reason"]
    )
    .unwrap()
});

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Registers every metric so that it shows up before its first sample.
pub fn init_metrics() {
    Lazy::force(&NOTIFICATIONS_TOTAL);
    Lazy::force(&NOTIFICATION_DURATION);
    Lazy::force(&NOTIFICATIONS_RATE_LIMITED);
    Lazy::force(&TEST_DISPATCHES);
    Lazy::force(&HISTORY_ENTRIES_DROPPED);
}
