use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

fn register_counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .unwrap_or_else(|e| panic!("failed to create {name}: {e}"));
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .unwrap_or_else(|e| panic!("failed to register {name}: {e}"));
    counter
}

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).unwrap_or_else(|e| panic!("failed to create {name}: {e}"));
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .unwrap_or_else(|e| panic!("failed to register {name}: {e}"));
    counter
}

fn register_gauge(name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).unwrap_or_else(|e| panic!("failed to create {name}: {e}"));
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .unwrap_or_else(|e| panic!("failed to register {name}: {e}"));
    gauge
}

pub static WEBHOOK_EVENTS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "realtime_gateway_webhook_events_total",
        "Webhook events accepted, by event kind",
        &["event"],
    )
});

pub static WEBHOOK_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "realtime_gateway_webhook_rejections_total",
        "Webhook calls rejected before processing, by reason",
        &["reason"],
    )
});

pub static RECORDINGS_STARTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "realtime_gateway_recordings_started_total",
        "Recordings started at the media provider, by record type",
        &["record_type"],
    )
});

pub static RECORDINGS_DENIED: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "realtime_gateway_recordings_denied_total",
        "Recording starts refused by admission control",
    )
});

pub static BUS_EVENTS_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "realtime_gateway_bus_events_published_total",
        "Cross-instance events published, by kind",
        &["kind"],
    )
});

pub static BUS_EVENTS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "realtime_gateway_bus_events_received_total",
        "Cross-instance events received, by dispatch outcome",
        &["outcome"],
    )
});

pub static ACTIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_gauge(
        "realtime_gateway_active_connections",
        "Realtime connections held by this instance",
    )
});

pub static TRACK_STATE_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    register_gauge(
        "realtime_gateway_track_state_entries",
        "Per-participant track publication entries held in memory",
    )
});

pub static LIVE_TIMERS: Lazy<IntGauge> = Lazy::new(|| {
    register_gauge(
        "realtime_gateway_inactivity_timers",
        "Inactivity timers currently scheduled",
    )
});

/// Text exposition of the default registry.
pub fn render() -> Result<(String, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    let body = String::from_utf8_lossy(&buffer).into_owned();
    Ok((body, encoder.format_type().to_string()))
}
