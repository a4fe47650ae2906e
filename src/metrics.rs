//! Prometheus metrics, exposed through pingora's prometheus service.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

// Requests per route and final status code
pub static REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "edgerouter_requests_total",
        "Requests handled by the edge router",
        &["route", "code"]
    )
    .unwrap()
});

// Handler failures normalized into 500 responses
pub static HANDLER_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "edgerouter_handler_failures_total",
        "Handler failures turned into 500 envelopes",
        &["route", "error"]
    )
    .unwrap()
});

// Cache lookups, "hit" or "miss"
pub static CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "edgerouter_cache_lookups_total",
        "Cache-aside lookups by result",
        &["origin", "result"]
    )
    .unwrap()
});

pub static TASK_LAUNCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "edgerouter_task_launches_total",
        "Task runs launched through the router",
        &["cluster"]
    )
    .unwrap()
});
