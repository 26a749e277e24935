//! Prometheus metrics for the Cask server.
//!
//! Labels never carry realm names, node keys or credential material.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static NODES_STORED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cask_nodes_stored_total",
            "Validated node uploads, by node kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static NODE_BYTES_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cask_node_bytes_stored_total",
        "Encoded node bytes newly written to the blob store",
    )
    .expect("metric creation failed")
});

pub static MISSING_CHILDREN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cask_missing_children_total",
        "Uploads answered with a missing-children outcome",
    )
    .expect("metric creation failed")
});

pub static DEPOT_COMMITS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cask_depot_commits_total",
            "Depot versions created, by operation",
        ),
        &["operation"],
    )
    .expect("metric creation failed")
});

pub static AUTH_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cask_auth_failures_total",
            "Rejected credentials, by authentication scheme",
        ),
        &["scheme"],
    )
    .expect("metric creation failed")
});

pub static TICKETS_ISSUED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("cask_tickets_issued_total", "Tickets issued")
        .expect("metric creation failed")
});

pub static TICKETS_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cask_tickets_committed_total",
        "Tickets that recorded their commit root",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(NODES_STORED.clone()),
            Box::new(NODE_BYTES_STORED.clone()),
            Box::new(MISSING_CHILDREN.clone()),
            Box::new(DEPOT_COMMITS.clone()),
            Box::new(AUTH_FAILURES.clone()),
            Box::new(TICKETS_ISSUED.clone()),
            Box::new(TICKETS_COMMITTED.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!(error = %e, "metric registration failed");
            }
        }
    });
}

/// Render every registered metric in the text exposition format.
pub fn gather() -> String {
    register_metrics();
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_auth_failure(scheme: &str) {
    AUTH_FAILURES.with_label_values(&[scheme]).inc();
}

pub fn record_depot_commit(operation: &str) {
    DEPOT_COMMITS.with_label_values(&[operation]).inc();
}
