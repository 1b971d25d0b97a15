// =============================================================================
// Probe Kit — layered health checks, TCP through application (spec.md §4.1)
// =============================================================================
//
// Each layer answers one narrower question than the last: is the port
// listening, does the CDP endpoint respond, is the JS runtime alive, is the
// DOM present, is the trading application itself ready. The Connection
// Health Monitor runs these in order and stops at the first failure — a
// lower layer failing makes the higher layers meaningless.
// =============================================================================

pub mod application;
pub mod dom;
pub mod http;
pub mod runtime;
pub mod tcp;

use std::sync::Arc;
use std::time::Instant;

use crate::types::{HealthMetric, ProbeLayer};

/// Run every layer in order against one channel, short-circuiting on the
/// first failure. Returns the metrics collected for whichever layers ran.
pub async fn run_layered(port: u16, tab: Option<&Arc<headless_chrome::Tab>>) -> Vec<HealthMetric> {
    let mut metrics = Vec::with_capacity(5);

    let tcp_metric = measure(ProbeLayer::Tcp, || tcp::probe(port));
    let tcp_ok = tcp_metric.ok;
    metrics.push(tcp_metric);
    if !tcp_ok {
        return metrics;
    }

    let http_metric = measure_async(ProbeLayer::Http, http::probe(port)).await;
    let http_ok = http_metric.ok;
    metrics.push(http_metric);
    if !http_ok {
        return metrics;
    }

    let Some(tab) = tab else {
        return metrics;
    };

    let runtime_metric = measure(ProbeLayer::Runtime, || runtime::probe(tab));
    let runtime_ok = runtime_metric.ok;
    metrics.push(runtime_metric);
    if !runtime_ok {
        return metrics;
    }

    let dom_metric = measure(ProbeLayer::Dom, || dom::probe(tab));
    let dom_ok = dom_metric.ok;
    metrics.push(dom_metric);
    if !dom_ok {
        return metrics;
    }

    metrics.push(measure(ProbeLayer::Application, || application::probe(tab)));
    metrics
}

fn measure(layer: ProbeLayer, f: impl FnOnce() -> bool) -> HealthMetric {
    let start = Instant::now();
    let ok = f();
    HealthMetric {
        ts_ms: chrono::Utc::now().timestamp_millis(),
        layer,
        ok,
        latency_ms: start.elapsed().as_millis() as u64,
    }
}

async fn measure_async(layer: ProbeLayer, fut: impl std::future::Future<Output = bool>) -> HealthMetric {
    let start = Instant::now();
    let ok = fut.await;
    HealthMetric {
        ts_ms: chrono::Utc::now().timestamp_millis(),
        layer,
        ok,
        latency_ms: start.elapsed().as_millis() as u64,
    }
}
