use tracing::trace;

// Counters are emitted as trace events; the Prometheus recorder installed in
// main renders whatever the process registers at /metrics.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "orderdesk.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn ingest_outcome(path: &'static str, outcome: &'static str) {
    trace!(
        target = "orderdesk.metrics",
        path = path,
        outcome = outcome,
        "ingest_outcome_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "orderdesk.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn sync_elapsed(source: &'static str, elapsed_ms: u128) {
    trace!(
        target = "orderdesk.metrics",
        source = source,
        elapsed_ms = elapsed_ms as u64,
        "sync_elapsed"
    );
}
