use std::{
    collections::HashMap,
    fmt::Write as _,
    sync::{Mutex, OnceLock},
};

static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    pub(crate) events_emitted: Mutex<HashMap<(&'static str, &'static str), u64>>,
    pub(crate) events_dropped: Mutex<HashMap<(&'static str, &'static str, &'static str), u64>>,
    pub(crate) ws_disconnects: Mutex<HashMap<&'static str, u64>>,
}

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

pub(crate) fn record_event_emitted(scope: &'static str, event_type: &'static str, delivered: usize) {
    if delivered == 0 {
        return;
    }
    if let Ok(mut counters) = metrics_state().events_emitted.lock() {
        *counters.entry((scope, event_type)).or_insert(0) +=
            u64::try_from(delivered).unwrap_or(u64::MAX);
    }
}

pub(crate) fn record_event_dropped(
    scope: &'static str,
    event_type: &'static str,
    reason: &'static str,
) {
    if let Ok(mut counters) = metrics_state().events_dropped.lock() {
        *counters.entry((scope, event_type, reason)).or_insert(0) += 1;
    }
}

pub(crate) fn record_ws_disconnect(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().ws_disconnects.lock() {
        *counters.entry(reason).or_insert(0) += 1;
    }
}

pub(crate) fn render_metrics() -> String {
    let mut out = String::new();

    if let Ok(counters) = metrics_state().events_emitted.lock() {
        let mut entries: Vec<_> = counters.iter().collect();
        entries.sort();
        for ((scope, event_type), count) in entries {
            let _ = writeln!(
                out,
                "confab_gateway_events_emitted_total{{scope=\"{scope}\",kind=\"{event_type}\"}} {count}"
            );
        }
    }
    if let Ok(counters) = metrics_state().events_dropped.lock() {
        let mut entries: Vec<_> = counters.iter().collect();
        entries.sort();
        for ((scope, event_type, reason), count) in entries {
            let _ = writeln!(
                out,
                "confab_gateway_events_dropped_total{{scope=\"{scope}\",kind=\"{event_type}\",reason=\"{reason}\"}} {count}"
            );
        }
    }
    if let Ok(counters) = metrics_state().ws_disconnects.lock() {
        let mut entries: Vec<_> = counters.iter().collect();
        entries.sort();
        for (reason, count) in entries {
            let _ = writeln!(
                out,
                "confab_gateway_ws_disconnects_total{{reason=\"{reason}\"}} {count}"
            );
        }
    }

    out
}
