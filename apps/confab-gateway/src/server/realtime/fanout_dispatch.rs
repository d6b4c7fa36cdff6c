use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::server::metrics::record_event_dropped;

/// Delivers one pre-serialized payload to the targeted sessions. Closed
/// queues are pruned; full queues are pruned and reported in
/// `slow_sessions` so the caller can close them.
pub(crate) fn dispatch_payload(
    senders: &mut HashMap<Uuid, mpsc::Sender<String>>,
    targets: &[Uuid],
    payload: &str,
    event_type: &'static str,
    scope: &'static str,
    slow_sessions: &mut Vec<Uuid>,
) -> usize {
    let mut delivered = 0_usize;

    for session_id in targets {
        let Some(sender) = senders.get(session_id) else {
            continue;
        };
        match sender.try_send(payload.to_owned()) {
            Ok(()) => delivered += 1,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                record_event_dropped(scope, event_type, "closed");
                warn!(
                    event = "gateway.fanout.closed",
                    scope,
                    event_type,
                    session_id = %session_id,
                    "dropped outbound payload for closed session queue"
                );
                senders.remove(session_id);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                record_event_dropped(scope, event_type, "full_queue");
                warn!(
                    event = "gateway.fanout.full_queue",
                    scope,
                    event_type,
                    session_id = %session_id,
                    "dropped outbound payload for full session queue"
                );
                slow_sessions.push(*session_id);
                senders.remove(session_id);
            }
        }
    }

    delivered
}
