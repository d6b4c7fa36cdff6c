use crate::server::core::SignalWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignalVerdict {
    /// Within budget; relay the frame.
    Allowed,
    /// First frame over budget in this window; notify the sender once.
    LimitedNotify,
    /// Over budget and already notified; drop without a reply.
    LimitedSilent,
}

/// Fixed-window counter for `voice:signal` frames. The window is best-effort
/// wall-clock; it rolls on the first frame past its end.
pub(crate) fn note_signal(
    window: &mut SignalWindow,
    now_unix: i64,
    window_secs: i64,
    budget: u32,
) -> SignalVerdict {
    if now_unix - window.started_unix >= window_secs {
        *window = SignalWindow::new(now_unix);
    }

    window.count = window.count.saturating_add(1);
    if window.count <= budget {
        return SignalVerdict::Allowed;
    }
    if window.notified {
        return SignalVerdict::LimitedSilent;
    }
    window.notified = true;
    SignalVerdict::LimitedNotify
}
