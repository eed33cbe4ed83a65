//! The process-wide metric sink and the macro that feeds it.

use std::sync::OnceLock;

use crate::recorder::MetricQueue;

static SINK: OnceLock<MetricQueue> = OnceLock::new();

/// Route all subsequent [`emit_metric!`] invocations into `queue`.
///
/// The first installation wins. A losing queue is handed back to the caller,
/// who can drain or drop it; nothing panics.
pub fn install_sink(queue: MetricQueue) -> Result<(), MetricQueue> {
    SINK.set(queue)
}

/// Whether a recorder has claimed the sink.
pub fn sink_installed() -> bool {
    SINK.get().is_some()
}

/// Run `push` against the installed sink, or not at all.
#[doc(hidden)]
pub fn with_sink(push: impl FnOnce(&MetricQueue)) {
    if let Some(queue) = SINK.get() {
        push(queue);
    }
}

/// Enqueue a metric event on the installed sink. The event expression lives
/// inside a closure, so with no recorder listening it is never even built.
#[macro_export]
macro_rules! emit_metric {
    ($event:expr) => {
        $crate::with_sink(|__sink| __sink.push($event));
    };
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::event::MetricEvent;

    #[test]
    fn sink_is_claimed_once_and_receives_events() {
        let queue: MetricQueue = Arc::new(crossbeam::queue::SegQueue::new());
        assert!(install_sink(queue.clone()).is_ok());
        assert!(sink_installed());

        // A second claim loses and gets its queue back untouched.
        let late: MetricQueue = Arc::new(crossbeam::queue::SegQueue::new());
        assert!(install_sink(late).is_err());

        emit_metric!(MetricEvent::KernelCompleted { duration_us: 9 });
        match queue.pop() {
            Some(MetricEvent::KernelCompleted { duration_us }) => assert_eq!(duration_us, 9),
            other => panic!("expected the emitted kernel event, got {other:?}"),
        }
    }
}
