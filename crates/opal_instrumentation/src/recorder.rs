//! Asynchronous metric recording over a lock-free queue.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::queue::SegQueue;

use crate::{event::MetricEvent, exporters::MetricExporter};

/// Lock-free queue carrying events from instrumented code to the recorder thread.
pub type MetricQueue = Arc<SegQueue<MetricEvent>>;

/// Drains the metric queue on a background thread and fans events out to the
/// configured exporters.
pub struct AsyncMetricRecorder {
    handle: Option<JoinHandle<()>>,
    pub queue: MetricQueue,
    shutdown: Arc<AtomicBool>,
}

impl AsyncMetricRecorder {
    #[must_use]
    pub fn new(exporters: Vec<Box<dyn MetricExporter>>) -> Self {
        let queue: MetricQueue = Arc::new(SegQueue::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let queue_clone = queue.clone();
        let shutdown_clone = shutdown.clone();
        let handle = thread::spawn(move || {
            let mut exporters = exporters;
            Self::drain_loop(&queue_clone, &mut exporters, &shutdown_clone);
        });

        Self {
            handle: Some(handle),
            queue,
            shutdown,
        }
    }

    fn drain_loop(queue: &MetricQueue, exporters: &mut [Box<dyn MetricExporter>], shutdown: &AtomicBool) {
        let mut failures: u64 = 0;
        loop {
            if shutdown.load(Ordering::Acquire) && queue.is_empty() {
                break;
            }
            match queue.pop() {
                Some(event) => {
                    for exporter in exporters.iter_mut() {
                        if let Err(error) = exporter.export(&event) {
                            failures += 1;
                            // Warn only at power-of-two counts to bound log volume.
                            if failures.is_power_of_two() {
                                tracing::warn!(%error, failures, "metric export failed");
                            }
                        }
                    }
                }
                None => thread::sleep(Duration::from_millis(1)),
            }
        }
    }

    /// Signal shutdown and wait for the remaining queued events to flush.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AsyncMetricRecorder {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::exporters::ChannelExporter;

    #[test]
    fn recorder_delivers_events_to_exporters() {
        let (sender, receiver) = mpsc::channel();
        let recorder = AsyncMetricRecorder::new(vec![Box::new(ChannelExporter::new(sender))]);

        recorder.queue.push(MetricEvent::KernelCompleted { duration_us: 42 });
        recorder.queue.push(MetricEvent::CacheCleared { lines_released: 3 });
        recorder.shutdown();

        let first = receiver.recv().expect("first event");
        assert!(matches!(first, MetricEvent::KernelCompleted { duration_us: 42 }));
        let second = receiver.recv().expect("second event");
        assert!(matches!(second, MetricEvent::CacheCleared { lines_released: 3 }));
    }
}
