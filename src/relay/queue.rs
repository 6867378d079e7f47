use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::models::RenderPayload;

/// Pending outbound traffic, shared between callers and the session
///
/// Each queue is FIFO. `enqueued` and `settled` count every item so callers
/// can wait until everything handed over has been delivered or dropped.
#[derive(Debug, Default)]
pub struct OutboundQueues {
    renders: Mutex<VecDeque<RenderPayload>>,
    dashboards: Mutex<VecDeque<String>>,
    enqueued: AtomicU64,
    settled: AtomicU64,
}

impl OutboundQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_render(&self, payload: RenderPayload) {
        self.renders.lock().push_back(payload);
        self.enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub fn push_dashboard(&self, reference: String) {
        self.dashboards.lock().push_back(reference);
        self.enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pop_render(&self) -> Option<RenderPayload> {
        self.renders.lock().pop_front()
    }

    pub fn pop_dashboard(&self) -> Option<String> {
        self.dashboards.lock().pop_front()
    }

    /// Record that one popped item was delivered or given up on
    pub fn mark_settled(&self) {
        self.settled.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst) >= self.enqueued.load(Ordering::SeqCst)
    }

    pub fn queued_renders(&self) -> usize {
        self.renders.lock().len()
    }

    pub fn queued_dashboards(&self) -> usize {
        self.dashboards.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_queues_are_fifo_per_type() {
        let queues = OutboundQueues::new();
        queues.push_render(RenderPayload::from_json("r1"));
        queues.push_dashboard("d1".to_string());
        queues.push_render(RenderPayload::from_json("r2"));

        assert_eq!(queues.queued_renders(), 2);
        assert_eq!(queues.queued_dashboards(), 1);
        assert_eq!(queues.pop_render(), Some(RenderPayload::from_json("r1")));
        assert_eq!(queues.pop_render(), Some(RenderPayload::from_json("r2")));
        assert_eq!(queues.pop_render(), None);
        assert_eq!(queues.pop_dashboard(), Some("d1".to_string()));
        assert_eq!(queues.pop_dashboard(), None);
    }

    #[test]
    fn test_settled_tracks_enqueued() {
        let queues = OutboundQueues::new();
        assert!(queues.is_settled());

        queues.push_render(RenderPayload::from_json("r1"));
        assert!(!queues.is_settled());

        queues.pop_render();
        assert!(!queues.is_settled());
        queues.mark_settled();
        assert!(queues.is_settled());
    }

    #[test]
    fn test_concurrent_producers_keep_per_thread_order() {
        let queues = Arc::new(OutboundQueues::new());

        std::thread::scope(|scope| {
            for producer in 0..4 {
                let queues = queues.clone();
                scope.spawn(move || {
                    for i in 0..100 {
                        queues.push_render(RenderPayload::from_json(format!("{}:{}", producer, i)));
                    }
                });
            }
        });

        let mut last_seen = [-1i64; 4];
        while let Some(payload) = queues.pop_render() {
            let (producer, index) = payload.as_str().split_once(':').unwrap();
            let producer: usize = producer.parse().unwrap();
            let index: i64 = index.parse().unwrap();
            assert!(index > last_seen[producer]);
            last_seen[producer] = index;
        }
        assert_eq!(last_seen, [99; 4]);
    }
}
