use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use super::metrics::LiveMetrics;
use crate::{EventKind, QueueEvent};

/// A lifecycle callback
pub type EventCallback = Arc<dyn Fn(QueueEvent) -> BoxFuture<'static, ()> + Send + Sync>;

const DEFAULT_STREAM_CAPACITY: usize = 1024;

/// Dispatches lifecycle events to registered callbacks and stream subscribers
///
/// Callbacks are fixed at construction. All callbacks registered for a kind
/// run concurrently and `emit` returns once every one of them has finished.
pub struct EventBus {
    callbacks: HashMap<EventKind, Vec<EventCallback>>,
    sender: broadcast::Sender<QueueEvent>,
    metrics: Arc<LiveMetrics>,
}

impl EventBus {
    /// A bus with no callbacks
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    pub async fn emit(&self, event: QueueEvent) {
        let kind = event.kind();
        trace!(event = %kind, "Emitting event");

        self.metrics.record(&event);

        // Only fails when nobody is subscribed
        let _ = self.sender.send(event.clone());

        if let Some(callbacks) = self.callbacks.get(&kind) {
            join_all(callbacks.iter().map(|callback| callback(event.clone()))).await;
        }
    }

    /// Stream of every event emitted from now on
    ///
    /// A subscriber that falls more than the stream capacity behind receives
    /// a lag error item and then continues with the newest events.
    pub fn subscribe(&self) -> BroadcastStream<QueueEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn has_callbacks(&self, kind: EventKind) -> bool {
        self.callbacks.get(&kind).is_some_and(|callbacks| !callbacks.is_empty())
    }

    pub fn metrics(&self) -> &Arc<LiveMetrics> {
        &self.metrics
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.callbacks.keys().map(EventKind::name).collect();
        kinds.sort_unstable();
        f.debug_struct("EventBus")
            .field("callbacks", &kinds)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

pub struct EventBusBuilder {
    callbacks: HashMap<EventKind, Vec<EventCallback>>,
    capacity: usize,
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self {
            callbacks: HashMap::new(),
            capacity: DEFAULT_STREAM_CAPACITY,
        }
    }
}

impl EventBusBuilder {
    /// Register a callback; callbacks for one kind keep registration order
    pub fn on<F, Fut>(mut self, kind: EventKind, callback: F) -> Self
    where
        F: Fn(QueueEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: EventCallback = Arc::new(move |event| Box::pin(callback(event)));
        self.callbacks.entry(kind).or_default().push(callback);
        self
    }

    /// Buffer size of the event stream
    pub fn stream_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> EventBus {
        let (sender, _) = broadcast::channel(self.capacity);
        EventBus {
            callbacks: self.callbacks,
            sender,
            metrics: Arc::new(LiveMetrics::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now, Job, JobId, NewJob};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn job() -> Job {
        Job::from_new(JobId(7), NewJob::new("mail", json!({"to": "a@b.c"}), None), now())
    }

    #[tokio::test]
    async fn emit_awaits_every_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let slow = seen.clone();
        let fast = seen.clone();

        let bus = EventBus::builder()
            .on(EventKind::JobCreated, move |_| {
                let seen = slow.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    seen.lock().push("slow");
                }
            })
            .on(EventKind::JobCreated, move |_| {
                let seen = fast.clone();
                async move {
                    seen.lock().push("fast");
                }
            })
            .build();

        bus.emit(QueueEvent::job(EventKind::JobCreated, job())).await;

        let seen = seen.lock().clone();
        assert_eq!(seen, vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn callbacks_only_fire_for_their_kind() {
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let bus = EventBus::builder()
            .on(EventKind::JobCompleted, move |_| {
                let counter = counter.clone();
                async move {
                    *counter.lock() += 1;
                }
            })
            .build();

        bus.emit(QueueEvent::job(EventKind::JobCreated, job())).await;
        assert_eq!(*count.lock(), 0);
        assert!(bus.has_callbacks(EventKind::JobCompleted));
        assert!(!bus.has_callbacks(EventKind::JobCreated));
    }

    #[tokio::test]
    async fn subscribers_receive_events_and_metrics_count_them() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe();

        bus.emit(QueueEvent::job(EventKind::JobCreated, job())).await;

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.kind(), EventKind::JobCreated);
        assert_eq!(event.as_job().unwrap().id, JobId(7));
        assert_eq!(bus.metrics().jobs_created(), 1);
    }
}
