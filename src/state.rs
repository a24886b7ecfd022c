use std::sync::Arc;

use tokio::sync::broadcast;

use crate::engine::allocator::OverflowPolicy;
use crate::models::event::TrackingEvent;
use crate::observability::metrics::Metrics;
use crate::store::{MemoryStore, Store};

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub tracking_events_tx: broadcast::Sender<TrackingEvent>,
    pub metrics: Metrics,
    pub overflow_policy: OverflowPolicy,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        event_buffer_size: usize,
        overflow_policy: OverflowPolicy,
    ) -> Self {
        let (tracking_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            store,
            tracking_events_tx,
            metrics: Metrics::new(),
            overflow_policy,
        }
    }

    pub fn in_memory(event_buffer_size: usize, overflow_policy: OverflowPolicy) -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            event_buffer_size,
            overflow_policy,
        )
    }
}
