//! Durable event bus with at-least-once delivery.
//!
//! Every published event is appended to the repository event log before it
//! is dispatched. An event stays pending until its subscriber marks it
//! processed, so events lost to a crash or a failed delivery are picked up
//! again by [`EventBus::redeliver_pending`]. Exactly one subscriber may be
//! registered per event name.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use classdesk_types::error::RepositoryError;
use classdesk_types::event::{Event, EventPayload};
use dashmap::DashMap;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

/// Receiver of delivered events.
///
/// Delivery is fire-and-forget from the bus's perspective: the subscriber is
/// responsible for marking the event processed once it is fully handled.
pub trait EventSubscriber: Send + Sync + 'static {
    fn deliver(self: Arc<Self>, event: Event) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Errors from publishing or subscribing.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event '{0}' already has a subscriber")]
    AlreadySubscribed(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Removes an event from the in-flight set when its delivery task ends.
struct InFlightGuard {
    in_flight: Arc<DashMap<Uuid, ()>>,
    event_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.event_id);
    }
}

pub struct EventBus<R: WorkflowRepository> {
    repo: Arc<R>,
    subscribers: DashMap<String, Arc<dyn EventSubscriber>>,
    /// Events with a delivery task currently running in this process.
    in_flight: Arc<DashMap<Uuid, ()>>,
    tracker: TaskTracker,
}

impl<R: WorkflowRepository + 'static> EventBus<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            subscribers: DashMap::new(),
            in_flight: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Register the subscriber of `event_name`.
    pub fn subscribe(
        &self,
        event_name: &str,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> Result<(), BusError> {
        if self.subscribers.contains_key(event_name) {
            return Err(BusError::AlreadySubscribed(event_name.to_string()));
        }
        self.subscribers.insert(event_name.to_string(), subscriber);
        Ok(())
    }

    pub fn has_subscriber(&self, event_name: &str) -> bool {
        self.subscribers.contains_key(event_name)
    }

    /// Publish an event with a raw JSON payload.
    pub async fn publish(
        &self,
        name: &str,
        payload: serde_json::Value,
        correlation_key: &str,
    ) -> Result<Event, BusError> {
        self.accept(Event::new(name, payload, correlation_key)).await
    }

    /// Publish a typed payload under its own event name and correlation key.
    pub async fn publish_payload<P: EventPayload>(&self, payload: &P) -> Result<Event, BusError> {
        let event = Event::from_payload(payload)?;
        self.accept(event).await
    }

    /// Persist and dispatch an already constructed event.
    ///
    /// Re-accepting a known event ID does not append it twice.
    pub async fn accept(&self, event: Event) -> Result<Event, BusError> {
        let new = self.repo.record_event(&event).await?;
        tracing::info!(
            event_id = %event.id,
            event = %event.name,
            correlation_key = %event.correlation_key,
            new,
            "event published"
        );
        self.dispatch(event.clone());
        Ok(event)
    }

    /// Dispatch every pending event again. Returns how many were dispatched.
    pub async fn redeliver_pending(&self) -> Result<usize, BusError> {
        let pending = self.repo.list_pending_events().await?;
        let mut dispatched = 0;
        for event in pending {
            if self.dispatch(event) {
                dispatched += 1;
            }
        }
        if dispatched > 0 {
            tracing::info!(dispatched, "redelivered pending events");
        }
        Ok(dispatched)
    }

    /// Wait for all delivery tasks spawned so far to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Number of deliveries currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn dispatch(&self, event: Event) -> bool {
        let Some(subscriber) = self.subscribers.get(&event.name).map(|s| Arc::clone(s.value()))
        else {
            tracing::debug!(event_id = %event.id, event = %event.name, "no subscriber, event stays pending");
            return false;
        };

        // Skip events whose previous delivery is still running.
        if self.in_flight.insert(event.id, ()).is_some() {
            return false;
        }
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            event_id: event.id,
        };

        self.tracker.spawn(async move {
            let _guard = guard;
            subscriber.deliver(event).await;
        });
        true
    }
}

impl<R: WorkflowRepository> std::fmt::Debug for EventBus<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
