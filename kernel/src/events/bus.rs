//! Bounded event bus with a single consuming dispatch loop.
//!
//! Producers never block: a full queue is reported to the caller as
//! [`OrchestrationError::Capacity`]. The dispatch loop handles one event at a
//! time in FIFO order, so a processor never sees two events concurrently from
//! the same bus.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use super::types::{BranchingEvent, EventBusStats, EventType};
use crate::error::{OrchestrationError, Result};

/// Handles events of one [`EventType`].
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Processes one event.
    ///
    /// # Errors
    ///
    /// Any error is logged and counted by the bus; it never stops dispatch.
    async fn process(&self, event: &BranchingEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    unhandled: AtomicU64,
}

/// Bounded FIFO queue of [`BranchingEvent`]s plus the processor registry.
pub struct EventBus {
    sender: mpsc::Sender<BranchingEvent>,
    receiver: Mutex<Option<mpsc::Receiver<BranchingEvent>>>,
    processors: RwLock<HashMap<EventType, Arc<dyn EventProcessor>>>,
    immediate_dispatch: bool,
    counters: Counters,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity())
            .field("pending", &self.pending())
            .field("immediate_dispatch", &self.immediate_dispatch)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Creates a bus whose queue holds at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize, immediate_dispatch: bool) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            processors: RwLock::new(HashMap::new()),
            immediate_dispatch,
            counters: Counters::default(),
        }
    }

    /// Registers `processor` for `event_type`, replacing any previous one.
    pub fn register_processor(&self, event_type: EventType, processor: Arc<dyn EventProcessor>) {
        let replaced = self
            .processors
            .write()
            .insert(event_type.clone(), processor)
            .is_some();
        debug!(%event_type, replaced, "Event processor registered");
    }

    /// Removes the processor for `event_type`, if any.
    pub fn unregister_processor(&self, event_type: &EventType) -> bool {
        self.processors.write().remove(event_type).is_some()
    }

    /// Enqueues `event` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::Capacity`] if the queue is full and
    /// [`OrchestrationError::Closed`] once the dispatch loop has exited.
    pub fn submit(&self, event: BranchingEvent) -> Result<()> {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.counters.rejected.fetch_add(1, Ordering::SeqCst);
                warn!(event_id = %event.id, event_type = %event.event_type, "Event queue full");
                Err(OrchestrationError::Capacity {
                    capacity: self.capacity(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::SeqCst);
                Err(OrchestrationError::Closed)
            }
        }
    }

    /// Submits `event`, or processes it on the caller's task when immediate
    /// dispatch is enabled and the event is high or critical priority.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit) for queued events, including
    /// [`OrchestrationError::Closed`] once the dispatch loop has exited.
    /// Processor errors of immediately dispatched events are only counted.
    pub async fn publish(&self, event: BranchingEvent) -> Result<()> {
        if self.sender.is_closed() {
            self.counters.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(OrchestrationError::Closed);
        }
        if self.immediate_dispatch && event.priority.is_urgent() {
            self.counters.submitted.fetch_add(1, Ordering::SeqCst);
            self.dispatch(&event).await;
            return Ok(());
        }
        self.submit(event)
    }

    /// Runs the dispatch loop until `stop` resolves.
    ///
    /// Only one loop may consume a bus. Events still queued when the loop
    /// exits are logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::Closed`] if another loop already took
    /// the queue.
    #[instrument(skip_all)]
    pub async fn run<F>(&self, stop: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(OrchestrationError::Closed)?;
        tokio::pin!(stop);

        info!(capacity = self.capacity(), "Event dispatch loop started");
        loop {
            tokio::select! {
                biased;
                () = &mut stop => break,
                next = receiver.recv() => match next {
                    Some(event) => self.dispatch(&event).await,
                    None => break,
                },
            }
        }

        receiver.close();
        let mut dropped = 0usize;
        while receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "Event dispatch loop stopped with events still queued");
        }
        info!("Event dispatch loop stopped");
        Ok(())
    }

    async fn dispatch(&self, event: &BranchingEvent) {
        let processor = self.processors.read().get(&event.event_type).cloned();
        let Some(processor) = processor else {
            self.counters.unhandled.fetch_add(1, Ordering::SeqCst);
            debug!(event_id = %event.id, event_type = %event.event_type, "No processor for event");
            return;
        };

        match AssertUnwindSafe(processor.process(event)).catch_unwind().await {
            Ok(Ok(())) => {
                self.counters.processed.fetch_add(1, Ordering::SeqCst);
                debug!(event_id = %event.id, event_type = %event.event_type, "Event processed");
            }
            Ok(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(event_id = %event.id, event_type = %event.event_type, error = %e, "Event processor failed");
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                error!(event_id = %event.id, event_type = %event.event_type, "Event processor panicked");
            }
        }
    }

    /// Queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Events waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Snapshot of the bus counters.
    #[must_use]
    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            processed: self.counters.processed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
            unhandled: self.counters.unhandled.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventPriority;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventProcessor for Recorder {
        async fn process(&self, event: &BranchingEvent) -> anyhow::Result<()> {
            let tag = event.context_value("tag").unwrap_or_default().to_string();
            match tag.as_str() {
                "fail" => anyhow::bail!("rejected"),
                "panic" => panic!("processor blew up"),
                _ => {
                    self.seen.lock().push(tag);
                    Ok(())
                }
            }
        }
    }

    fn tagged(tag: &str) -> BranchingEvent {
        BranchingEvent::new(EventType::CommitPushed, "test").with_context("tag", tag)
    }

    async fn drain(bus: &Arc<EventBus>, expected: u64) {
        let cancel = CancellationToken::new();
        let runner = {
            let bus = Arc::clone(bus);
            let cancel = cancel.clone();
            tokio::spawn(async move { bus.run(cancel.cancelled_owned()).await })
        };
        for _ in 0..200 {
            let stats = bus.stats();
            if stats.processed + stats.failed + stats.unhandled >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        runner.await.expect("join").expect("loop ran");
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let bus = EventBus::new(1, false);
        assert!(bus.submit(tagged("a")).is_ok());

        let err = bus.submit(tagged("b")).unwrap_err();
        assert!(matches!(err, OrchestrationError::Capacity { capacity: 1 }));
        assert_eq!(bus.stats().rejected, 1);
        assert_eq!(bus.pending(), 1);
    }

    #[tokio::test]
    async fn dispatch_is_fifo_and_survives_processor_failures() {
        let bus = Arc::new(EventBus::new(16, false));
        let recorder = Arc::new(Recorder::default());
        bus.register_processor(EventType::CommitPushed, Arc::clone(&recorder) as Arc<dyn EventProcessor>);

        for tag in ["one", "fail", "two", "panic", "three"] {
            bus.submit(tagged(tag)).expect("queue has room");
        }
        drain(&bus, 5).await;

        assert_eq!(*recorder.seen.lock(), vec!["one", "two", "three"]);
        let stats = bus.stats();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test]
    async fn reregistering_replaces_processor() {
        let bus = Arc::new(EventBus::new(4, false));
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        bus.register_processor(EventType::CommitPushed, Arc::clone(&first) as Arc<dyn EventProcessor>);
        bus.register_processor(EventType::CommitPushed, Arc::clone(&second) as Arc<dyn EventProcessor>);

        bus.submit(tagged("x")).expect("queue has room");
        drain(&bus, 1).await;

        assert!(first.seen.lock().is_empty());
        assert_eq!(*second.seen.lock(), vec!["x"]);
    }

    #[tokio::test]
    async fn events_without_processor_are_counted() {
        let bus = Arc::new(EventBus::new(4, false));
        bus.submit(BranchingEvent::new(EventType::BranchMerged, "test"))
            .expect("queue has room");
        drain(&bus, 1).await;
        assert_eq!(bus.stats().unhandled, 1);
    }

    #[tokio::test]
    async fn urgent_events_bypass_the_queue() -> Result<()> {
        let bus = EventBus::new(1, true);
        let recorder = Arc::new(Recorder::default());
        bus.register_processor(EventType::CommitPushed, Arc::clone(&recorder) as Arc<dyn EventProcessor>);

        bus.submit(tagged("queued"))?;
        bus.publish(tagged("urgent").with_priority(EventPriority::High))
            .await?;

        assert_eq!(*recorder.seen.lock(), vec!["urgent"]);
        assert_eq!(bus.pending(), 1);

        let err = bus.publish(tagged("normal")).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Capacity { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn second_loop_is_refused_and_closed_bus_rejects() {
        let bus = Arc::new(EventBus::new(4, false));
        drain(&bus, 0).await;

        let err = bus.run(std::future::pending::<()>()).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Closed));
        assert!(matches!(bus.submit(tagged("late")), Err(OrchestrationError::Closed)));
    }

    #[tokio::test]
    async fn closed_bus_rejects_urgent_events_too() {
        let bus = Arc::new(EventBus::new(4, true));
        let recorder = Arc::new(Recorder::default());
        bus.register_processor(EventType::CommitPushed, Arc::clone(&recorder) as Arc<dyn EventProcessor>);
        drain(&bus, 0).await;

        let err = bus
            .publish(tagged("late").with_priority(EventPriority::Critical))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Closed));
        assert!(recorder.seen.lock().is_empty());
        assert_eq!(bus.stats().rejected, 1);
    }
}
