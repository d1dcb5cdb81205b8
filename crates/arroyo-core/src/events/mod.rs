use std::any::{Any, TypeId};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

/// Bus carrying table lifecycle events to interested observers
pub struct EventBus {
    handlers: Arc<Mutex<AHashMap<TypeId, Vec<Box<dyn EventHandler>>>>>,
}

/// Event trait that all events must implement
pub trait Event: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

/// Handler trait for event handlers
pub trait EventHandler: Send + Sync {
    fn handle(&mut self, event: &dyn Event);
}

/// Events published by table views
pub mod events {
    use super::Event;
    use crate::variant::TableVariant;
    use uuid::Uuid;

    /// A page was applied to the display
    #[derive(Debug, Clone, PartialEq)]
    pub struct PageLoaded {
        pub view_id: Uuid,
        pub variant: TableVariant,
        pub offset: usize,
        pub row_count: usize,
        pub total_row_count: u64,
        /// The page came from an expired cache entry
        pub stale: bool,
    }

    /// A fetch failed; a previous page may still be displayed
    #[derive(Debug, Clone, PartialEq)]
    pub struct PageFailed {
        pub view_id: Uuid,
        pub variant: TableVariant,
        pub offset: usize,
        pub message: String,
        pub has_previous: bool,
    }

    /// A response arrived for a state that is no longer current
    #[derive(Debug, Clone, PartialEq)]
    pub struct ResponseDiscarded {
        pub view_id: Uuid,
        pub offset: usize,
    }

    /// One or more rows could not be projected
    #[derive(Debug, Clone, PartialEq)]
    pub struct RowsDegraded {
        pub view_id: Uuid,
        pub count: usize,
    }

    macro_rules! impl_event {
        ($($t:ty),*) => {
            $(
                impl Event for $t {
                    fn as_any(&self) -> &dyn std::any::Any {
                        self
                    }
                }
            )*
        }
    }

    impl_event!(PageLoaded, PageFailed, ResponseDiscarded, RowsDegraded);
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(AHashMap::new())),
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<E: Event>(&self, handler: Box<dyn EventHandler>) {
        let type_id = TypeId::of::<E>();
        let mut handlers = self.handlers.lock();
        handlers.entry(type_id).or_default().push(handler);
    }

    /// Subscribe a closure that only ever sees events of type `E`
    pub fn on<E, F>(&self, mut f: F)
    where
        E: Event,
        F: FnMut(&E) + Send + Sync + 'static,
    {
        self.subscribe::<E>(handler_from_fn(move |event| {
            if let Some(event) = event.as_any().downcast_ref::<E>() {
                f(event);
            }
        }));
    }

    /// Publish an event
    pub fn publish<E: Event>(&self, event: E) {
        let type_id = TypeId::of::<E>();
        let mut handlers = self.handlers.lock();

        if let Some(event_handlers) = handlers.get_mut(&type_id) {
            for handler in event_handlers.iter_mut() {
                handler.handle(&event);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

struct ClosureEventHandler<F> {
    handler: F,
}

impl<F> EventHandler for ClosureEventHandler<F>
where
    F: FnMut(&dyn Event) + Send + Sync,
{
    fn handle(&mut self, event: &dyn Event) {
        (self.handler)(event);
    }
}

/// Create an event handler from a closure
pub fn handler_from_fn<F>(f: F) -> Box<dyn EventHandler>
where
    F: FnMut(&dyn Event) + Send + Sync + 'static,
{
    Box::new(ClosureEventHandler { handler: f })
}

#[cfg(test)]
mod tests {
    use super::events::{PageFailed, ResponseDiscarded};
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_typed_subscription() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        bus.on::<ResponseDiscarded, _>(move |event| sink.lock().push(event.offset));

        let view_id = Uuid::new_v4();
        bus.publish(ResponseDiscarded { view_id, offset: 50 });
        bus.publish(PageFailed {
            view_id,
            variant: crate::variant::TableVariant::Public,
            offset: 0,
            message: "boom".to_string(),
            has_previous: false,
        });
        bus.publish(ResponseDiscarded { view_id, offset: 75 });

        assert_eq!(*seen.lock(), vec![50, 75]);
    }
}
