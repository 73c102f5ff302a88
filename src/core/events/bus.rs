

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::base::{Event, LifecycleKind};


pub const ANY_EVENT: &str = "*";


pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;


pub struct EventBus {
    handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
}

impl EventBus {

    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }


    pub async fn register(&self, event_type: &str, handler: EventHandler) {
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
        debug!("Registered handler for event type: {}", event_type);
    }

    pub async fn on(&self, kind: LifecycleKind, handler: EventHandler) {
        self.register(kind.as_str(), handler).await;
    }


    pub async fn emit(&self, event: Event) -> usize {
        let handlers = self.handlers.read().await;

        let targets: Vec<EventHandler> = handlers
            .get(&event.event_type)
            .into_iter()
            .chain(handlers.get(ANY_EVENT))
            .flatten()
            .cloned()
            .collect();
        drop(handlers);

        if targets.is_empty() {
            debug!("No handlers for event type: {}", event.event_type);
            return 0;
        }

        let notified = targets.len();
        for handler in targets {
            let event = event.clone();
            tokio::spawn(async move {
                handler(event);
            });
        }
        notified
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
