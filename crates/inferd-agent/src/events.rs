//! Typed pub/sub with synchronous handler dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};

use inferd_core::data::AgentData;
use inferd_core::error::CoreError;

/// A dispatched event.
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub event_type: String,
    pub source: String,
    pub data: AgentData,
    pub timestamp: DateTime<Utc>,
}

/// Synchronous event consumer. Errors are logged and do not abort other
/// handlers.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &AgentEvent) -> Result<(), CoreError>;
}

/// Event bus: subscribers are held weakly, so dropping a handler elsewhere
/// retires it. Expired references are pruned on unsubscribe.
pub struct EventSystem {
    handlers: Mutex<HashMap<String, Vec<Weak<dyn EventHandler>>>>,
    running: AtomicBool,
}

impl EventSystem {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        tracing::debug!("Event system started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::debug!("Event system stopped");
    }

    pub fn subscribe(&self, event_type: &str, handler: &Arc<dyn EventHandler>) {
        self.handlers
            .lock()
            .expect("handlers lock poisoned")
            .entry(event_type.to_string())
            .or_default()
            .push(Arc::downgrade(handler));
        tracing::debug!(event_type, "Handler subscribed");
    }

    /// Remove a handler by identity; expired weak references are pruned as a
    /// side effect.
    pub fn unsubscribe(&self, event_type: &str, handler: &Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.lock().expect("handlers lock poisoned");
        if let Some(list) = handlers.get_mut(event_type) {
            list.retain(|weak| {
                weak.upgrade()
                    .is_some_and(|strong| !Arc::ptr_eq(&strong, handler))
            });
            if list.is_empty() {
                handlers.remove(event_type);
            }
            tracing::debug!(event_type, "Handler unsubscribed");
        }
    }

    /// Dispatch synchronously to every live handler for the type. A handler
    /// error is logged without aborting the remaining handlers. Gated by
    /// start/stop.
    pub fn emit(&self, event_type: &str, source: &str, data: AgentData) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let live: Vec<Arc<dyn EventHandler>> = {
            let handlers = self.handlers.lock().expect("handlers lock poisoned");
            handlers
                .get(event_type)
                .map(|list| list.iter().filter_map(Weak::upgrade).collect())
                .unwrap_or_default()
        };

        if live.is_empty() {
            tracing::debug!(event_type, source, "Event emitted with no handlers");
            return;
        }

        let event = AgentEvent {
            event_type: event_type.to_string(),
            source: source.to_string(),
            data,
            timestamp: Utc::now(),
        };
        for handler in &live {
            if let Err(err) = handler.handle_event(&event) {
                tracing::error!(event_type, error = %err, "Event handler error");
            }
        }
        tracing::debug!(event_type, source, handlers = live.len(), "Event emitted");
    }
}

impl Default for EventSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Recorder {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    impl EventHandler for Recorder {
        fn handle_event(&self, event: &AgentEvent) -> Result<(), CoreError> {
            self.seen.lock().unwrap().push(event.event_type.clone());
            if self.fail {
                return Err(CoreError::Internal("handler exploded".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn emit_reaches_all_subscribers_of_type() {
        let events = EventSystem::new();
        events.start();

        let first = Recorder::new(false);
        let second = Recorder::new(false);
        let other = Recorder::new(false);
        events.subscribe("job_done", &(first.clone() as Arc<dyn EventHandler>));
        events.subscribe("job_done", &(second.clone() as Arc<dyn EventHandler>));
        events.subscribe("unrelated", &(other.clone() as Arc<dyn EventHandler>));

        events.emit("job_done", "agent-1", AgentData::new());

        assert_eq!(*first.seen.lock().unwrap(), vec!["job_done"]);
        assert_eq!(*second.seen.lock().unwrap(), vec!["job_done"]);
        assert!(other.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_handler_does_not_abort_others() {
        let events = EventSystem::new();
        events.start();

        let bad = Recorder::new(true);
        let good = Recorder::new(false);
        events.subscribe("tick", &(bad.clone() as Arc<dyn EventHandler>));
        events.subscribe("tick", &(good.clone() as Arc<dyn EventHandler>));

        events.emit("tick", "src", AgentData::new());
        assert_eq!(good.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn stop_gates_emission() {
        let events = EventSystem::new();
        let handler = Recorder::new(false);
        events.subscribe("tick", &(handler.clone() as Arc<dyn EventHandler>));

        // Never started: no dispatch.
        events.emit("tick", "src", AgentData::new());
        assert!(handler.seen.lock().unwrap().is_empty());

        events.start();
        events.emit("tick", "src", AgentData::new());
        events.stop();
        events.emit("tick", "src", AgentData::new());
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn unsubscribe_removes_by_identity() {
        let events = EventSystem::new();
        events.start();

        let keep = Recorder::new(false);
        let drop_me = Recorder::new(false);
        events.subscribe("tick", &(keep.clone() as Arc<dyn EventHandler>));
        events.subscribe("tick", &(drop_me.clone() as Arc<dyn EventHandler>));
        events.unsubscribe("tick", &(drop_me.clone() as Arc<dyn EventHandler>));

        events.emit("tick", "src", AgentData::new());
        assert_eq!(keep.seen.lock().unwrap().len(), 1);
        assert!(drop_me.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn dropped_handlers_are_not_dispatched() {
        let events = EventSystem::new();
        events.start();

        let temp = Recorder::new(false);
        events.subscribe("tick", &(temp.clone() as Arc<dyn EventHandler>));
        drop(temp);

        // Upgrade fails; emit silently skips the dead subscriber.
        events.emit("tick", "src", AgentData::new());
    }
}
