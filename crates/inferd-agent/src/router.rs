//! Point-to-point and broadcast message delivery between agents.
//!
//! A single routing task drains the queue and invokes delivery handlers on
//! its own task; handlers must not block indefinitely. The router knows
//! agents only by id; delivery closures are the sole back-reference.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use inferd_core::message::AgentMessage;

/// Bounded wait when joining the routing task at stop time.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Async delivery callback registered per agent id.
pub type DeliveryHandler = Arc<dyn Fn(AgentMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Single-queue message router.
pub struct MessageRouter {
    handlers: RwLock<HashMap<String, DeliveryHandler>>,
    tx: mpsc::UnboundedSender<AgentMessage>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<AgentMessage>>>,
    cancel: CancellationToken,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MessageRouter {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handlers: RwLock::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Start the routing task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(rx) = self.rx.lock().expect("rx lock poisoned").take() else {
            return;
        };
        let router = Arc::clone(self);
        let handle = tokio::spawn(async move {
            router.routing_loop(rx).await;
        });
        *self.task.lock().expect("task lock poisoned") = Some(handle);
        tracing::info!("Message router started");
    }

    /// Stop the routing task and join it within a bounded wait.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let handle = self.task.lock().expect("task lock poisoned").take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(STOP_JOIN_TIMEOUT, handle).await;
        }
        tracing::info!("Message router stopped");
    }

    pub fn register_handler(&self, agent_id: &str, handler: DeliveryHandler) {
        self.handlers
            .write()
            .expect("handlers lock poisoned")
            .insert(agent_id.to_string(), handler);
        tracing::debug!(agent_id, "Registered message handler");
    }

    pub fn unregister_handler(&self, agent_id: &str) {
        self.handlers
            .write()
            .expect("handlers lock poisoned")
            .remove(agent_id);
        tracing::debug!(agent_id, "Unregistered message handler");
    }

    /// Enqueue a point-to-point message.
    pub fn route_message(&self, message: AgentMessage) {
        tracing::debug!(
            message_id = %message.id,
            from = %message.from_agent,
            to = %message.to_agent,
            "Message queued"
        );
        let _ = self.tx.send(message);
    }

    /// Enqueue one copy per registered recipient, excluding the sender.
    pub fn broadcast_message(&self, message: &AgentMessage) {
        let recipients: Vec<String> = {
            let handlers = self.handlers.read().expect("handlers lock poisoned");
            handlers
                .keys()
                .filter(|id| **id != message.from_agent)
                .cloned()
                .collect()
        };

        for recipient in recipients {
            let mut copy = message.clone();
            copy.to_agent = recipient;
            let _ = self.tx.send(copy);
        }
        tracing::debug!(message_id = %message.id, from = %message.from_agent, "Broadcast queued");
    }

    async fn routing_loop(&self, mut rx: mpsc::UnboundedReceiver<AgentMessage>) {
        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let handler = {
                let handlers = self.handlers.read().expect("handlers lock poisoned");
                handlers.get(&message.to_agent).cloned()
            };
            match handler {
                Some(handler) => {
                    let id = message.id;
                    let to = message.to_agent.clone();
                    handler(message).await;
                    tracing::debug!(message_id = %id, to = %to, "Message delivered");
                }
                None => {
                    // No DLQ: drop with a warning.
                    tracing::warn!(
                        message_id = %message.id,
                        to = %message.to_agent,
                        "No handler for agent, dropping message"
                    );
                }
            }
        }
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inferd_core::data::AgentData;

    fn collector(
        router: &MessageRouter,
        agent_id: &str,
        sink: &Arc<Mutex<Vec<(String, String)>>>,
    ) {
        let sink = Arc::clone(sink);
        let id = agent_id.to_string();
        router.register_handler(
            agent_id,
            Arc::new(move |message| {
                let sink = Arc::clone(&sink);
                let id = id.clone();
                Box::pin(async move {
                    sink.lock().unwrap().push((id, message.msg_type));
                })
            }),
        );
    }

    async fn wait_for(sink: &Arc<Mutex<Vec<(String, String)>>>, count: usize) {
        for _ in 0..200 {
            if sink.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} deliveries, got {:?}", sink.lock().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn routes_point_to_point() {
        let router = Arc::new(MessageRouter::new());
        let sink = Arc::new(Mutex::new(Vec::new()));
        collector(&router, "a", &sink);
        collector(&router, "b", &sink);
        router.start();

        router.route_message(
            AgentMessage::new("a", "b", "ping").with_payload(AgentData::new()),
        );
        wait_for(&sink, 1).await;

        assert_eq!(*sink.lock().unwrap(), vec![("b".to_string(), "ping".to_string())]);
        router.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn broadcast_excludes_sender() {
        let router = Arc::new(MessageRouter::new());
        let sink = Arc::new(Mutex::new(Vec::new()));
        collector(&router, "a", &sink);
        collector(&router, "b", &sink);
        collector(&router, "c", &sink);
        router.start();

        router.broadcast_message(&AgentMessage::new("a", "", "notice"));
        wait_for(&sink, 2).await;

        let delivered = sink.lock().unwrap();
        let mut recipients: Vec<&str> = delivered.iter().map(|(id, _)| id.as_str()).collect();
        recipients.sort_unstable();
        assert_eq!(recipients, vec!["b", "c"]);
        router.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_recipient_drops_without_stalling() {
        let router = Arc::new(MessageRouter::new());
        let sink = Arc::new(Mutex::new(Vec::new()));
        collector(&router, "b", &sink);
        router.start();

        router.route_message(AgentMessage::new("a", "ghost", "ping"));
        router.route_message(AgentMessage::new("a", "b", "after"));
        wait_for(&sink, 1).await;

        assert_eq!(*sink.lock().unwrap(), vec![("b".to_string(), "after".to_string())]);
        router.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let router = Arc::new(MessageRouter::new());
        router.start();
        router.stop().await;
        router.stop().await;
    }
}
