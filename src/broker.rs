//! Process-wide event fan-out.
//!
//! One control task owns the listener registry. Registration,
//! deregistration and publishing are all messages on its inbound channel,
//! so publishers never wait on listeners. Each listener has a bounded queue;
//! a listener that lets it fill up is dropped and its stream ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};

use crate::app::Result;
use crate::domain::{Channel, Item};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NewChannel(Channel),
    UpdateChannel(Channel),
    DeleteChannel(Channel),
    NewItem { item: Item, channel: String },
}

impl Event {
    /// Wire name used as the SSE event type.
    pub fn name(&self) -> &'static str {
        match self {
            Event::NewChannel(_) => "new channel",
            Event::UpdateChannel(_) => "update channel",
            Event::DeleteChannel(_) => "delete channel",
            Event::NewItem { .. } => "new item",
        }
    }

    pub fn data(&self) -> Result<String> {
        let value = match self {
            Event::NewChannel(channel) | Event::UpdateChannel(channel) => serde_json::to_value(channel)?,
            Event::DeleteChannel(channel) => json!({ "uid": channel.uid }),
            Event::NewItem { item, channel } => json!({ "item": item, "channel": channel }),
        };
        Ok(value.to_string())
    }
}

/// Events queued per listener before it counts as stalled.
pub const LISTENER_BUFFER: usize = 64;

enum Message {
    Register(u64, Sender<Event>),
    Deregister(u64),
    Publish(Event),
}

/// Cloneable handle to the broker task.
#[derive(Clone)]
pub struct BrokerHandle {
    tx: UnboundedSender<Message>,
    next_id: Arc<AtomicU64>,
}

/// Receives every event published after it registered. Deregisters itself
/// when dropped.
pub struct Listener {
    id: u64,
    rx: Receiver<Event>,
    control: UnboundedSender<Message>,
}

impl Listener {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.control.send(Message::Deregister(self.id));
    }
}

pub struct Broker;

impl Broker {
    /// Start the control loop on the current runtime.
    pub fn spawn() -> BrokerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run(rx));
        BrokerHandle {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn run(mut rx: UnboundedReceiver<Message>) {
        let mut listeners: HashMap<u64, Sender<Event>> = HashMap::new();

        while let Some(message) = rx.recv().await {
            match message {
                Message::Register(id, tx) => {
                    listeners.insert(id, tx);
                    tracing::debug!("Listener {} registered ({} active)", id, listeners.len());
                }
                Message::Deregister(id) => {
                    listeners.remove(&id);
                    tracing::debug!("Listener {} deregistered ({} active)", id, listeners.len());
                }
                Message::Publish(event) => {
                    listeners.retain(|id, tx| match tx.try_send(event.clone()) {
                        Ok(()) => true,
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!("Listener {} is not keeping up; disconnecting it", id);
                            false
                        }
                        Err(TrySendError::Closed(_)) => false,
                    });
                }
            }
        }
        tracing::debug!("Broker stopped");
    }
}

impl BrokerHandle {
    pub fn publish(&self, event: Event) {
        if self.tx.send(Message::Publish(event)).is_err() {
            tracing::warn!("Broker is not running; event dropped");
        }
    }

    pub fn subscribe(&self) -> Listener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        let _ = self.tx.send(Message::Register(id, tx));
        Listener {
            id,
            rx,
            control: self.tx.clone(),
        }
    }
}
