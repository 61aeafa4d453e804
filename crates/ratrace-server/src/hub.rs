//! Fan-out of server messages to connected clients.
//!
//! The hub only knows connection handles and their outbound channels; which
//! connections belong to which identity or room is decided by the caller.

use crate::protocol::ServerMessage;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Default)]
pub struct BroadcastHub {
    senders: DashMap<Uuid, mpsc::UnboundedSender<ServerMessage>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn: Uuid, sender: mpsc::UnboundedSender<ServerMessage>) {
        self.senders.insert(conn, sender);
    }

    pub fn unregister(&self, conn: Uuid) {
        self.senders.remove(&conn);
    }

    pub fn connection_count(&self) -> usize {
        self.senders.len()
    }

    /// Send to one connection. A closed channel is ignored; the connection
    /// task cleans itself up.
    pub fn send(&self, conn: Uuid, msg: ServerMessage) {
        if let Some(sender) = self.senders.get(&conn) {
            let _ = sender.send(msg);
        }
    }

    /// Send to a set of connections.
    pub fn send_many(&self, conns: impl IntoIterator<Item = Uuid>, msg: &ServerMessage) {
        for conn in conns {
            self.send(conn, msg.clone());
        }
    }

    /// Send to every connected client.
    pub fn send_all(&self, msg: &ServerMessage) {
        for entry in self.senders.iter() {
            let _ = entry.value().send(msg.clone());
        }
    }
}
