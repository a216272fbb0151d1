use ferve_core::protocol::{encode, OutboundMsg, ProtocolError};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error("outbound queue full")]
    Full,
    #[error(transparent)]
    Encode(#[from] ProtocolError),
}

/// One client's outbound side. Frames are queued as encoded text and drained by
/// the connection's writer task.
#[derive(Debug)]
pub struct Connection {
    conn_id: String,
    sender: mpsc::Sender<String>,
}

impl Connection {
    pub fn new(conn_id: impl Into<String>, sender: mpsc::Sender<String>) -> Self {
        Self {
            conn_id: conn_id.into(),
            sender,
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Queues a reply, waiting for room in the outbound queue.
    pub async fn send(&self, msg: &OutboundMsg) -> Result<(), SendError> {
        let text = encode(msg)?;
        self.sender.send(text).await.map_err(|_| SendError::Closed)
    }

    /// Queues an already encoded frame without waiting.
    pub fn offer(&self, text: String) -> Result<(), SendError> {
        self.sender.try_send(text).map_err(|err| match err {
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            mpsc::error::TrySendError::Full(_) => SendError::Full,
        })
    }

    pub fn offer_msg(&self, msg: &OutboundMsg) -> Result<(), SendError> {
        self.offer(encode(msg)?)
    }
}

/// Membership of connections that receive broadcasts.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    members: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, conn: Arc<Connection>) {
        self.members
            .write()
            .await
            .insert(conn.conn_id.clone(), conn);
    }

    pub async fn unregister(&self, conn_id: &str) -> Option<Arc<Connection>> {
        self.members.write().await.remove(conn_id)
    }

    pub async fn contains(&self, conn_id: &str) -> bool {
        self.members.read().await.contains_key(conn_id)
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Copies the current members out so callers never hold the lock while sending.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.members.read().await.values().cloned().collect()
    }

    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Connection),
    {
        for conn in self.snapshot().await {
            f(&conn);
        }
    }
}
