//! Fan-out of server messages to connected control clients
//!
//! Every client subscribes to one broadcast channel. Messages are encoded
//! once and shared, a client that falls behind receives `Lagged` and is
//! re-synchronised with a fresh init snapshot by its connection task.

use super::messages::ServerMessage;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// An encoded message, optionally skipping the client that caused it
#[derive(Debug, Clone)]
pub struct Outbound {
    pub exclude: Option<u64>,
    pub text: Arc<str>,
}

impl Outbound {
    pub fn is_for(&self, client: u64) -> bool {
        self.exclude != Some(client)
    }
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Outbound>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Encodes and sends `message`; returns the number of receiving clients
    pub fn publish(
        &self,
        message: &ServerMessage,
        exclude: Option<u64>,
    ) -> Result<usize, serde_json::Error> {
        let text: Arc<str> = message.to_json()?.into();

        // No subscribers is not an error, nobody is connected
        let receivers = self.tx.send(Outbound { exclude, text }).unwrap_or(0);
        trace!(receivers, "Published control message");
        Ok(receivers)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let broadcaster = Broadcaster::new(8);
        let mut rx1 = broadcaster.subscribe();
        let mut rx2 = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        let sent = broadcaster
            .publish(&ServerMessage::UpdateOnAirChange(true), Some(1))
            .unwrap();
        assert_eq!(sent, 2);

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert_eq!(a.text, b.text);
        assert!(!a.is_for(1));
        assert!(a.is_for(2));
    }

    #[test]
    fn test_no_subscribers() {
        let broadcaster = Broadcaster::new(8);
        let sent = broadcaster
            .publish(&ServerMessage::UpdateTally(vec![0]), None)
            .unwrap();
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_slow_client_lags() {
        let broadcaster = Broadcaster::new(2);
        let mut rx = broadcaster.subscribe();

        for state in 0..5u8 {
            broadcaster
                .publish(&ServerMessage::UpdateTally(vec![state]), None)
                .unwrap();
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert!(rx.recv().await.is_ok());
    }
}
