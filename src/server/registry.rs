//! Registry of connected clients
//!
//! Sharded concurrent map keyed by connection id. Membership is mutated only
//! by the listener's accept path and each client's receive loop; everything
//! else reads snapshots, so no shard lock is held across an await.

use dashmap::DashMap;
use futures_util::future::join_all;
use tracing::Level;

use crate::log_server;
use crate::server::client::ServerClient;
use crate::ws::connection::ConnectionId;

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the message was written to
    pub delivered: usize,
    /// Clients skipped because they were no longer open
    pub skipped: usize,
    /// Clients whose write failed
    pub failed: usize,
}

impl BroadcastReport {
    pub fn total(&self) -> usize {
        self.delivered + self.skipped + self.failed
    }
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, ServerClient>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, client: ServerClient) {
        self.clients.insert(client.id(), client);
    }

    /// Remove a client; `None` if it was already gone
    pub(crate) fn remove(&self, id: ConnectionId) -> Option<ServerClient> {
        self.clients.remove(&id).map(|(_, client)| client)
    }

    pub fn get(&self, id: ConnectionId) -> Option<ServerClient> {
        self.clients.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.clients.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clone of the current membership
    pub fn snapshot(&self) -> Vec<ServerClient> {
        self.clients.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Send `message` to every open client concurrently
    ///
    /// Works on a snapshot: clients joining during the broadcast may miss it,
    /// clients leaving are skipped or counted as failed. One client's failure
    /// never affects delivery to the others.
    pub async fn broadcast(&self, message: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        let mut sends = Vec::new();
        for client in self.snapshot() {
            if client.is_open() {
                sends.push(async move {
                    let result = client.send_async(message).await;
                    if let Err(e) = &result {
                        log_server!(Level::DEBUG, id = %client.id(), "broadcast write failed: {}", e);
                    }
                    result
                });
            } else {
                report.skipped += 1;
            }
        }

        for result in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(_) => report.failed += 1,
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::server_client_pair;
    use futures_util::StreamExt;
    use proptest::prelude::*;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = ClientRegistry::new();
        let (client, _peer) = server_client_pair().await;
        let id = client.id();

        registry.insert(client.clone());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id));
        assert_eq!(registry.get(id), Some(client));

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_open_client() {
        let registry = ClientRegistry::new();
        let mut peers = Vec::new();
        for _ in 0..3 {
            let (client, peer) = server_client_pair().await;
            registry.insert(client);
            peers.push(peer);
        }

        let report = registry.broadcast("hello all").await;
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 3,
                skipped: 0,
                failed: 0
            }
        );

        for peer in &mut peers {
            assert_eq!(peer.next().await.unwrap().unwrap(), Message::text("hello all"));
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_closed_client() {
        let registry = ClientRegistry::new();
        let (open, mut open_peer) = server_client_pair().await;
        let (closed, _closed_peer) = server_client_pair().await;
        closed.close_async("Bye").await;

        registry.insert(open);
        registry.insert(closed);

        let report = registry.broadcast("still here").await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.total(), 2);
        assert_eq!(open_peer.next().await.unwrap().unwrap(), Message::text("still here"));
    }

    #[tokio::test]
    async fn test_broadcast_survives_dead_peer() {
        let registry = ClientRegistry::new();
        let (alive, mut alive_peer) = server_client_pair().await;
        let (orphan, orphan_peer) = server_client_pair().await;
        drop(orphan_peer);

        registry.insert(alive);
        registry.insert(orphan);

        let report = registry.broadcast("ping-all").await;
        assert_eq!(report.total(), 2);
        assert!(report.delivered >= 1);
        assert_eq!(alive_peer.next().await.unwrap().unwrap(), Message::text("ping-all"));
    }

    #[tokio::test]
    async fn test_broadcast_on_empty_registry() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.broadcast("nobody").await, BroadcastReport::default());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_broadcast_counts_match_membership(open in 0usize..5, closed in 0usize..3) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let registry = ClientRegistry::new();
                let mut peers = Vec::new();
                for _ in 0..open {
                    let (client, peer) = server_client_pair().await;
                    registry.insert(client);
                    peers.push(peer);
                }
                for _ in 0..closed {
                    let (client, peer) = server_client_pair().await;
                    client.close_async("Bye").await;
                    registry.insert(client);
                    peers.push(peer);
                }

                let report = registry.broadcast("m").await;
                assert_eq!(report.delivered, open);
                assert_eq!(report.skipped, closed);
                assert_eq!(report.failed, 0);
            });
        }
    }
}
