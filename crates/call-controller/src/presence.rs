//! Presence directory: which connection currently speaks for an identity.
//!
//! Each client connection owns a bounded outbound queue. Notifications are
//! delivered with `try_send` so a slow or dead client can never stall the
//! meeting actor that produced the event; overflow is dropped, logged and
//! counted.

use crate::observability::metrics;
use crate::signaling::events::ServerEvent;
use common::types::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound handle for one client connection.
#[derive(Debug, Clone)]
pub struct ClientChannel {
    connection_id: Uuid,
    sender: mpsc::Sender<ServerEvent>,
}

impl ClientChannel {
    /// Create a channel with a fresh connection id.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (
            Self {
                connection_id: Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queue an event without waiting. Returns false if it was dropped.
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    target: "cc.presence",
                    connection_id = %self.connection_id,
                    event = event.name(),
                    "Client buffer full, dropping event"
                );
                metrics::record_notification_dropped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(
                    target: "cc.presence",
                    connection_id = %self.connection_id,
                    event = event.name(),
                    "Client channel closed, dropping event"
                );
                false
            }
        }
    }
}

/// Identity to connection mapping. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct PresenceDirectory {
    clients: Arc<RwLock<HashMap<UserId, ClientChannel>>>,
}

impl PresenceDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `channel`. Last registration wins; the replaced
    /// channel is returned.
    pub async fn register(&self, identity: UserId, channel: ClientChannel) -> Option<ClientChannel> {
        let connection_id = channel.connection_id();
        let (previous, count) = {
            let mut clients = self.clients.write().await;
            let previous = clients.insert(identity.clone(), channel);
            (previous, clients.len())
        };
        metrics::set_clients_connected(count);

        info!(
            target: "cc.presence",
            identity = %identity,
            connection_id = %connection_id,
            replaced = previous.is_some(),
            "Client registered"
        );
        previous
    }

    /// Remove `identity` only if it is still bound to `connection_id`.
    /// A connection that was superseded by a newer one leaves the newer
    /// binding in place.
    pub async fn unregister(&self, identity: &UserId, connection_id: Uuid) -> bool {
        let (removed, count) = {
            let mut clients = self.clients.write().await;
            let matches = clients
                .get(identity)
                .is_some_and(|c| c.connection_id() == connection_id);
            if matches {
                clients.remove(identity);
            }
            (matches, clients.len())
        };
        metrics::set_clients_connected(count);

        if removed {
            info!(target: "cc.presence", identity = %identity, "Client unregistered");
        } else {
            debug!(
                target: "cc.presence",
                identity = %identity,
                "Stale connection closed, newer registration kept"
            );
        }
        removed
    }

    pub async fn lookup(&self, identity: &UserId) -> Option<ClientChannel> {
        self.clients.read().await.get(identity).cloned()
    }

    pub async fn is_online(&self, identity: &UserId) -> bool {
        self.clients.read().await.contains_key(identity)
    }

    pub async fn online_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Best-effort delivery to one identity. Offline identities are skipped.
    pub async fn notify(&self, identity: &UserId, event: ServerEvent) -> bool {
        match self.lookup(identity).await {
            Some(channel) => channel.send(event),
            None => {
                debug!(
                    target: "cc.presence",
                    identity = %identity,
                    event = event.name(),
                    "Identity offline, skipping notification"
                );
                false
            }
        }
    }

    /// Deliver the same event to several identities; returns how many
    /// accepted it.
    pub async fn notify_all<'a, I>(&self, identities: I, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = &'a UserId>,
    {
        let channels: Vec<ClientChannel> = {
            let clients = self.clients.read().await;
            identities
                .into_iter()
                .filter_map(|id| clients.get(id).cloned())
                .collect()
        };
        channels
            .into_iter()
            .filter(|channel| channel.send(event.clone()))
            .count()
    }

    /// Deliver an event to every registered identity except `except`.
    pub async fn broadcast_except(&self, except: &UserId, event: &ServerEvent) -> usize {
        let channels: Vec<ClientChannel> = {
            let clients = self.clients.read().await;
            clients
                .iter()
                .filter(|(id, _)| *id != except)
                .map(|(_, channel)| channel.clone())
                .collect()
        };
        channels
            .into_iter()
            .filter(|channel| channel.send(event.clone()))
            .count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::MeetingId;

    fn ended() -> ServerEvent {
        ServerEvent::CallEnded {
            meeting_id: MeetingId::from("m"),
        }
    }

    #[tokio::test]
    async fn test_notify_registered_identity() {
        let presence = PresenceDirectory::new();
        let (channel, mut rx) = ClientChannel::new(8);
        presence.register(UserId::from("a"), channel).await;

        assert!(presence.notify(&UserId::from("a"), ended()).await);
        assert_eq!(rx.recv().await, Some(ended()));
    }

    #[tokio::test]
    async fn test_notify_offline_identity_is_noop() {
        let presence = PresenceDirectory::new();
        assert!(!presence.notify(&UserId::from("ghost"), ended()).await);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let presence = PresenceDirectory::new();
        let (first, mut first_rx) = ClientChannel::new(8);
        let (second, mut second_rx) = ClientChannel::new(8);
        let first_id = first.connection_id();

        presence.register(UserId::from("a"), first).await;
        let replaced = presence.register(UserId::from("a"), second).await;
        assert_eq!(replaced.map(|c| c.connection_id()), Some(first_id));

        presence.notify(&UserId::from("a"), ended()).await;
        assert_eq!(second_rx.recv().await, Some(ended()));
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_newer_binding() {
        let presence = PresenceDirectory::new();
        let (first, _first_rx) = ClientChannel::new(8);
        let (second, _second_rx) = ClientChannel::new(8);
        let first_id = first.connection_id();
        let second_id = second.connection_id();

        presence.register(UserId::from("a"), first).await;
        presence.register(UserId::from("a"), second).await;

        assert!(!presence.unregister(&UserId::from("a"), first_id).await);
        assert!(presence.is_online(&UserId::from("a")).await);

        assert!(presence.unregister(&UserId::from("a"), second_id).await);
        assert!(!presence.is_online(&UserId::from("a")).await);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let presence = PresenceDirectory::new();
        let (channel, mut rx) = ClientChannel::new(1);
        presence.register(UserId::from("slow"), channel).await;

        assert!(presence.notify(&UserId::from("slow"), ended()).await);
        assert!(!presence.notify(&UserId::from("slow"), ended()).await);

        assert_eq!(rx.recv().await, Some(ended()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notify_all_counts_deliveries() {
        let presence = PresenceDirectory::new();
        let (a, _a_rx) = ClientChannel::new(8);
        let (b, _b_rx) = ClientChannel::new(8);
        presence.register(UserId::from("a"), a).await;
        presence.register(UserId::from("b"), b).await;

        let targets = [UserId::from("a"), UserId::from("b"), UserId::from("c")];
        assert_eq!(presence.notify_all(targets.iter(), &ended()).await, 2);
        assert_eq!(presence.online_count().await, 2);
    }

    #[tokio::test]
    async fn test_broadcast_skips_excluded_identity() {
        let presence = PresenceDirectory::new();
        let (a, mut a_rx) = ClientChannel::new(8);
        let (b, mut b_rx) = ClientChannel::new(8);
        let (c, mut c_rx) = ClientChannel::new(8);
        presence.register(UserId::from("a"), a).await;
        presence.register(UserId::from("b"), b).await;
        presence.register(UserId::from("c"), c).await;

        assert_eq!(presence.broadcast_except(&UserId::from("a"), &ended()).await, 2);
        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.recv().await, Some(ended()));
        assert_eq!(c_rx.recv().await, Some(ended()));
    }
}
