/// Routing of inbound send intents.
///
/// Each intent is classified once, checked against the membership oracle
/// or account directory, encrypted, persisted, and only then fanned out to
/// every live connection of its recipients. Rejected intents are dropped
/// without a reply to the sender.
use crate::auth::AccountDirectory;
use crate::codec::MessageCodec;
use crate::db::models::NewMessage;
use crate::db::HistoryStore;
use crate::error::ChatError;
use crate::membership::GroupMembership;
use crate::registry::ConnectionRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const RECEIVE_EVENT: &str = "receive";

/// Inbound frame as sent by clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl SendRequest {
    /// Resolve the addressing of this request. A group id wins over a
    /// receiver; empty strings count as absent.
    pub fn intent(&self) -> Option<SendIntent> {
        let present = |field: &Option<String>| field.clone().filter(|value| !value.is_empty());

        if let Some(group_id) = present(&self.group_id) {
            return Some(SendIntent::Group { group_id });
        }
        present(&self.receiver).map(|receiver| SendIntent::Direct { receiver })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendIntent {
    Direct { receiver: String },
    Group { group_id: String },
}

/// Payload of a `receive` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryEvent {
    pub sender: String,
    pub receiver: String,
    pub message: String,
    pub is_group: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Unauthenticated,
    EmptyMessage,
    NoTarget,
    GroupNotFound,
    NotAMember,
    UnknownReceiver,
    StorageFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Persisted under `message_id` and written to `deliveries` connections
    Delivered { message_id: i64, deliveries: usize },
    Dropped(DropReason),
}

pub struct Router {
    registry: Arc<ConnectionRegistry>,
    history: HistoryStore,
    groups: GroupMembership,
    codec: Arc<MessageCodec>,
    directory: Arc<dyn AccountDirectory>,
}

impl Router {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        history: HistoryStore,
        groups: GroupMembership,
        codec: Arc<MessageCodec>,
        directory: Arc<dyn AccountDirectory>,
    ) -> Self {
        Router {
            registry,
            history,
            groups,
            codec,
            directory,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn groups(&self) -> &GroupMembership {
        &self.groups
    }

    /// Router over a fresh in-memory database with nobody connected
    #[cfg(any(test, feature = "test_utils"))]
    pub fn in_memory(key: [u8; crate::codec::KEY_LEN], directory: Arc<dyn AccountDirectory>) -> Self {
        let pool = crate::db::create_test_pool();
        let codec = Arc::new(MessageCodec::new(key));
        Router::new(
            Arc::new(ConnectionRegistry::new()),
            HistoryStore::new(pool.clone(), codec.clone()),
            GroupMembership::new(pool, directory.clone()),
            codec,
            directory,
        )
    }

    /// Route one send intent from `sender`
    pub async fn handle_send(&self, sender: Option<&str>, request: SendRequest) -> SendOutcome {
        let Some(sender) = sender.filter(|s| !s.is_empty()) else {
            log::warn!("Dropping message from unauthenticated connection");
            return SendOutcome::Dropped(DropReason::Unauthenticated);
        };
        if request.message.is_empty() {
            log::debug!("Dropping empty message from {}", sender);
            return SendOutcome::Dropped(DropReason::EmptyMessage);
        }

        let outcome = match request.intent() {
            Some(SendIntent::Group { group_id }) => {
                self.send_to_group(sender, &group_id, request.message).await
            }
            Some(SendIntent::Direct { receiver }) => {
                self.send_direct(sender, &receiver, request.message).await
            }
            None => SendOutcome::Dropped(DropReason::NoTarget),
        };

        if let SendOutcome::Dropped(reason) = &outcome {
            log::debug!("Message from {} dropped: {:?}", sender, reason);
        }
        outcome
    }

    async fn send_to_group(&self, sender: &str, group_id: &str, message: String) -> SendOutcome {
        let members = match self.groups.get_members(group_id).await {
            Ok(members) => members,
            Err(ChatError::NotFound(_)) => return SendOutcome::Dropped(DropReason::GroupNotFound),
            Err(e) => {
                log::error!("Failed to load members of group {}: {}", group_id, e);
                return SendOutcome::Dropped(DropReason::StorageFailure);
            }
        };
        if !members.contains(sender) {
            return SendOutcome::Dropped(DropReason::NotAMember);
        }

        let message_id = match self.persist(sender, group_id, &message, true).await {
            Some(id) => id,
            None => return SendOutcome::Dropped(DropReason::StorageFailure),
        };

        let event = DeliveryEvent {
            sender: sender.to_string(),
            receiver: group_id.to_string(),
            message,
            is_group: true,
        };
        let mut deliveries = 0;
        for member in &members {
            deliveries += self.registry.fanout(member, RECEIVE_EVENT, &event).await;
        }

        log::debug!(
            "Group message {} from {} to {} reached {} connections",
            message_id,
            sender,
            group_id,
            deliveries
        );
        SendOutcome::Delivered {
            message_id,
            deliveries,
        }
    }

    async fn send_direct(&self, sender: &str, receiver: &str, message: String) -> SendOutcome {
        if !self.directory.contains(receiver) {
            return SendOutcome::Dropped(DropReason::UnknownReceiver);
        }

        let message_id = match self.persist(sender, receiver, &message, false).await {
            Some(id) => id,
            None => return SendOutcome::Dropped(DropReason::StorageFailure),
        };

        let event = DeliveryEvent {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            message,
            is_group: false,
        };
        let mut deliveries = self.registry.fanout(sender, RECEIVE_EVENT, &event).await;
        if receiver != sender {
            deliveries += self.registry.fanout(receiver, RECEIVE_EVENT, &event).await;
        }

        log::debug!(
            "Direct message {} from {} to {} reached {} connections",
            message_id,
            sender,
            receiver,
            deliveries
        );
        SendOutcome::Delivered {
            message_id,
            deliveries,
        }
    }

    /// Encrypt and store; None when the store rejected the write
    async fn persist(&self, sender: &str, target: &str, message: &str, is_group: bool) -> Option<i64> {
        let sealed = self.codec.encrypt(message);
        let record = NewMessage {
            sender: sender.to_string(),
            target: target.to_string(),
            ciphertext: sealed.ciphertext,
            iv: sealed.iv.to_vec(),
            is_group,
        };

        match self.history.append(record).await {
            Ok(stored) => Some(stored.id),
            Err(e) => {
                log::error!("Failed to persist message from {} to {}: {}", sender, target, e);
                None
            }
        }
    }
}
