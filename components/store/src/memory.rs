use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::types::{MailItem, MailboxSnapshot, UserStore};

#[derive(Debug, Default)]
struct User {
    password: String,
    messages: Vec<Arc<Vec<u8>>>,
}

/// A deterministic in-memory [`UserStore`], intended only for tests — data
/// does not survive past the process, same caveat as the teacher's own
/// in-memory storage backends in the pack this project draws on.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user with a password and an initial set of message bodies.
    /// Test-only convenience; production code reaches the store only
    /// through [`UserStore`].
    pub async fn seed_user(&self, username: &str, password: &str, messages: Vec<Vec<u8>>) {
        let mut users = self.users.lock().await;
        users.insert(
            username.to_string(),
            User {
                password: password.to_string(),
                messages: messages.into_iter().map(Arc::new).collect(),
            },
        );
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn validate(&self, username: &str, password: Option<&str>) -> bool {
        let users = self.users.lock().await;
        match users.get(username) {
            None => false,
            Some(user) => match password {
                None => true,
                Some(pw) => user.password == pw,
            },
        }
    }

    async fn load_mailbox(&self, username: &str) -> anyhow::Result<MailboxSnapshot> {
        let users = self.users.lock().await;
        let user = users
            .get(username)
            .ok_or_else(|| anyhow::anyhow!("unknown user: {}", username))?;

        let items = user
            .messages
            .iter()
            .enumerate()
            .map(|(idx, body)| MailItem::new(format!("{}-{}", username, idx), body.clone()))
            .collect();

        Ok(MailboxSnapshot::new(items))
    }

    async fn deliver(&self, recipients: &[String], body: Vec<u8>) -> anyhow::Result<()> {
        let body = Arc::new(body);
        let mut users = self.users.lock().await;
        for recipient in recipients {
            if !users.contains_key(recipient) {
                anyhow::bail!("unknown recipient: {}", recipient);
            }
        }
        for recipient in recipients {
            users.get_mut(recipient).unwrap().messages.push(body.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn validate_existence_and_password() {
        let store = MemoryStore::new();
        store.seed_user("alice", "pw", vec![]).await;

        assert!(store.validate("alice", None).await);
        assert!(store.validate("alice", Some("pw")).await);
        assert!(!store.validate("alice", Some("wrong")).await);
        assert!(!store.validate("bob", None).await);
    }

    #[tokio::test]
    async fn deliver_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.seed_user("alice", "pw", vec![]).await;

        let err = store
            .deliver(&["alice".to_string(), "nobody".to_string()], b"hi".to_vec())
            .await;
        assert!(err.is_err());

        let mailbox = store.load_mailbox("alice").await.unwrap();
        assert_eq!(mailbox.count(), 0, "partial delivery must not have landed");
    }

    #[tokio::test]
    async fn deliver_then_load_mailbox_round_trips() {
        let store = MemoryStore::new();
        store.seed_user("alice", "pw", vec![]).await;
        store
            .deliver(&["alice".to_string()], b"hello world".to_vec())
            .await
            .unwrap();

        let mailbox = store.load_mailbox("alice").await.unwrap();
        assert_eq!(mailbox.count(), 1);
        assert_eq!(mailbox.total_size(), 11);
        assert_eq!(mailbox.item(1).unwrap().open_reader(), b"hello world");
    }
}
