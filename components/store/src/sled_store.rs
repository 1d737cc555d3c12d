use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{MailItem, MailboxSnapshot, UserStore};

const USERS_TREE: &str = "users";
const MAIL_TREE: &str = "mail";

#[derive(Debug, Serialize, Deserialize)]
struct UserRecord {
    password: String,
}

/// The real backing [`UserStore`], persisted with `sled` the way the
/// teacher crate this workspace is built on already depends on `sled` +
/// `bincode` for embedded key/value storage.
///
/// Layout:
/// - `users` tree: username -> bincode-encoded [`UserRecord`].
/// - `mail` tree: `"{username}\0{seq:020}"` -> raw message bytes, where
///   `seq` is a per-database monotonically increasing id (`Db::generate_id`).
///   Zero-padding keeps lexicographic key order equal to delivery order, so
///   a prefix scan yields a stable mailbox ordering without a directory walk.
pub struct SledStore {
    db: sled::Db,
    users: sled::Tree,
    mail: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db = sled::open(path)?;
        let users = db.open_tree(USERS_TREE)?;
        let mail = db.open_tree(MAIL_TREE)?;
        Ok(Self { db, users, mail })
    }

    /// Registers a user with a password. Used by provisioning tooling; the
    /// session code only ever reads through [`UserStore`].
    pub fn put_user(&self, username: &str, password: &str) -> anyhow::Result<()> {
        let record = UserRecord {
            password: password.to_string(),
        };
        let encoded = bincode::serialize(&record)?;
        self.users.insert(username.as_bytes(), encoded)?;
        Ok(())
    }

    fn mail_prefix(username: &str) -> Vec<u8> {
        let mut key = username.as_bytes().to_vec();
        key.push(0);
        key
    }

    fn mail_key(username: &str, seq: u64) -> Vec<u8> {
        let mut key = Self::mail_prefix(username);
        key.extend_from_slice(format!("{:020}", seq).as_bytes());
        key
    }
}

#[async_trait]
impl UserStore for SledStore {
    async fn validate(&self, username: &str, password: Option<&str>) -> bool {
        let record = match self.users.get(username.as_bytes()) {
            Ok(Some(bytes)) => bincode::deserialize::<UserRecord>(&bytes).ok(),
            _ => None,
        };

        match (record, password) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(record), Some(pw)) => record.password == pw,
        }
    }

    async fn load_mailbox(&self, username: &str) -> anyhow::Result<MailboxSnapshot> {
        let prefix = Self::mail_prefix(username);
        let mut items = Vec::new();
        for entry in self.mail.scan_prefix(&prefix) {
            let (key, value) = entry?;
            let id = String::from_utf8_lossy(&key).into_owned();
            items.push(MailItem::new(id, Arc::new(value.to_vec())));
        }
        Ok(MailboxSnapshot::new(items))
    }

    async fn deliver(&self, recipients: &[String], body: Vec<u8>) -> anyhow::Result<()> {
        for recipient in recipients {
            if !self.users.contains_key(recipient.as_bytes())? {
                anyhow::bail!("unknown recipient: {}", recipient);
            }
        }

        let mut batch = sled::Batch::default();
        for recipient in recipients {
            let seq = self.db.generate_id()?;
            batch.insert(Self::mail_key(recipient, seq), body.clone());
        }
        self.mail.apply_batch(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, SledStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn validate_existence_and_password() {
        let (_dir, store) = temp_store();
        store.put_user("alice", "pw").unwrap();

        assert!(store.validate("alice", None).await);
        assert!(store.validate("alice", Some("pw")).await);
        assert!(!store.validate("alice", Some("wrong")).await);
        assert!(!store.validate("bob", None).await);
    }

    #[tokio::test]
    async fn deliver_rejects_unknown_recipient_atomically() {
        let (_dir, store) = temp_store();
        store.put_user("alice", "pw").unwrap();

        let res = store
            .deliver(&["alice".to_string(), "ghost".to_string()], b"hi".to_vec())
            .await;
        assert!(res.is_err());

        let mailbox = store.load_mailbox("alice").await.unwrap();
        assert_eq!(mailbox.count(), 0);
    }

    #[tokio::test]
    async fn delivered_messages_preserve_insertion_order() {
        let (_dir, store) = temp_store();
        store.put_user("alice", "pw").unwrap();

        store.deliver(&["alice".to_string()], b"first".to_vec()).await.unwrap();
        store.deliver(&["alice".to_string()], b"second".to_vec()).await.unwrap();

        let mailbox = store.load_mailbox("alice").await.unwrap();
        assert_eq!(mailbox.count(), 2);
        assert_eq!(mailbox.item(1).unwrap().open_reader(), b"first");
        assert_eq!(mailbox.item(2).unwrap().open_reader(), b"second");
    }
}
