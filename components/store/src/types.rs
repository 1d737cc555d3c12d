use std::sync::Arc;

use async_trait::async_trait;

/// A single message in a mailbox snapshot. Opaque beyond size, position and
/// deletion state, per the mail-store contract.
#[derive(Debug, Clone)]
pub struct MailItem {
    id: String,
    size: usize,
    deleted: bool,
    body: Arc<Vec<u8>>,
}

impl MailItem {
    pub(crate) fn new(id: String, body: Arc<Vec<u8>>) -> Self {
        let size = body.len();
        Self {
            id,
            size,
            deleted: false,
            body,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn open_reader(&self) -> &[u8] {
        &self.body
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}

/// An ordered, session-local snapshot of a user's mailbox, loaded at
/// successful `PASS`. Deletion marks live only here until the session ends;
/// committing them back to the store is out of scope.
#[derive(Debug, Default, Clone)]
pub struct MailboxSnapshot {
    items: Vec<MailItem>,
}

impl MailboxSnapshot {
    pub fn new(items: Vec<MailItem>) -> Self {
        Self { items }
    }

    /// Number of non-deleted items.
    pub fn count(&self) -> usize {
        self.items.iter().filter(|i| !i.deleted).count()
    }

    /// Total size in octets of non-deleted items.
    pub fn total_size(&self) -> usize {
        self.items.iter().filter(|i| !i.deleted).map(|i| i.size).sum()
    }

    /// Looks up the item at 1-based position `i`.
    pub fn item(&self, i: usize) -> Option<&MailItem> {
        if i == 0 {
            return None;
        }
        self.items.get(i - 1)
    }

    /// Marks the item at 1-based position `i` deleted. Returns `false` if
    /// there is no such item.
    pub fn mark_deleted(&mut self, i: usize) -> bool {
        if i == 0 {
            return false;
        }
        match self.items.get_mut(i - 1) {
            Some(item) => {
                item.mark_deleted();
                true
            }
            None => false,
        }
    }

    /// Clears all delete marks (`RSET`).
    pub fn reset_deletions(&mut self) {
        for item in self.items.iter_mut() {
            item.deleted = false;
        }
    }

    /// Iterates 1-based `(position, item)` pairs in insertion order,
    /// including deleted items — callers filter as needed (`LIST`'s
    /// per-line scan skips them while the header always reports the
    /// non-deleted totals).
    pub fn iter(&self) -> impl Iterator<Item = (usize, &MailItem)> {
        self.items.iter().enumerate().map(|(idx, item)| (idx + 1, item))
    }
}

/// The mail-store interface consumed by the POP3 and SMTP sessions.
///
/// Implementations must be safe for concurrent callers: sessions hold a
/// shared `Arc<dyn UserStore>` and never take an exclusive lock on it
/// themselves.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Validates a username, optionally checking a password too. With
    /// `password = None` this is an existence check (used by POP3 `USER`
    /// and SMTP `RCPT`); with `password = Some(..)` it verifies the
    /// credential (used by POP3 `PASS`).
    async fn validate(&self, username: &str, password: Option<&str>) -> bool;

    /// Loads a snapshot of `username`'s mailbox, items in a stable order.
    async fn load_mailbox(&self, username: &str) -> anyhow::Result<MailboxSnapshot>;

    /// Atomically commits `body` into every recipient's mailbox. All
    /// recipients succeed or none do.
    async fn deliver(&self, recipients: &[String], body: Vec<u8>) -> anyhow::Result<()>;
}
