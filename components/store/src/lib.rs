//! The mail-store interface consumed by the POP3 and SMTP sessions.
//!
//! [`UserStore`] is the abstract contract; [`MemoryStore`] is a
//! deterministic in-memory substitute for tests, and [`SledStore`] is the
//! real backing implementation built on `sled` + `bincode`.

mod memory;
mod sled_store;
mod types;

pub use memory::MemoryStore;
pub use sled_store::SledStore;
pub use types::{MailItem, MailboxSnapshot, UserStore};
