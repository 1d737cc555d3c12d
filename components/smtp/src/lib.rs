//! # Example SMTP session
//!
//! ```text
//! S: <wait for connection on TCP port 25>
//! C: <open connection>
//! S:    220 host SMTP Server Ready
//! C:    HELO client.example
//! S:    250 host
//! C:    MAIL FROM:<alice@example>
//! S:    250 OK
//! C:    RCPT TO:<bob@host>
//! S:    250 OK
//! C:    DATA
//! S:    354 End data with <CRLF>.<CRLF>
//! C:    Subject: hi
//! C:
//! C:    body text
//! C:    .
//! S:    250 OK
//! C:    QUIT
//! S:    221 OK
//! C:  <close connection>
//! ```

pub use proto::{Command, Response};
pub use session::Session;

mod proto;
mod session;
