//! # Example POP3 session
//!
//! ```text
//! S: <wait for connection on TCP port 110>
//! C: <open connection>
//! S:    +OK POP3 Server Ready
//! C:    USER mrose
//! S:    +OK
//! C:    PASS tanstaaf
//! S:    +OK
//! C:    STAT
//! S:    +OK 2 320
//! C:    LIST
//! S:    +OK 2 320
//! S:    1 120
//! S:    2 200
//! S:    .
//! C:    RETR 1
//! S:    +OK
//! S:    <the POP3 server sends message 1>
//! S:    .
//! C:    DELE 1
//! S:    +OK
//! C:    QUIT
//! S:    +OK
//! C:  <close connection>
//! S:  <wait for next connection>
//! ```

pub use proto::{Command, Response};
pub use session::Session;

mod proto;
mod session;
