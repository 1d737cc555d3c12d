//! Drives the POP3 AUTHORIZATION/TRANSACTION state machine for one
//! connection.

use std::sync::Arc;

use postman_net::{LineBuffer, LineOutcome};
use postman_store::{MailboxSnapshot, UserStore};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::proto::{is_well_formed, split_command, Command, Response};

const MAX_LINE: usize = 1024;

/// The live state of a POP3 session. Each variant only carries the fields
/// that are actually reachable from it — there is no cross-cutting
/// `accepted_user: bool` flag standing in for a state that already exists.
enum SessionState {
    Authorization { accepted_username: Option<String> },
    Transaction { mailbox: MailboxSnapshot },
}

/// One POP3 connection: owns its line reader, its write half, and its
/// state. Shares read access to `store` with every other session.
pub struct Session<S> {
    reader: LineBuffer<ReadHalf<S>>,
    writer: WriteHalf<S>,
    store: Arc<dyn UserStore>,
    state: SessionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, store: Arc<dyn UserStore>) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: LineBuffer::new(read_half, MAX_LINE),
            writer: write_half,
            store,
            state: SessionState::Authorization {
                accepted_username: None,
            },
        }
    }

    /// Runs the session to completion: sends the banner, then processes
    /// lines until `QUIT`, an orderly close, or a write failure.
    pub async fn run(mut self) -> std::io::Result<()> {
        self.send(Response::Greeting).await?;

        loop {
            let line = match self.reader.read_line().await? {
                LineOutcome::Line(line) => line,
                LineOutcome::Eof => return Ok(()),
            };

            if !is_well_formed(&line) {
                log::debug!("rejected malformed pop3 line: {:?}", line);
                self.send(Response::Err).await?;
                continue;
            }

            let (token, arg) = split_command(&line);
            let should_close = match Command::parse(&token) {
                Some(cmd) => self.dispatch(cmd, arg).await?,
                None => {
                    self.send(Response::Err).await?;
                    false
                }
            };

            if should_close {
                return Ok(());
            }
        }
    }

    async fn send(&mut self, response: Response) -> std::io::Result<()> {
        self.writer.write_all(response.render().as_bytes()).await
    }

    /// Dispatches one parsed command. Returns `Ok(true)` when the
    /// connection should close.
    async fn dispatch(&mut self, cmd: Command, arg: Option<String>) -> std::io::Result<bool> {
        match std::mem::replace(
            &mut self.state,
            SessionState::Authorization {
                accepted_username: None,
            },
        ) {
            SessionState::Authorization { accepted_username } => {
                self.dispatch_authorization(cmd, arg, accepted_username).await
            }
            SessionState::Transaction { mailbox } => {
                self.dispatch_transaction(cmd, arg, mailbox).await
            }
        }
    }

    async fn dispatch_authorization(
        &mut self,
        cmd: Command,
        arg: Option<String>,
        accepted_username: Option<String>,
    ) -> std::io::Result<bool> {
        match (cmd, arg) {
            (Command::User, Some(name)) => {
                if self.store.validate(&name, None).await {
                    self.state = SessionState::Authorization {
                        accepted_username: Some(name),
                    };
                    self.send(Response::Ok).await?;
                } else {
                    self.state = SessionState::Authorization {
                        accepted_username: None,
                    };
                    self.send(Response::Err).await?;
                }
                Ok(false)
            }
            (Command::Pass, Some(pw)) if accepted_username.is_some() => {
                let username = accepted_username.clone().unwrap();
                if self.store.validate(&username, Some(&pw)).await {
                    match self.store.load_mailbox(&username).await {
                        Ok(mailbox) => {
                            self.state = SessionState::Transaction { mailbox };
                            self.send(Response::Ok).await?;
                        }
                        Err(_) => {
                            log::warn!("failed to load mailbox for {}", username);
                            self.state = SessionState::Authorization {
                                accepted_username: None,
                            };
                            self.send(Response::Err).await?;
                        }
                    }
                } else {
                    self.state = SessionState::Authorization {
                        accepted_username: None,
                    };
                    self.send(Response::Err).await?;
                }
                Ok(false)
            }
            (Command::Quit, None) => {
                self.send(Response::Ok).await?;
                Ok(true)
            }
            (other, _) => {
                let clears_username = matches!(other, Command::User | Command::Pass);
                self.state = SessionState::Authorization {
                    accepted_username: if clears_username { None } else { accepted_username },
                };
                self.send(Response::Err).await?;
                Ok(false)
            }
        }
    }

    async fn dispatch_transaction(
        &mut self,
        cmd: Command,
        arg: Option<String>,
        mut mailbox: MailboxSnapshot,
    ) -> std::io::Result<bool> {
        match (cmd, arg) {
            (Command::Stat, None) => {
                self.send(Response::OkStat {
                    count: mailbox.count(),
                    size: mailbox.total_size(),
                })
                .await?;
                self.state = SessionState::Transaction { mailbox };
                Ok(false)
            }
            (Command::List, None) => {
                self.send(Response::OkStat {
                    count: mailbox.count(),
                    size: mailbox.total_size(),
                })
                .await?;
                for (index, item) in mailbox.iter() {
                    if !item.is_deleted() {
                        self.send(Response::ListItem {
                            index,
                            size: item.size(),
                        })
                        .await?;
                    }
                }
                self.send(Response::ListEnd).await?;
                self.state = SessionState::Transaction { mailbox };
                Ok(false)
            }
            (Command::List, Some(arg)) => {
                match parse_index(&arg).and_then(|i| mailbox.item(i).map(|item| (i, item))) {
                    Some((index, item)) if !item.is_deleted() => {
                        self.send(Response::ListItem {
                            index,
                            size: item.size(),
                        })
                        .await?;
                    }
                    _ => self.send(Response::Err).await?,
                }
                self.state = SessionState::Transaction { mailbox };
                Ok(false)
            }
            (Command::Retr, Some(arg)) => {
                let body = match parse_index(&arg).and_then(|i| mailbox.item(i)) {
                    Some(item) if !item.is_deleted() => Some(item.open_reader().to_vec()),
                    _ => None,
                };
                match body {
                    Some(body) => {
                        self.send(Response::Ok).await?;
                        self.writer.write_all(&body).await?;
                        self.send(Response::ListEnd).await?;
                    }
                    None => self.send(Response::Err).await?,
                }
                self.state = SessionState::Transaction { mailbox };
                Ok(false)
            }
            (Command::Dele, Some(arg)) => {
                let marked = parse_index(&arg)
                    .map(|i| mailbox.mark_deleted(i))
                    .unwrap_or(false);
                self.send(if marked { Response::Ok } else { Response::Err }).await?;
                self.state = SessionState::Transaction { mailbox };
                Ok(false)
            }
            (Command::Noop, None) => {
                self.send(Response::Ok).await?;
                self.state = SessionState::Transaction { mailbox };
                Ok(false)
            }
            (Command::Rset, None) => {
                mailbox.reset_deletions();
                self.send(Response::OkStat {
                    count: mailbox.count(),
                    size: mailbox.total_size(),
                })
                .await?;
                self.state = SessionState::Transaction { mailbox };
                Ok(false)
            }
            (Command::Quit, None) => {
                self.send(Response::Ok).await?;
                Ok(true)
            }
            _ => {
                self.send(Response::Err).await?;
                self.state = SessionState::Transaction { mailbox };
                Ok(false)
            }
        }
    }
}

/// Parses a `LIST`/`RETR`/`DELE` argument: a non-empty string of ASCII
/// decimal digits.
fn parse_index(arg: &str) -> Option<usize> {
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    arg.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use postman_store::MemoryStore;
    use tokio::io::AsyncReadExt;

    async fn transcript(store: Arc<dyn UserStore>, script: &'static [u8]) -> String {
        let (mut client, server) = tokio::io::duplex(8192);
        let session = Session::new(server, store);
        let handle = tokio::spawn(session.run());

        client.write_all(script).await.unwrap();

        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                res = client.read(&mut buf) => {
                    match res {
                        Ok(0) => break,
                        Ok(n) => out.extend_from_slice(&buf[..n]),
                        Err(_) => break,
                    }
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => break,
            }
        }
        drop(client);
        let _ = handle.await;
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn happy_path_s1() {
        let store = Arc::new(MemoryStore::new());
        store.seed_user("alice", "pw", vec![vec![0u8; 100]]).await;

        let script = b"USER alice\r\nPASS pw\r\nSTAT\r\nLIST\r\nDELE 1\r\nSTAT\r\nRSET\r\nQUIT\r\n";
        let out = transcript(store, script).await;

        assert!(out.starts_with("+OK POP3 Server Ready\r\n"));
        assert!(out.contains("+OK 1 100\r\n"));
        assert!(out.contains("1 100\r\n"));
        assert!(out.contains("+OK 0 0\r\n"));
        assert!(out.ends_with("+OK\r\n") || out.contains("+OK\r\n"));
    }

    #[tokio::test]
    async fn user_without_argument_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let out = transcript(store, b"USER\r\n").await;
        assert!(out.ends_with("-ERR\r\n"));
    }

    #[tokio::test]
    async fn pass_without_prior_user_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let out = transcript(store, b"PASS pw\r\n").await;
        assert!(out.ends_with("-ERR\r\n"));
    }

    #[tokio::test]
    async fn malformed_line_always_yields_err() {
        let store = Arc::new(MemoryStore::new());
        let out = transcript(store, b"\r\n").await;
        assert!(out.ends_with("-ERR\r\n"));
    }
}
