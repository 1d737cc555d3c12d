//! Drives the SMTP GREETED → HELO_OK → MAIL_OK → RCPT_OK → DATA_MODE state
//! machine for one connection.

use std::sync::Arc;

use postman_net::{LineBuffer, LineOutcome};
use postman_store::UserStore;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::proto::{ends_with_crlf, extract_bracketed_address, is_well_formed, split_command, Command, Response};

const MAX_LINE: usize = 1024;
const MAX_RECIPIENTS: usize = 30;
/// RFC 5321 §4.5.3.1.7 floor for the minimum message size a server must
/// accept without rejecting for size; used here only as the buffer's
/// initial capacity, not a limit.
const DATA_BUFFER_INITIAL: usize = 64_000;
/// Implementation-defined cap on the DATA body; exceeding it aborts with
/// `451` rather than growing the buffer without bound (see the dynamic
/// message buffer design note).
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// The live state of an SMTP session. Each variant only carries the
/// fields that are live in that state.
enum SessionState {
    Greeted,
    HeloOk,
    MailOk {
        reverse_path: String,
    },
    RcptOk {
        reverse_path: String,
        forward_paths: Vec<String>,
    },
    DataMode {
        reverse_path: String,
        forward_paths: Vec<String>,
        body_buffer: Vec<u8>,
    },
}

/// One SMTP connection: owns its line reader, its write half, and its
/// state. Shares read access to `store` with every other session.
pub struct Session<S> {
    reader: LineBuffer<ReadHalf<S>>,
    writer: WriteHalf<S>,
    store: Arc<dyn UserStore>,
    hostname: String,
    state: SessionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, store: Arc<dyn UserStore>, hostname: String) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: LineBuffer::new(read_half, MAX_LINE),
            writer: write_half,
            store,
            hostname,
            state: SessionState::Greeted,
        }
    }

    /// Runs the session to completion: sends the 220 banner, then
    /// processes lines until `QUIT`, an orderly close, or a write failure.
    pub async fn run(mut self) -> std::io::Result<()> {
        self.send(Response::Greeting {
            hostname: self.hostname.clone(),
        })
        .await?;

        loop {
            let line = match self.reader.read_line().await? {
                LineOutcome::Line(line) => line,
                LineOutcome::Eof => return Ok(()),
            };

            if matches!(self.state, SessionState::DataMode { .. }) {
                if line == b".\r\n" {
                    self.finish_data().await?;
                } else if ends_with_crlf(&line) {
                    self.append_body(&line).await?;
                }
                // A line that fails even the relaxed CRLF rule can only
                // come from the line buffer's max-length overflow path;
                // silently dropping it matches "no byte-stuffing" scope.
                continue;
            }

            if !is_well_formed(&line) {
                log::debug!("rejected malformed smtp line: {:?}", line);
                self.send(Response::SyntaxError).await?;
                continue;
            }

            let (token, arg) = split_command(&line);
            let cmd = Command::parse(&token);

            match cmd {
                Command::Noop => {
                    self.send(Response::NoopOk).await?;
                    continue;
                }
                Command::Quit => {
                    self.send(Response::QuitOk).await?;
                    return Ok(());
                }
                Command::NotImplemented => {
                    self.send(Response::NotImplemented).await?;
                    continue;
                }
                _ => {}
            }

            self.dispatch(cmd, arg).await?;
        }
    }

    async fn send(&mut self, response: Response) -> std::io::Result<()> {
        self.writer.write_all(response.render().as_bytes()).await
    }

    async fn dispatch(&mut self, cmd: Command, arg: Option<String>) -> std::io::Result<()> {
        let state = std::mem::replace(&mut self.state, SessionState::Greeted);
        self.state = match state {
            SessionState::Greeted => self.handle_greeted(cmd, arg).await?,
            SessionState::HeloOk => self.handle_helo_ok(cmd, arg).await?,
            SessionState::MailOk { reverse_path } => {
                self.handle_mail_ok(cmd, arg, reverse_path).await?
            }
            SessionState::RcptOk {
                reverse_path,
                forward_paths,
            } => self.handle_rcpt_ok(cmd, arg, reverse_path, forward_paths).await?,
            data_mode @ SessionState::DataMode { .. } => data_mode,
        };
        Ok(())
    }

    async fn handle_greeted(&mut self, cmd: Command, arg: Option<String>) -> std::io::Result<SessionState> {
        match cmd {
            Command::Helo if arg.is_some() => {
                self.send(Response::HeloOk {
                    hostname: self.hostname.clone(),
                })
                .await?;
                Ok(SessionState::HeloOk)
            }
            Command::Mail | Command::Rcpt | Command::Data => {
                self.send(Response::BadSequence).await?;
                Ok(SessionState::Greeted)
            }
            _ => {
                self.send(Response::SyntaxError).await?;
                Ok(SessionState::Greeted)
            }
        }
    }

    async fn handle_helo_ok(&mut self, cmd: Command, arg: Option<String>) -> std::io::Result<SessionState> {
        match cmd {
            Command::Mail => match arg.as_deref().and_then(|a| extract_bracketed_address(a, "FROM:<")) {
                Some(reverse_path) => {
                    self.send(Response::MailRcptOk).await?;
                    Ok(SessionState::MailOk { reverse_path })
                }
                None => {
                    self.send(Response::ArgSyntaxError).await?;
                    Ok(SessionState::HeloOk)
                }
            },
            Command::Helo | Command::Rcpt | Command::Data => {
                self.send(Response::BadSequence).await?;
                Ok(SessionState::HeloOk)
            }
            _ => {
                self.send(Response::SyntaxError).await?;
                Ok(SessionState::HeloOk)
            }
        }
    }

    async fn handle_mail_ok(
        &mut self,
        cmd: Command,
        arg: Option<String>,
        reverse_path: String,
    ) -> std::io::Result<SessionState> {
        match cmd {
            Command::Rcpt => match arg.as_deref().and_then(|a| extract_bracketed_address(a, "TO:<")) {
                Some(addr) => {
                    if self.store.validate(&addr, None).await {
                        self.send(Response::MailRcptOk).await?;
                        Ok(SessionState::RcptOk {
                            reverse_path,
                            forward_paths: vec![addr],
                        })
                    } else {
                        self.send(Response::RecipientNotRecognized).await?;
                        Ok(SessionState::MailOk { reverse_path })
                    }
                }
                None => {
                    self.send(Response::ArgSyntaxError).await?;
                    Ok(SessionState::MailOk { reverse_path })
                }
            },
            Command::Helo | Command::Mail | Command::Data => {
                self.send(Response::BadSequence).await?;
                Ok(SessionState::MailOk { reverse_path })
            }
            _ => {
                self.send(Response::SyntaxError).await?;
                Ok(SessionState::MailOk { reverse_path })
            }
        }
    }

    async fn handle_rcpt_ok(
        &mut self,
        cmd: Command,
        arg: Option<String>,
        reverse_path: String,
        forward_paths: Vec<String>,
    ) -> std::io::Result<SessionState> {
        match cmd {
            Command::Data => {
                if arg.is_none() {
                    self.send(Response::DataOk).await?;
                    Ok(SessionState::DataMode {
                        reverse_path,
                        forward_paths,
                        body_buffer: Vec::with_capacity(DATA_BUFFER_INITIAL),
                    })
                } else {
                    self.send(Response::SyntaxError).await?;
                    Ok(SessionState::RcptOk {
                        reverse_path,
                        forward_paths,
                    })
                }
            }
            Command::Rcpt => match arg.as_deref().and_then(|a| extract_bracketed_address(a, "TO:<")) {
                Some(addr) => {
                    if forward_paths.len() >= MAX_RECIPIENTS {
                        // Already at the cap: accept the command but drop
                        // the extra recipient rather than growing the list
                        // past what §3 allows.
                        self.send(Response::MailRcptOk).await?;
                        Ok(SessionState::RcptOk {
                            reverse_path,
                            forward_paths,
                        })
                    } else if self.store.validate(&addr, None).await {
                        let mut forward_paths = forward_paths;
                        forward_paths.push(addr);
                        self.send(Response::MailRcptOk).await?;
                        Ok(SessionState::RcptOk {
                            reverse_path,
                            forward_paths,
                        })
                    } else {
                        self.send(Response::RecipientNotRecognized).await?;
                        Ok(SessionState::RcptOk {
                            reverse_path,
                            forward_paths,
                        })
                    }
                }
                None => {
                    self.send(Response::ArgSyntaxError).await?;
                    Ok(SessionState::RcptOk {
                        reverse_path,
                        forward_paths,
                    })
                }
            },
            Command::Helo | Command::Mail => {
                self.send(Response::BadSequence).await?;
                Ok(SessionState::RcptOk {
                    reverse_path,
                    forward_paths,
                })
            }
            _ => {
                self.send(Response::SyntaxError).await?;
                Ok(SessionState::RcptOk {
                    reverse_path,
                    forward_paths,
                })
            }
        }
    }

    async fn append_body(&mut self, line: &[u8]) -> std::io::Result<()> {
        let state = std::mem::replace(&mut self.state, SessionState::Greeted);
        if let SessionState::DataMode {
            reverse_path,
            forward_paths,
            mut body_buffer,
        } = state
        {
            if body_buffer.len() + line.len() > MAX_BODY_BYTES {
                log::warn!("DATA body exceeded {} bytes, aborting", MAX_BODY_BYTES);
                self.state = SessionState::HeloOk;
                self.send(Response::CommitFailed).await?;
            } else {
                body_buffer.extend_from_slice(line);
                self.state = SessionState::DataMode {
                    reverse_path,
                    forward_paths,
                    body_buffer,
                };
            }
        } else {
            self.state = state;
        }
        Ok(())
    }

    async fn finish_data(&mut self) -> std::io::Result<()> {
        let state = std::mem::replace(&mut self.state, SessionState::Greeted);
        if let SessionState::DataMode {
            forward_paths,
            body_buffer,
            ..
        } = state
        {
            match self.store.deliver(&forward_paths, body_buffer).await {
                Ok(()) => self.send(Response::MailRcptOk).await?,
                Err(err) => {
                    log::warn!("DATA commit failed: {:#}", err);
                    self.send(Response::CommitFailed).await?;
                }
            }
            self.state = SessionState::HeloOk;
        } else {
            self.state = state;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postman_store::MemoryStore;
    use tokio::io::AsyncReadExt;

    async fn transcript(store: Arc<dyn UserStore>, script: &'static [u8]) -> String {
        let (mut client, server) = tokio::io::duplex(8192);
        let session = Session::new(server, store, "host".to_string());
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
    async fn happy_path_s4() {
        let store = Arc::new(MemoryStore::new());
        store.seed_user("bob@host", "pw", vec![]).await;

        let script = b"HELO client\r\nMAIL FROM:<a@x>\r\nRCPT TO:<bob@host>\r\nDATA\r\nSubject: hi\r\n\r\nbody\r\n.\r\nQUIT\r\n";
        let out = transcript(store, script).await;

        assert!(out.starts_with("220 host SMTP Server Ready\r\n"));
        assert!(out.contains("250 host\r\n"));
        assert!(out.contains("354 End data with <CRLF>.<CRLF>\r\n"));
        assert!(out.contains("221 OK\r\n"));
    }

    #[tokio::test]
    async fn bad_sequence_from_greeted() {
        let store = Arc::new(MemoryStore::new());
        let out = transcript(store, b"MAIL FROM:<a@x>\r\n").await;
        assert!(out.contains("503 Bad sequence of commands\r\n"));
    }

    #[tokio::test]
    async fn unknown_recipient_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let out = transcript(store, b"HELO c\r\nMAIL FROM:<a@x>\r\nRCPT TO:<nobody@host>\r\n").await;
        assert!(out.contains("555 Recipient not recognized\r\n"));
    }

    #[tokio::test]
    async fn data_commits_body_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        store.seed_user("bob@host", "pw", vec![]).await;
        let out = transcript(
            store.clone(),
            b"HELO c\r\nMAIL FROM:<a@x>\r\nRCPT TO:<bob@host>\r\nDATA\r\nhi\r\n.\r\n",
        )
        .await;
        assert!(out.contains("250 OK\r\n"));

        let mailbox = store.load_mailbox("bob@host").await.unwrap();
        assert_eq!(mailbox.count(), 1);
        assert_eq!(mailbox.item(1).unwrap().open_reader(), b"hi\r\n");
    }

    /// A [`UserStore`] whose `deliver` always fails, to exercise the `451`
    /// commit-failure path independent of any real backing store.
    struct FailingStore;

    #[async_trait::async_trait]
    impl UserStore for FailingStore {
        async fn validate(&self, _username: &str, _password: Option<&str>) -> bool {
            true
        }

        async fn load_mailbox(&self, _username: &str) -> anyhow::Result<postman_store::MailboxSnapshot> {
            Ok(postman_store::MailboxSnapshot::new(vec![]))
        }

        async fn deliver(&self, _recipients: &[String], _body: Vec<u8>) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[tokio::test]
    async fn delivery_failure_yields_451() {
        let store: Arc<dyn UserStore> = Arc::new(FailingStore);
        let out = transcript(
            store,
            b"HELO c\r\nMAIL FROM:<a@x>\r\nRCPT TO:<bob@host>\r\nDATA\r\nhi\r\n.\r\n",
        )
        .await;
        assert!(out.contains("451 Requested action aborted: error in processing\r\n"));
    }
}
