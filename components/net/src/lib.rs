//! Buffered line reader shared by the POP3 and SMTP sessions.
//!
//! Turns an [`AsyncRead`] byte stream into one logical CRLF-ish line per
//! call, capped at a fixed maximum length, the way a POP3/SMTP command
//! parser expects to consume its input.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Outcome of a single [`LineBuffer::read_line`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum LineOutcome {
    /// A line was read. Does not include a trailing NUL; may or may not end
    /// in LF depending on how it was produced (see [`LineBuffer::read_line`]).
    Line(Vec<u8>),
    /// The peer closed the stream with nothing buffered.
    Eof,
}

/// Reads logical lines off of a socket-like stream, capped at `max_line`
/// bytes per line.
pub struct LineBuffer<R> {
    reader: R,
    buf: Vec<u8>,
    filled: usize,
    max_line: usize,
}

impl<R: AsyncRead + Unpin> LineBuffer<R> {
    pub fn new(reader: R, max_line: usize) -> Self {
        Self {
            reader,
            buf: vec![0u8; max_line],
            filled: 0,
            max_line,
        }
    }

    /// Reads the next logical line.
    ///
    /// Returns `Line` with the bytes up to and including the terminating
    /// LF if one was found. If the buffer fills up before an LF is seen,
    /// the full buffer is returned as an unterminated line — the caller is
    /// expected to reject it via the CRLF admissibility check. On orderly
    /// close with buffered bytes left over, those bytes are returned as a
    /// final, possibly unterminated, line. On orderly close with nothing
    /// buffered, returns `Eof`.
    pub async fn read_line(&mut self) -> std::io::Result<LineOutcome> {
        loop {
            if let Some(pos) = self.buf[..self.filled].iter().position(|&b| b == b'\n') {
                let line = self.buf[..=pos].to_vec();
                self.buf.copy_within(pos + 1..self.filled, 0);
                self.filled -= pos + 1;
                return Ok(LineOutcome::Line(line));
            }

            if self.filled == self.max_line {
                let line = self.buf[..self.filled].to_vec();
                self.filled = 0;
                return Ok(LineOutcome::Line(line));
            }

            let n = self.reader.read(&mut self.buf[self.filled..]).await?;
            if n == 0 {
                if self.filled > 0 {
                    let line = self.buf[..self.filled].to_vec();
                    self.filled = 0;
                    return Ok(LineOutcome::Line(line));
                }
                return Ok(LineOutcome::Eof);
            }
            self.filled += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn make_pair(max_line: usize) -> (tokio::io::DuplexStream, LineBuffer<tokio::io::DuplexStream>) {
        let (client, server) = tokio::io::duplex(4096);
        (client, LineBuffer::new(server, max_line))
    }

    #[tokio::test]
    async fn reads_line_present_in_first_chunk() {
        let (mut client, mut lb) = make_pair(64).await;
        client.write_all(b"USER alice\r\n").await.unwrap();
        let line = lb.read_line().await.unwrap();
        assert_eq!(line, LineOutcome::Line(b"USER alice\r\n".to_vec()));
    }

    #[tokio::test]
    async fn line_split_across_two_reads() {
        let (mut client, mut lb) = make_pair(64).await;
        client.write_all(b"PASS sec").await.unwrap();
        let (_client, lb_res) = tokio::join!(
            async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                client.write_all(b"ret\r\n").await.unwrap();
                client
            },
            lb.read_line()
        );
        assert_eq!(lb_res.unwrap(), LineOutcome::Line(b"PASS secret\r\n".to_vec()));
    }

    #[tokio::test]
    async fn buffer_fills_without_lf() {
        let (mut client, mut lb) = make_pair(8).await;
        client.write_all(b"01234567").await.unwrap();
        let line = lb.read_line().await.unwrap();
        assert_eq!(line, LineOutcome::Line(b"01234567".to_vec()));
    }

    #[tokio::test]
    async fn eof_with_partial_buffer_yields_final_line() {
        let (mut client, mut lb) = make_pair(64).await;
        client.write_all(b"QUIT").await.unwrap();
        drop(client);
        let line = lb.read_line().await.unwrap();
        assert_eq!(line, LineOutcome::Line(b"QUIT".to_vec()));
    }

    #[tokio::test]
    async fn eof_with_nothing_buffered_yields_eof() {
        let (client, mut lb) = make_pair(64).await;
        drop(client);
        let line = lb.read_line().await.unwrap();
        assert_eq!(line, LineOutcome::Eof);
    }
}
