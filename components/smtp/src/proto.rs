//! Command tokens and the fixed SMTP response strings.
//!
//! [`Response::render`] is the single place the literal status-line bytes
//! appear, matching the same design the POP3 session uses for its
//! `+OK`/`-ERR` table.

/// The SMTP commands this server recognizes by name, whether or not they
/// are accepted in the current state. `Other` carries the raw (uppercased)
/// token so unrecognized commands can still flow through the same
/// `500`/`502` handling.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Helo,
    Mail,
    Rcpt,
    Data,
    Noop,
    Quit,
    /// Commands this server understands the *name* of but never
    /// implements: `EHLO`, `RSET`, `VRFY`, `EXPN`, `HELP`.
    NotImplemented,
    Other(String),
}

impl Command {
    pub fn parse(token: &str) -> Command {
        match token.to_ascii_uppercase().as_str() {
            "HELO" => Command::Helo,
            "MAIL" => Command::Mail,
            "RCPT" => Command::Rcpt,
            "DATA" => Command::Data,
            "NOOP" => Command::Noop,
            "QUIT" => Command::Quit,
            "EHLO" | "RSET" | "VRFY" | "EXPN" | "HELP" => Command::NotImplemented,
            other => Command::Other(other.to_string()),
        }
    }
}

/// A fully rendered SMTP response.
pub enum Response {
    Greeting { hostname: String },
    NoopOk,
    QuitOk,
    MailRcptOk,
    HeloOk { hostname: String },
    DataOk,
    CommitFailed,
    SyntaxError,
    ArgSyntaxError,
    NotImplemented,
    BadSequence,
    RecipientNotRecognized,
}

impl Response {
    pub fn render(&self) -> String {
        match self {
            Response::Greeting { hostname } => format!("220 {} SMTP Server Ready\r\n", hostname),
            Response::NoopOk => "250 OK\r\n".to_string(),
            Response::QuitOk => "221 OK\r\n".to_string(),
            Response::MailRcptOk => "250 OK\r\n".to_string(),
            Response::HeloOk { hostname } => format!("250 {}\r\n", hostname),
            Response::DataOk => "354 End data with <CRLF>.<CRLF>\r\n".to_string(),
            Response::CommitFailed => "451 Requested action aborted: error in processing\r\n".to_string(),
            Response::SyntaxError => "500 Syntax error, command unrecognized\r\n".to_string(),
            Response::ArgSyntaxError => "501 Syntax error in parameters or arguments\r\n".to_string(),
            Response::NotImplemented => "502 Command not implemented\r\n".to_string(),
            Response::BadSequence => "503 Bad sequence of commands\r\n".to_string(),
            Response::RecipientNotRecognized => "555 Recipient not recognized\r\n".to_string(),
        }
    }
}

/// The strict line-admissibility rule used outside `DATA_MODE`: at least 3
/// bytes, ending in CRLF, with a non-whitespace byte immediately before
/// the CR.
pub fn is_well_formed(line: &[u8]) -> bool {
    let len = line.len();
    if len < 3 {
        return false;
    }
    if line[len - 2] != b'\r' || line[len - 1] != b'\n' {
        return false;
    }
    !(line[len - 3] as char).is_whitespace()
}

/// The relaxed rule used inside `DATA_MODE`: only the CRLF terminator is
/// required.
pub fn ends_with_crlf(line: &[u8]) -> bool {
    line.len() >= 2 && line[line.len() - 2] == b'\r' && line[line.len() - 1] == b'\n'
}

/// Splits a well-formed line into its command token and optional
/// argument, exactly like the POP3 parser.
pub fn split_command(line: &[u8]) -> (String, Option<String>) {
    let content = &line[..line.len() - 2];
    let content = String::from_utf8_lossy(content);
    match content.find(' ') {
        Some(idx) => {
            let arg = content[idx + 1..].to_string();
            if arg.is_empty() {
                (content[..idx].to_string(), None)
            } else {
                (content[..idx].to_string(), Some(arg))
            }
        }
        None => (content.to_string(), None),
    }
}

/// Extracts the address between `<` and `>` from a `MAIL FROM:<...>` or
/// `RCPT TO:<...>` argument. `prefix` is `"FROM:<"` or `"TO:<"`, matched
/// case-insensitively. Returns `None` on any syntactic mismatch or an
/// empty address.
pub fn extract_bracketed_address(arg: &str, prefix: &str) -> Option<String> {
    if arg.len() < prefix.len() {
        return None;
    }
    let (head, rest) = arg.split_at(prefix.len());
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = rest.strip_suffix('>')?;
    if rest.is_empty() {
        return None;
    }
    Some(rest.to_string())
}
