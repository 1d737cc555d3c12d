//! Command tokens and the fixed POP3 response strings.
//!
//! [`Response::render`] is the single place the literal status-line bytes
//! appear, so a conformance fix never needs to be made in more than one
//! spot.

/// The POP3 commands this server recognizes. Unlike a full RFC 1939
/// implementation, this does not include `APOP`, `AUTH`, `CAPA`, `TOP` or
/// `UIDL` — this server only ever has to speak plain `USER`/`PASS`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    User,
    Pass,
    Stat,
    List,
    Retr,
    Dele,
    Noop,
    Rset,
    Quit,
}

impl Command {
    /// Parses a command token, case-insensitively. Returns `None` for any
    /// token this server doesn't recognize, which callers turn into `-ERR`.
    pub fn parse(token: &str) -> Option<Command> {
        Some(match token.to_ascii_uppercase().as_str() {
            "USER" => Command::User,
            "PASS" => Command::Pass,
            "STAT" => Command::Stat,
            "LIST" => Command::List,
            "RETR" => Command::Retr,
            "DELE" => Command::Dele,
            "NOOP" => Command::Noop,
            "RSET" => Command::Rset,
            "QUIT" => Command::Quit,
            _ => return None,
        })
    }
}

/// A fully rendered POP3 response. Constructing one of these and calling
/// [`Response::render`] is the only way a reply string gets produced.
pub enum Response {
    Greeting,
    Ok,
    OkStat { count: usize, size: usize },
    ListItem { index: usize, size: usize },
    ListEnd,
    Err,
}

impl Response {
    pub fn render(&self) -> String {
        match self {
            Response::Greeting => "+OK POP3 Server Ready\r\n".to_string(),
            Response::Ok => "+OK\r\n".to_string(),
            Response::OkStat { count, size } => format!("+OK {} {}\r\n", count, size),
            Response::ListItem { index, size } => format!("{} {}\r\n", index, size),
            Response::ListEnd => ".\r\n".to_string(),
            Response::Err => "-ERR\r\n".to_string(),
        }
    }
}

/// Checks the strict line-admissibility rule shared by every POP3 command:
/// at least 3 bytes, ending in CRLF, with a non-whitespace byte
/// immediately before the CR. A line that is exactly CRLF fails this (too
/// short).
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

/// Splits a well-formed line into its command token and optional argument.
/// The argument is everything after the first space, up to (not
/// including) the trailing CRLF; an empty argument is treated as absent.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_lines() {
        assert!(!is_well_formed(b"\r\n"));
        assert!(!is_well_formed(b"a\n"));
    }

    #[test]
    fn rejects_trailing_whitespace_before_cr() {
        assert!(!is_well_formed(b"QUIT \r\n"));
    }

    #[test]
    fn accepts_minimal_well_formed_line() {
        assert!(is_well_formed(b"NOOP\r\n"));
        assert!(is_well_formed(b".\r\n"));
    }

    #[test]
    fn splits_command_and_argument() {
        assert_eq!(
            split_command(b"USER alice\r\n"),
            ("USER".to_string(), Some("alice".to_string()))
        );
        assert_eq!(split_command(b"STAT\r\n"), ("STAT".to_string(), None));
        assert_eq!(split_command(b"LIST 3\r\n"), ("LIST".to_string(), Some("3".to_string())));
    }

    #[test]
    fn command_parse_is_case_insensitive() {
        assert_eq!(Command::parse("user"), Some(Command::User));
        assert_eq!(Command::parse("UsEr"), Some(Command::User));
        assert_eq!(Command::parse("bogus"), None);
    }
}
